// Headshot handlers
// Generation, listing, favorites and archived deletion of generated headshots

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    response::{Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use validator::Validate;

use crate::{
    app::AppState,
    handlers::file_response,
    middleware::auth::AuthenticatedUser,
    models::headshot::{DeletedHeadshot, Headshot},
    services::{generation::GenerateHeadshotRequest, storage::content_type_for},
    utils::ServiceError,
};

#[derive(Debug, Deserialize)]
pub struct ListHeadshotsParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FavoriteRequest {
    pub favorite: Option<bool>,
}

/// An empty body means "toggle"
fn parse_favorite_body(body: &[u8]) -> Result<FavoriteRequest, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(FavoriteRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid request body: {}", e)))
}

async fn owned_headshot(
    state: &AppState,
    user_id: i32,
    headshot_id: i32,
) -> Result<Headshot, ServiceError> {
    let mut conn = state.diesel_pool.get().await?;
    let headshot = Headshot::find_by_id(&mut conn, headshot_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Headshot".to_string()))?;

    if headshot.user_id != user_id {
        return Err(ServiceError::Forbidden);
    }
    Ok(headshot)
}

// =============================================================================
// GENERATION
// =============================================================================

/// POST /api/headshots/generate
pub async fn generate_headshot(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(request): Json<GenerateHeadshotRequest>,
) -> Result<Json<Headshot>, ServiceError> {
    request.validate()?;
    let headshot = state.generation.generate(auth_user.user_id, request).await?;
    Ok(Json(headshot))
}

// =============================================================================
// QUERIES
// =============================================================================

/// GET /api/headshots?limit=n
pub async fn list_headshots(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Query(params): Query<ListHeadshotsParams>,
) -> Result<Json<Vec<Headshot>>, ServiceError> {
    let limit = params.limit.filter(|l| *l > 0);
    let mut conn = state.diesel_pool.get().await?;
    Ok(Json(Headshot::find_by_user(&mut conn, auth_user.user_id, limit).await?))
}

/// GET /api/headshots/:id
pub async fn get_headshot(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(headshot_id): Path<i32>,
) -> Result<Json<Headshot>, ServiceError> {
    Ok(Json(owned_headshot(&state, auth_user.user_id, headshot_id).await?))
}

/// GET /api/headshots/:id/image
pub async fn headshot_image(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(headshot_id): Path<i32>,
) -> Result<Response, ServiceError> {
    let headshot = owned_headshot(&state, auth_user.user_id, headshot_id).await?;
    let path = headshot
        .file_path
        .ok_or_else(|| ServiceError::NotFound("Image".to_string()))?;

    let bytes = state.storage.read(&path).await?;
    Ok(file_response(bytes, content_type_for(&path)))
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Set the favorite flag, or flip it when the body names no value
/// PATCH /api/headshots/:id/favorite
pub async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(headshot_id): Path<i32>,
    body: Bytes,
) -> Result<Json<Headshot>, ServiceError> {
    let request = parse_favorite_body(&body)?;
    let headshot = owned_headshot(&state, auth_user.user_id, headshot_id).await?;

    let mut conn = state.diesel_pool.get().await?;
    let updated = match request.favorite {
        Some(favorite) => Headshot::set_favorite(&mut conn, headshot.id, favorite).await?,
        None => Headshot::toggle_favorite(&mut conn, headshot.id).await?,
    };
    Ok(Json(updated))
}

/// DELETE /api/headshots/:id
pub async fn delete_headshot(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(headshot_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    owned_headshot(&state, auth_user.user_id, headshot_id).await?;

    let mut conn = state.diesel_pool.get().await?;
    let archived = Headshot::archive_and_delete(&mut conn, headshot_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Headshot".to_string()))?;

    // The archive row keeps a path only while the image it names still exists
    if let Some(path) = archived.file_path.as_deref() {
        let kept = match state.storage.archive_generated(archived.user_id, path).await {
            Ok(kept) => Some(kept),
            Err(e) => {
                error!("Error archiving file {}: {}", path, e);
                None
            },
        };
        DeletedHeadshot::set_file_path(&mut conn, archived.id, kept.as_deref()).await?;
    }

    info!("Headshot {} archived and deleted", archived.id);
    Ok(Json(json!({ "message": "Headshot deleted successfully" })))
}
