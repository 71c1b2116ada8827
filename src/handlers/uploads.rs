// Photo upload handlers
// Multipart intake of training photos, owner-only previews and the zip the trainer downloads

use axum::{
    extract::{Extension, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    app::AppState,
    handlers::file_response,
    middleware::auth::AuthenticatedUser,
    models::photo::{NewUploadedPhoto, UploadedPhoto},
    services::{bundle_link::BundleLinkParams, storage::content_type_for},
    utils::ServiceError,
};

const PHOTOS_FIELD: &str = "photos";

/// POST /api/uploads
pub async fn upload_photos(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadedPhoto>>, ServiceError> {
    let max_files = state.config.storage.max_upload_files;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(PHOTOS_FIELD) {
            continue;
        }
        if files.len() == max_files {
            return Err(ServiceError::BadRequest(format!(
                "Too many files, at most {} photos per upload",
                max_files
            )));
        }

        let name = field.file_name().unwrap_or("photo").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::BadRequest(e.body_text()))?;
        files.push((name, bytes.to_vec()));
    }

    if files.is_empty() {
        return Err(ServiceError::BadRequest("No files uploaded".to_string()));
    }

    // Size checks happen before anything touches disk
    let limit = state.storage.max_upload_bytes();
    if let Some((name, _)) = files.iter().find(|(_, b)| b.len() > limit || b.is_empty()) {
        return Err(ServiceError::validation(format!("Invalid file: {}", name)));
    }

    let mut conn = state.diesel_pool.get().await?;
    let mut uploaded = Vec::with_capacity(files.len());

    for (name, bytes) in files {
        let stored = state.storage.save_upload(auth_user.user_id, &name, &bytes).await?;
        let photo = UploadedPhoto::create(
            &mut conn,
            NewUploadedPhoto {
                user_id: auth_user.user_id,
                filename: name,
                file_size: i32::try_from(stored.size).unwrap_or(i32::MAX),
                path: stored.path,
            },
        )
        .await?;
        uploaded.push(photo);
    }

    info!("User {} uploaded {} photos", auth_user.user_id, uploaded.len());
    Ok(Json(uploaded))
}

/// GET /api/uploads
pub async fn list_photos(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<UploadedPhoto>>, ServiceError> {
    let mut conn = state.diesel_pool.get().await?;
    Ok(Json(UploadedPhoto::find_by_user(&mut conn, auth_user.user_id).await?))
}

async fn owned_photo(
    state: &AppState,
    user_id: i32,
    photo_id: i32,
) -> Result<UploadedPhoto, ServiceError> {
    let mut conn = state.diesel_pool.get().await?;
    let photo = UploadedPhoto::find_by_id(&mut conn, photo_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Photo".to_string()))?;

    if photo.user_id != user_id {
        return Err(ServiceError::Forbidden);
    }
    Ok(photo)
}

/// DELETE /api/uploads/:id
pub async fn delete_photo(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(photo_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let photo = owned_photo(&state, auth_user.user_id, photo_id).await?;

    if let Err(e) = state.storage.remove(&photo.path).await {
        error!("Error deleting file {}: {}", photo.path, e);
    }

    let mut conn = state.diesel_pool.get().await?;
    UploadedPhoto::delete(&mut conn, photo.id).await?;

    Ok(Json(json!({ "message": "Photo deleted successfully" })))
}

/// GET /api/uploads/:id/preview
pub async fn preview_photo(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(photo_id): Path<i32>,
) -> Result<Response, ServiceError> {
    let photo = owned_photo(&state, auth_user.user_id, photo_id).await?;
    let bytes = state.storage.read(&photo.path).await?;
    Ok(file_response(bytes, content_type_for(&photo.path)))
}

/// Zip of the photos a training job was started with; fetched by the trainer
/// through a signed, expiring link
/// GET /api/photos/zip/:userId?photos=..&expires=..&signature=..
pub async fn photos_zip(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
    Query(params): Query<BundleLinkParams>,
) -> Result<Response, ServiceError> {
    let photo_ids = state
        .bundle_links
        .verify(user_id, &params, chrono::Utc::now().timestamp())?;

    let photos = {
        let mut conn = state.diesel_pool.get().await?;
        UploadedPhoto::find_owned(&mut conn, user_id, &photo_ids).await?
    };

    if photos.is_empty() {
        warn!("Zip requested for user {} with no matching photos", user_id);
        return Err(ServiceError::NotFound("Photos".to_string()));
    }

    let paths = photos.into_iter().map(|p| p.path).collect();
    let archive = state.storage.zip_files(paths).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip"),
            (header::CONTENT_DISPOSITION, "attachment; filename=photos.zip"),
        ],
        archive,
    )
        .into_response())
}
