// Model training handlers

use axum::{
    extract::{Extension, Path, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::training_model::TrainingModel,
    utils::ServiceError,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrainModelRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "At least one photo is required"))]
    pub photo_ids: Vec<i32>,
}

/// Model row plus a readable summary of its state
#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    #[serde(flatten)]
    pub model: TrainingModel,
    pub message: String,
}

// =============================================================================
// MODEL HANDLERS
// =============================================================================

/// POST /api/models/train
pub async fn train_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(request): Json<TrainModelRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    request.validate()?;

    let model = state
        .training
        .submit(auth_user.user_id, &request.photo_ids)
        .await?;

    Ok(Json(json!({
        "id": model.id,
        "status": model.status,
        "message": "Model training started",
    })))
}

/// GET /api/models
pub async fn list_models(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<TrainingModel>>, ServiceError> {
    Ok(Json(state.training.list_models(auth_user.user_id).await?))
}

/// Clients poll this while training runs, so it must never be cached
/// GET /api/models/:id
pub async fn get_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(model_id): Path<i32>,
) -> Result<Response, ServiceError> {
    let model = state.training.get_model(auth_user.user_id, model_id).await?;
    let message = model.status_message().to_string();

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Json(ModelStatusResponse { model, message }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_request_requires_photos() {
        let request: TrainModelRequest = serde_json::from_str("{}").unwrap();
        assert!(request.validate().is_err());

        let request: TrainModelRequest =
            serde_json::from_str(r#"{"photoIds":[4,5,6]}"#).unwrap();
        assert_eq!(request.photo_ids, vec![4, 5, 6]);
        assert!(request.validate().is_ok());
    }
}
