// Training provider webhooks

use axum::{
    body::Bytes,
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    app::AppState,
    services::training::{webhook_model_id, TrainingWebhook},
    utils::ServiceError,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookParams {
    pub model_id: Option<String>,
}

/// POST /api/webhooks/training-complete?modelId=
pub async fn training_complete(
    State(state): State<AppState>,
    Query(params): Query<WebhookParams>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let payload: TrainingWebhook = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

    let model_id = webhook_model_id(params.model_id.as_deref(), payload.webhook.as_deref())
        .ok_or_else(|| {
            warn!("Training webhook without a model id");
            ServiceError::BadRequest("Missing modelId".to_string())
        })?;

    info!("Training webhook for model {}: {}", model_id, payload.status);
    state.training.handle_webhook(model_id, payload).await?;

    Ok(Json(json!({ "message": "Webhook processed successfully" })))
}
