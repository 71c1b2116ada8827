// Stripe handlers
// Token packages, checkout sessions, balances and the signed payment webhook

use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::HeaderMap,
    response::Json,
};
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    app::AppState,
    config::PricePackage,
    middleware::auth::AuthenticatedUser,
    services::payments::{CreateCheckoutRequest, WebhookOutcome},
    utils::ServiceError,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// GET /api/stripe/packages
pub async fn list_packages(State(state): State<AppState>) -> Json<Vec<PricePackage>> {
    Json(state.payments.packages().to_vec())
}

/// POST /api/stripe/create-checkout-session
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    request.validate()?;

    let url = state
        .payments
        .create_checkout(auth_user.user_id, &request.price_id)
        .await?;

    Ok(Json(json!({ "url": url })))
}

/// GET /api/stripe/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let balance = state.payments.balance(auth_user.user_id).await?;
    Ok(Json(json!({ "balance": balance })))
}

/// Signature is checked against the raw body, so this takes Bytes rather than Json
/// POST /api/stripe/webhook
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.payments.handle_webhook(&body, signature).await {
        Ok(WebhookOutcome::Credited { user_id, tokens }) => {
            info!("Payment webhook credited {} tokens to user {}", tokens, user_id);
        },
        Ok(outcome) => info!("Payment webhook handled: {:?}", outcome),
        Err(e) => {
            warn!("Payment webhook rejected: {}", e);
            return Err(e);
        },
    }

    Ok(Json(json!({ "received": true })))
}
