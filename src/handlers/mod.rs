// HTTP handlers and route builders
// Public routes need no credentials; protected routes sit behind auth_middleware

pub mod auth;
pub mod examples;
pub mod headshots;
pub mod models;
pub mod stripe;
pub mod uploads;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};

use crate::app::AppState;

/// Multipart overhead allowed on top of the raw file bytes
const MULTIPART_SLACK_BYTES: usize = 1024 * 1024;

/// Serve stored file bytes with the given content type
pub fn file_response(bytes: Vec<u8>, content_type: &'static str) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response()
}

// Browser OAuth redirects, mounted at the root
pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(auth::google_login))
        .route("/auth/google/callback", get(auth::google_callback))
}

// Token and session endpoints; callers may or may not be signed in
pub fn public_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/mobile/google", post(auth::mobile_google))
        .route("/refresh", post(auth::refresh_token))
        .route("/user", get(auth::current_user))
        .route("/logout", get(auth::logout))
}

// Unauthenticated API routes: provider callbacks, the trainer's zip download, the gallery
pub fn public_api_routes() -> Router<AppState> {
    Router::new()
        .route("/photos/zip/{user_id}", get(uploads::photos_zip))
        .route("/webhooks/training-complete", post(webhooks::training_complete))
        .route("/stripe/packages", get(stripe::list_packages))
        .route("/stripe/webhook", post(stripe::stripe_webhook))
        .route("/examples", get(examples::list_examples))
        .route("/examples/{id}", get(examples::get_example))
}

// Photo uploads; the body limit covers a full batch of maximum-size files
pub fn upload_routes(max_files: usize, max_file_bytes: usize) -> Router<AppState> {
    let body_limit = max_files
        .saturating_mul(max_file_bytes)
        .saturating_add(MULTIPART_SLACK_BYTES);

    Router::new()
        .route(
            "/uploads",
            post(uploads::upload_photos)
                .get(uploads::list_photos)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/uploads/{id}", axum::routing::delete(uploads::delete_photo))
        .route("/uploads/{id}/preview", get(uploads::preview_photo))
}

// Routes that need an authenticated user
pub fn protected_api_routes() -> Router<AppState> {
    Router::new()
        .route("/models/train", post(models::train_model))
        .route("/models", get(models::list_models))
        .route("/models/{id}", get(models::get_model))
        .route("/headshots/generate", post(headshots::generate_headshot))
        .route("/headshots", get(headshots::list_headshots))
        .route(
            "/headshots/{id}",
            get(headshots::get_headshot).delete(headshots::delete_headshot),
        )
        .route("/headshots/{id}/image", get(headshots::headshot_image))
        .route("/headshots/{id}/favorite", patch(headshots::toggle_favorite))
        .route(
            "/stripe/create-checkout-session",
            post(stripe::create_checkout_session),
        )
        .route("/stripe/balance", get(stripe::get_balance))
}
