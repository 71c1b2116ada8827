// Library exports for the headshot backend
// The binary and the integration tests both build the router from here

pub mod app;
pub mod app_config;
pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

// Re-export commonly used types
pub use app::{AppState, Providers};
pub use app_config::{AppConfig, CONFIG};
pub use db::DieselPool;
pub use middleware::{auth_middleware, AuthenticatedUser};
pub use utils::ServiceError;

/// Full application router with state, auth, CORS and request tracing applied
pub fn build_router(state: AppState) -> Router {
    let storage = &state.config.storage;

    let protected = Router::new()
        .merge(handlers::upload_routes(
            storage.max_upload_files,
            storage.max_upload_bytes,
        ))
        .merge(handlers::protected_api_routes())
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let api = Router::new()
        .nest("/auth", handlers::public_auth_routes())
        .merge(handlers::public_api_routes())
        .merge(protected);

    Router::new()
        .route("/health", get(health_check))
        .merge(handlers::oauth_routes())
        .nest("/api", api)
        .layer(cors_layer(&state.config.server.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for the configured frontend origins
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            },
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

// Health check handler
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let timestamp = chrono::Utc::now().to_rfc3339();

    let (healthy, postgres) = match db::check_diesel_health(&state.diesel_pool).await {
        Ok(_) => (
            true,
            json!({
                "status": "healthy",
                "max_connections": state.max_connections,
                "error": null
            }),
        ),
        Err(e) => (
            false,
            json!({
                "status": "unhealthy",
                "error": format!("Database connection failed: {}", e)
            }),
        ),
    };

    let response = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "headshot-backend",
        "timestamp": timestamp,
        "components": { "postgresql": postgres }
    });

    if healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
