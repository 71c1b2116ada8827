// Service Error type shared by every HTTP handler
// One JSON body shape: {"error": ..., "status": ...} plus variant specific fields
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::bundle_link::BundleLinkError;
use crate::services::email::EmailError;
use crate::services::jwt::JwtError;
use crate::services::ledger::LedgerError;
use crate::services::oauth::OAuthError;
use crate::services::replicate::ProviderError;
use crate::services::storage::StorageError;
use crate::services::stripe::StripeError;

pub const GENERATION_FAILED_MESSAGE: &str = "Failed to generate headshot - token refunded";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Insufficient tokens: required {required}, current {current}")]
    InsufficientTokens { required: i32, current: i32 },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        details: Vec<String>,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Upstream provider error: {0}")]
    UpstreamProviderError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("{}", GENERATION_FAILED_MESSAGE)]
    GenerationFailed,
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::ValidationError {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::InsufficientTokens { .. } => StatusCode::PAYMENT_REQUIRED,
            ServiceError::ValidationError { .. } | ServiceError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            },
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::UpstreamProviderError(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DatabaseError(_)
            | ServiceError::InternalError(_)
            | ServiceError::GenerationFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            ServiceError::Unauthorized => json!({
                "error": "Unauthorized. No valid session or token provided.",
                "status": status.as_u16()
            }),
            ServiceError::Forbidden => json!({
                "error": "Forbidden",
                "status": status.as_u16()
            }),
            ServiceError::InsufficientTokens { required, current } => json!({
                "error": "Insufficient tokens",
                "status": status.as_u16(),
                "required": required,
                "current": current
            }),
            ServiceError::ValidationError { message, details } => json!({
                "error": message,
                "status": status.as_u16(),
                "details": details
            }),
            ServiceError::BadRequest(msg) => json!({
                "error": msg,
                "status": status.as_u16()
            }),
            ServiceError::NotFound(what) => json!({
                "error": format!("{} not found", what),
                "status": status.as_u16()
            }),
            ServiceError::UpstreamProviderError(msg) => {
                tracing::error!("Upstream provider error: {}", msg);
                json!({
                    "error": "Upstream provider error",
                    "status": status.as_u16()
                })
            },
            ServiceError::DatabaseError(msg) | ServiceError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                json!({
                    "error": "Internal server error",
                    "status": status.as_u16()
                })
            },
            ServiceError::GenerationFailed => json!({
                "error": GENERATION_FAILED_MESSAGE,
                "status": status.as_u16()
            }),
        };

        (status, Json(body)).into_response()
    }
}

// Conversion from various error types
impl From<diesel::result::Error> for ServiceError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => ServiceError::NotFound("Resource".to_string()),
            _ => ServiceError::DatabaseError(error.to_string()),
        }
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for ServiceError {
    fn from(error: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        ServiceError::DatabaseError(format!("Connection pool error: {}", error))
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(error: validator::ValidationErrors) -> Self {
        let details: Vec<String> = error
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors
                    .iter()
                    .map(move |e| format!("{}: {}", field, e.message.as_ref().unwrap_or(&e.code)))
            })
            .collect();

        ServiceError::ValidationError {
            message: "Invalid request".to_string(),
            details,
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InsufficientTokens { required, current } => {
                ServiceError::InsufficientTokens { required, current }
            },
            LedgerError::InvalidAmount(amount) => {
                ServiceError::validation(format!("Token amount must be positive, got {}", amount))
            },
            LedgerError::UserNotFound(_) => ServiceError::NotFound("User".to_string()),
            LedgerError::Database(e) => ServiceError::DatabaseError(e.to_string()),
            LedgerError::Pool(msg) => ServiceError::DatabaseError(msg),
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(error: ProviderError) -> Self {
        ServiceError::UpstreamProviderError(error.to_string())
    }
}

impl From<StripeError> for ServiceError {
    fn from(error: StripeError) -> Self {
        match error {
            StripeError::MissingSignature => {
                ServiceError::BadRequest("Missing Stripe-Signature header".to_string())
            },
            StripeError::InvalidSignature | StripeError::TimestampOutOfTolerance => {
                ServiceError::BadRequest("Webhook error".to_string())
            },
            StripeError::InvalidPayload(msg) => ServiceError::BadRequest(msg),
            StripeError::Api(msg) | StripeError::Http(msg) => {
                ServiceError::UpstreamProviderError(msg)
            },
        }
    }
}

impl From<BundleLinkError> for ServiceError {
    fn from(error: BundleLinkError) -> Self {
        tracing::warn!("Rejected photo bundle request: {}", error);
        match error {
            BundleLinkError::Unsigned => ServiceError::Unauthorized,
            _ => ServiceError::Forbidden,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidFile(msg) => ServiceError::validation(msg),
            StorageError::NotFound(path) => {
                tracing::warn!("Stored file missing on disk: {}", path);
                ServiceError::NotFound("File".to_string())
            },
            other => ServiceError::InternalError(other.to_string()),
        }
    }
}

impl From<JwtError> for ServiceError {
    fn from(error: JwtError) -> Self {
        match error {
            JwtError::TokenExpired | JwtError::InvalidToken => ServiceError::Unauthorized,
            other => ServiceError::InternalError(other.to_string()),
        }
    }
}

impl From<OAuthError> for ServiceError {
    fn from(error: OAuthError) -> Self {
        match error {
            OAuthError::InvalidState => ServiceError::BadRequest("Invalid OAuth state".to_string()),
            OAuthError::NotConfigured => {
                ServiceError::InternalError("Google OAuth is not configured".to_string())
            },
            other => ServiceError::UpstreamProviderError(other.to_string()),
        }
    }
}

impl From<EmailError> for ServiceError {
    fn from(error: EmailError) -> Self {
        ServiceError::InternalError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(error: ServiceError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_insufficient_tokens_response() {
        let (status, body) = body_json(ServiceError::InsufficientTokens {
            required: 6,
            current: 2,
        })
        .await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["status"], 402);
        assert_eq!(body["required"], 6);
        assert_eq!(body["current"], 2);
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let (status, body) =
            body_json(ServiceError::DatabaseError("relation users does not exist".into())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");

        let (status, body) =
            body_json(ServiceError::UpstreamProviderError("replicate 503".into())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Upstream provider error");
    }

    #[tokio::test]
    async fn test_generation_failed_message() {
        let (status, body) = body_json(ServiceError::GenerationFailed).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to generate headshot - token refunded");
    }

    #[test]
    fn test_ledger_error_mapping() {
        let err: ServiceError = LedgerError::InsufficientTokens {
            required: 1,
            current: 0,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);

        let err: ServiceError = LedgerError::InvalidAmount(0).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
