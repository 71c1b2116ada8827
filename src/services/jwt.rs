// JWT Token Service
// HS256 access/refresh tokens for mobile and API clients

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{AccessTokenClaims, RefreshTokenClaims};
use crate::models::user::User;

// Error types for JWT operations
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    EncodingError(String),

    #[error("Clock error: {0}")]
    ClockError(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::TokenExpired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => JwtError::InvalidToken,
            _ => JwtError::EncodingError(err.to_string()),
        }
    }
}

// JWT Configuration with separate keys for access and refresh tokens
#[derive(Clone)]
pub struct JwtConfig {
    pub access_token_expiry: u64,
    pub refresh_token_expiry: u64,
    pub algorithm: Algorithm,

    pub access_encoding_key: EncodingKey,
    pub access_decoding_key: DecodingKey,

    pub refresh_encoding_key: EncodingKey,
    pub refresh_decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("algorithm", &self.algorithm)
            .field("access_encoding_key", &"<redacted>")
            .field("access_decoding_key", &"<redacted>")
            .field("refresh_encoding_key", &"<redacted>")
            .field("refresh_decoding_key", &"<redacted>")
            .finish()
    }
}

impl JwtConfig {
    /// Build JWT config from provided parameters - shared logic for from_app_config and for_test
    fn build_from_params(
        access_secret: &str,
        refresh_secret: &str,
        access_expiry: u64,
        refresh_expiry: u64,
    ) -> Self {
        JwtConfig {
            access_token_expiry: access_expiry,
            refresh_token_expiry: refresh_expiry,
            algorithm: Algorithm::HS256,
            access_encoding_key: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding_key: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding_key: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding_key: DecodingKey::from_secret(refresh_secret.as_bytes()),
        }
    }

    pub fn from_app_config(config: &crate::app_config::JwtConfig) -> Self {
        let crate::app_config::JwtConfig {
            access_secret,
            refresh_secret,
            access_expiry,
            refresh_expiry,
        } = config;

        Self::build_from_params(access_secret, refresh_secret, *access_expiry, *refresh_expiry)
    }

    /// JWT config for tests with fixed secrets
    pub fn for_test() -> Self {
        Self::build_from_params(
            "test-access-secret-hs256-0123456789",
            "test-refresh-secret-hs256-0123456789",
            3600,   // 1 hour
            604800, // 7 days
        )
    }
}

/// Access and refresh token issued together
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    fn now() -> Result<u64, JwtError> {
        Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| JwtError::ClockError(e.to_string()))?
            .as_secs())
    }

    pub fn generate_access_token(&self, user_id: i32, email: &str) -> Result<String, JwtError> {
        let now = Self::now()?;
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + self.config.access_token_expiry,
        };

        encode(
            &Header::new(self.config.algorithm),
            &claims,
            &self.config.access_encoding_key,
        )
        .map_err(Into::into)
    }

    pub fn generate_refresh_token(&self, user_id: i32, email: &str) -> Result<String, JwtError> {
        let now = Self::now()?;
        let claims = RefreshTokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.refresh_token_expiry,
        };

        encode(
            &Header::new(self.config.algorithm),
            &claims,
            &self.config.refresh_encoding_key,
        )
        .map_err(Into::into)
    }

    /// Issue both tokens for a user
    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, JwtError> {
        let email = user.email.as_deref().unwrap_or_default();
        Ok(TokenPair {
            access_token: self.generate_access_token(user.id, email)?,
            refresh_token: self.generate_refresh_token(user.id, email)?,
        })
    }

    /// Validates an access token and returns the decoded claims
    ///
    /// # Errors
    /// * `JwtError::TokenExpired` - Token has expired (no leeway)
    /// * `JwtError::InvalidToken` - Signature or format is wrong
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        let token_data =
            decode::<AccessTokenClaims>(token, &self.config.access_decoding_key, &self.validation())?;
        Ok(token_data.claims)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, JwtError> {
        let token_data = decode::<RefreshTokenClaims>(
            token,
            &self.config.refresh_decoding_key,
            &self.validation(),
        )?;
        Ok(token_data.claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.config.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new(JwtConfig::for_test())
    }

    #[test]
    fn test_access_token_round_trip() {
        let service = service();
        let token = service.generate_access_token(42, "test@example.com").unwrap();

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_refresh_token_rejected_as_access_token() {
        let service = service();
        let refresh = service.generate_refresh_token(42, "test@example.com").unwrap();

        assert!(matches!(
            service.validate_access_token(&refresh),
            Err(JwtError::InvalidToken)
        ));
        assert!(service.validate_refresh_token(&refresh).is_ok());
    }

    #[test]
    fn test_refresh_tokens_are_unique() {
        let service = service();
        let a = service.generate_refresh_token(1, "").unwrap();
        let b = service.generate_refresh_token(1, "").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = JwtConfig::for_test();
        let claims = AccessTokenClaims {
            sub: "1".to_string(),
            email: String::new(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &config.access_encoding_key,
        )
        .unwrap();

        assert!(matches!(
            JwtService::new(config).validate_access_token(&token),
            Err(JwtError::TokenExpired)
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            service().validate_access_token("not.a.jwt"),
            Err(JwtError::InvalidToken)
        ));
    }
}
