// Authentication models
// Claims carried by the bearer tokens issued to mobile and API clients

use serde::{Deserialize, Serialize};

use crate::models::user::User;

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// User ID (subject)
    pub sub: String,

    /// User email address, empty when the account has none
    pub email: String,

    /// Issued at timestamp (Unix epoch seconds)
    pub iat: u64,

    /// Expires at timestamp (Unix epoch seconds)
    pub exp: u64,
}

/// Refresh token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub email: String,
    /// Unique per issued token so two refreshes in the same second differ
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }
}

impl RefreshTokenClaims {
    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }
}

/// Token pair returned by the mobile login and refresh endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_user_id_parsing() {
        let claims = AccessTokenClaims {
            sub: "42".to_string(),
            email: "user@example.com".to_string(),
            iat: 1640995200,
            exp: 1640998800,
        };
        assert_eq!(claims.user_id(), Some(42));

        let bad = AccessTokenClaims {
            sub: "not-a-number".to_string(),
            ..claims
        };
        assert_eq!(bad.user_id(), None);
    }
}
