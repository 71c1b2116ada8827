// Google OAuth Service
// Authorization URL, code exchange and userinfo lookup over reqwest

use async_trait::async_trait;
use diesel_async::AsyncPgConnection;
use rand::RngCore;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::app_config::GoogleConfig;
use crate::models::user::{NewUser, User, UserProfileUpdate};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("OAuth provider not configured")]
    NotConfigured,

    #[error("OAuth state mismatch")]
    InvalidState,

    #[error("Code exchange failed: {0}")]
    Exchange(String),

    #[error("Userinfo request failed: {0}")]
    UserInfo(String),
}

impl From<reqwest::Error> for OAuthError {
    fn from(err: reqwest::Error) -> Self {
        OAuthError::Exchange(err.to_string())
    }
}

/// Identity returned by the provider
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OAuthProfile {
    #[serde(rename = "sub")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Consent screen URL carrying `state`
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError>;

    /// Callback URL registered with the provider
    fn callback_url(&self) -> &str;

    /// Exchange an authorization code and return the user's profile
    async fn exchange_code(&self, code: &str, redirect_uri: &str)
        -> Result<OAuthProfile, OAuthError>;
}

#[derive(Clone)]
pub struct GoogleOAuth {
    client: Arc<Client>,
    config: GoogleConfig,
}

impl GoogleOAuth {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            client: Arc::new(Client::new()),
            config,
        }
    }

    fn ensure_configured(&self) -> Result<(), OAuthError> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(OAuthError::NotConfigured);
        }
        Ok(())
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        self.ensure_configured()?;

        let url = url::Url::parse_with_params(
            GOOGLE_AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid profile email"),
                ("state", state),
            ],
        )
        .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        Ok(url.to_string())
    }

    fn callback_url(&self) -> &str {
        &self.config.callback_url
    }

    #[instrument(skip(self, code))]
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthProfile, OAuthError> {
        self.ensure_configured()?;

        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Exchange(format!("status {}: {}", status, body)));
        }

        let tokens: TokenResponse = response.json().await?;

        let response = self
            .client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&tokens.access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::UserInfo(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::UserInfo(format!("status {}", response.status())));
        }

        response
            .json::<OAuthProfile>()
            .await
            .map_err(|e| OAuthError::UserInfo(e.to_string()))
    }
}

/// Random hex value for the OAuth `state` parameter
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Existing accounts get their profile refreshed; new identities get an account
pub async fn upsert_google_user(
    conn: &mut AsyncPgConnection,
    profile: &OAuthProfile,
) -> Result<User, diesel::result::Error> {
    if let Some(existing) = User::find_by_google_id(conn, &profile.id).await? {
        // An empty changeset is an error in diesel
        if profile.name.is_none() && profile.picture.is_none() {
            return Ok(existing);
        }
        return User::update_profile(
            conn,
            existing.id,
            UserProfileUpdate {
                display_name: profile.name.clone(),
                profile_picture: profile.picture.clone(),
            },
        )
        .await;
    }

    let user = User::create(
        conn,
        NewUser::from_google(
            &profile.id,
            profile.email.clone(),
            profile.name.clone(),
            profile.picture.clone(),
        ),
    )
    .await?;
    info!("Created user {} ({}) from Google login", user.id, user.username);
    Ok(user)
}
