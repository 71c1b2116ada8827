// Authentication Handlers
// Google sign-in for browsers (session cookie) and mobile clients (JWT pair)

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::MaybeUser,
    models::{auth::TokenResponse, user::User},
    services::{
        oauth::{generate_state, upsert_google_user, OAuthError, OAuthProfile},
        session::OAUTH_STATE_COOKIE,
    },
    utils::ServiceError,
};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MobileGoogleRequest {
    #[validate(length(min = 1, message = "Authorization code is required"))]
    pub code: String,
    #[validate(url(message = "Invalid redirect URI"))]
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

// =============================================================================
// BROWSER FLOW
// =============================================================================

/// Redirect to the Google consent screen
/// GET /auth/google
pub async fn google_login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ServiceError> {
    let oauth_state = generate_state();
    let url = state.oauth.authorization_url(&oauth_state)?;

    let jar = jar.add(state.sessions.state_cookie(oauth_state));
    Ok((jar, Redirect::to(&url)))
}

/// Google redirects back here; on success a session cookie is set
/// GET /auth/google/callback
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackParams>,
) -> Response {
    let client_url = state.config.server.client_url.trim_end_matches('/').to_string();
    let failure = format!("{}/login", client_url);
    let outcome = complete_browser_login(&state, &jar, params).await;
    let jar = jar.add(state.sessions.state_removal_cookie());

    match outcome {
        Ok(sid) => {
            let jar = jar.add(state.sessions.session_cookie(sid));
            (jar, Redirect::to(&format!("{}/", client_url))).into_response()
        },
        Err(e) => {
            warn!("Google login failed: {}", e);
            (jar, Redirect::to(&failure)).into_response()
        },
    }
}

async fn complete_browser_login(
    state: &AppState,
    jar: &CookieJar,
    params: OAuthCallbackParams,
) -> Result<String, ServiceError> {
    if let Some(err) = params.error {
        return Err(ServiceError::BadRequest(format!("Provider error: {}", err)));
    }

    let expected = jar
        .get(OAUTH_STATE_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(OAuthError::InvalidState)?;
    let received = params.state.ok_or(OAuthError::InvalidState)?;
    if !bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        return Err(OAuthError::InvalidState.into());
    }

    let code = params
        .code
        .ok_or_else(|| ServiceError::BadRequest("Missing authorization code".to_string()))?;

    let profile = state
        .oauth
        .exchange_code(&code, state.oauth.callback_url())
        .await?;
    let user = sign_in(state, &profile).await?;

    state.sessions.create(user.id).await
}

async fn sign_in(state: &AppState, profile: &OAuthProfile) -> Result<User, ServiceError> {
    let mut conn = state.diesel_pool.get().await?;
    let user = upsert_google_user(&mut conn, profile).await?;
    info!("User {} signed in with Google", user.id);
    Ok(user)
}

// =============================================================================
// MOBILE / API FLOW
// =============================================================================

/// Exchange a Google authorization code for a token pair
/// POST /api/auth/mobile/google
pub async fn mobile_google(
    State(state): State<AppState>,
    Json(request): Json<MobileGoogleRequest>,
) -> Result<Json<TokenResponse>, ServiceError> {
    request.validate()?;

    let profile = state
        .oauth
        .exchange_code(&request.code, &request.redirect_uri)
        .await?;
    let user = sign_in(&state, &profile).await?;
    let pair = state.jwt_service.issue_pair(&user)?;

    Ok(Json(TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user,
    }))
}

/// Re-issue both tokens from a valid refresh token
/// POST /api/auth/refresh
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ServiceError> {
    request.validate()?;

    let claims = state.jwt_service.validate_refresh_token(&request.refresh_token)?;
    let user_id = claims.user_id().ok_or(ServiceError::Unauthorized)?;

    let mut conn = state.diesel_pool.get().await?;
    let user = User::find_by_id(&mut conn, user_id)
        .await?
        .ok_or(ServiceError::Unauthorized)?;

    let pair = state.jwt_service.issue_pair(&user)?;
    Ok(Json(TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user,
    }))
}

// =============================================================================
// SESSION INFO
// =============================================================================

/// GET /api/auth/user
pub async fn current_user(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = match caller {
        Some(caller) => {
            let mut conn = state.diesel_pool.get().await?;
            User::find_by_id(&mut conn, caller.user_id).await?
        },
        None => None,
    };

    Ok(Json(json!({
        "isAuthenticated": user.is_some(),
        "user": user,
    })))
}

/// GET /api/auth/logout
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let sid = jar
        .get(state.sessions.cookie_name())
        .map(|c| c.value().to_string());

    if let Some(sid) = sid {
        if let Err(e) = state.sessions.destroy(&sid).await {
            error!("Logout error: {}", e);
            return e.into_response();
        }
    }

    let jar = jar.add(state.sessions.removal_cookie());
    (jar, Json(json!({ "message": "Logged out successfully" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mobile_request_validation() {
        let request: MobileGoogleRequest = serde_json::from_str(
            r#"{"code":"4/0Ab","redirectUri":"com.example.app:/oauth2redirect"}"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());

        let request = MobileGoogleRequest {
            code: String::new(),
            redirect_uri: "not a uri".to_string(),
        };
        assert!(request.validate().is_err());
    }
}
