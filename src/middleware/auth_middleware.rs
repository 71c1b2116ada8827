// Authentication middleware for protected routes
// Tries a bearer JWT first, then the session cookie, and injects AuthenticatedUser

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use crate::{
    app::AppState,
    middleware::auth::{AuthenticatedUser, MaybeUser},
    models::user::User,
    utils::ServiceError,
};

/// Resolve the caller from request headers; Ok(None) when no credential is valid
pub async fn resolve_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<AuthenticatedUser>, ServiceError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    if let Some(token) = bearer {
        match state.jwt_service.validate_access_token(token) {
            Ok(claims) => {
                if let Some(user_id) = claims.user_id() {
                    return Ok(Some(AuthenticatedUser {
                        user_id,
                        email: Some(claims.email).filter(|e| !e.is_empty()),
                    }));
                }
                warn!("JWT subject is not a user id");
            },
            Err(e) => debug!("JWT validation failed, falling back to session: {}", e),
        }
    }

    let jar = CookieJar::from_headers(headers);
    let Some(sid) = jar.get(state.sessions.cookie_name()).map(|c| c.value().to_string()) else {
        return Ok(None);
    };

    let Some(user_id) = state.sessions.resolve(&sid).await? else {
        return Ok(None);
    };

    let mut conn = state.diesel_pool.get().await?;
    Ok(User::find_by_id(&mut conn, user_id)
        .await?
        .map(|user| AuthenticatedUser {
            user_id: user.id,
            email: user.email,
        }))
}

/// Middleware function that rejects unauthenticated requests with 401
pub async fn auth_middleware(
    State(app_state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match resolve_user(&app_state, request.headers()).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        },
        Ok(None) => ServiceError::Unauthorized.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Handlers behind `auth_middleware` take AuthenticatedUser as a parameter
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }
        resolve_user(state, &parts.headers)
            .await?
            .ok_or(ServiceError::Unauthorized)
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(MaybeUser(Some(user.clone())));
        }
        Ok(MaybeUser(resolve_user(state, &parts.headers).await?))
    }
}
