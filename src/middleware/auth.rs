// Authenticated caller resolved from a bearer JWT or a browser session

use serde::{Deserialize, Serialize};

/// Caller identity injected into request extensions by `auth_middleware`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user_id: i32,
    pub email: Option<String>,
}

/// Optional caller for routes that behave differently when signed in
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);
