// Browser Session Service
// Server-side sessions in the `session` table referenced by an HttpOnly cookie

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;
use rand::RngCore;
use serde_json::json;
use tracing::debug;

use crate::app_config::SessionConfig;
use crate::db::DieselPool;
use crate::models::session::SessionRecord;
use crate::utils::ServiceError;

pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

#[derive(Clone)]
pub struct SessionService {
    pool: DieselPool,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(pool: DieselPool, config: SessionConfig) -> Self {
        Self { pool, config }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Create a session for `user_id` and return its id
    pub async fn create(&self, user_id: i32) -> Result<String, ServiceError> {
        let mut conn = self.pool.get().await?;
        let sid = generate_session_id();
        let record = SessionRecord {
            sid: sid.clone(),
            sess: json!({ "userId": user_id }),
            expire: Utc::now() + chrono::Duration::days(self.config.ttl_days),
        };
        SessionRecord::insert(&mut conn, &record).await?;
        debug!("Created session for user {}", user_id);
        Ok(sid)
    }

    /// User id of an unexpired session
    pub async fn resolve(&self, sid: &str) -> Result<Option<i32>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let record = SessionRecord::find_active(&mut conn, sid).await?;
        Ok(record.and_then(|r| r.data()).map(|d| d.user_id))
    }

    pub async fn destroy(&self, sid: &str) -> Result<(), ServiceError> {
        let mut conn = self.pool.get().await?;
        SessionRecord::delete(&mut conn, sid).await?;
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<usize, ServiceError> {
        let mut conn = self.pool.get().await?;
        Ok(SessionRecord::purge_expired(&mut conn).await?)
    }

    pub fn session_cookie(&self, sid: String) -> Cookie<'static> {
        Cookie::build((self.config.cookie_name.clone(), sid))
            .path("/")
            .http_only(true)
            .secure(self.config.secure_cookie)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::days(self.config.ttl_days))
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.config.cookie_name.clone(), ""))
            .path("/")
            .http_only(true)
            .max_age(time::Duration::ZERO)
            .build()
    }

    /// Short-lived cookie holding the OAuth `state` until the callback
    pub fn state_cookie(&self, state: String) -> Cookie<'static> {
        Cookie::build((OAUTH_STATE_COOKIE, state))
            .path("/")
            .http_only(true)
            .secure(self.config.secure_cookie)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::minutes(10))
            .build()
    }

    pub fn state_removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((OAUTH_STATE_COOKIE, ""))
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
