// User Database Model
// Accounts are created on first Google login; `tokens` is written only by the ledger

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::users;

/// User model matching the database schema
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub google_id: Option<String>,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tokens: i32,
}

/// New user for insertion
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub google_id: Option<String>,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
}

/// Profile fields refreshed on every login
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserProfileUpdate {
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
}

impl NewUser {
    /// Build a first-login account from a Google identity
    pub fn from_google(
        google_id: &str,
        email: Option<String>,
        display_name: Option<String>,
        profile_picture: Option<String>,
    ) -> Self {
        Self {
            username: username_for_google_id(google_id),
            email,
            google_id: Some(google_id.to_string()),
            display_name,
            profile_picture,
        }
    }
}

/// `user_` followed by the first eight characters of the Google subject id
pub fn username_for_google_id(google_id: &str) -> String {
    let prefix: String = google_id.chars().take(8).collect();
    format!("user_{}", prefix)
}

impl User {
    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        user_id: i32,
    ) -> Result<Option<Self>, diesel::result::Error> {
        users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn find_by_google_id(
        conn: &mut AsyncPgConnection,
        google_id: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        users::table
            .filter(users::google_id.eq(google_id))
            .select(User::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_user: NewUser,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn update_profile(
        conn: &mut AsyncPgConnection,
        user_id: i32,
        update: UserProfileUpdate,
    ) -> Result<Self, diesel::result::Error> {
        diesel::update(users::table.find(user_id))
            .set(&update)
            .returning(User::as_returning())
            .get_result(conn)
            .await
    }

    /// Current token balance, None when the user does not exist
    pub async fn token_balance(
        conn: &mut AsyncPgConnection,
        user_id: i32,
    ) -> Result<Option<i32>, diesel::result::Error> {
        users::table
            .find(user_id)
            .select(users::tokens)
            .first(conn)
            .await
            .optional()
    }
}
