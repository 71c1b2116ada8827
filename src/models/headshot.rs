// Headshot Database Model
// Deleting a headshot archives a structural copy into deleted_headshots first

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::schema::{deleted_headshots, headshots};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = headshots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Headshot {
    pub id: i32,
    pub user_id: i32,
    pub model_id: i32,
    pub style: String,
    pub file_path: Option<String>,
    pub image_url: String,
    pub replicate_prediction_id: String,
    pub prompt: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub favorite: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = headshots)]
pub struct NewHeadshot {
    pub user_id: i32,
    pub model_id: i32,
    pub style: String,
    pub image_url: String,
    pub replicate_prediction_id: String,
    pub prompt: Option<String>,
    pub metadata: JsonValue,
    pub favorite: bool,
}

/// Archived copy of a removed headshot; there is no restore path
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = deleted_headshots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct DeletedHeadshot {
    pub id: i32,
    pub user_id: i32,
    pub model_id: i32,
    pub style: String,
    pub file_path: Option<String>,
    pub image_url: String,
    pub replicate_prediction_id: String,
    pub prompt: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub favorite: bool,
    pub archived_at: DateTime<Utc>,
}

impl From<Headshot> for DeletedHeadshot {
    fn from(h: Headshot) -> Self {
        Self {
            id: h.id,
            user_id: h.user_id,
            model_id: h.model_id,
            style: h.style,
            file_path: h.file_path,
            image_url: h.image_url,
            replicate_prediction_id: h.replicate_prediction_id,
            prompt: h.prompt,
            metadata: h.metadata,
            created_at: h.created_at,
            favorite: h.favorite,
            archived_at: Utc::now(),
        }
    }
}

impl Headshot {
    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_headshot: NewHeadshot,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(headshots::table)
            .values(&new_headshot)
            .returning(Headshot::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
    ) -> Result<Option<Self>, diesel::result::Error> {
        headshots::table
            .find(headshot_id)
            .select(Headshot::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// A user's headshots, newest first, optionally capped
    pub async fn find_by_user(
        conn: &mut AsyncPgConnection,
        user_id: i32,
        limit: Option<i64>,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        let mut query = headshots::table
            .filter(headshots::user_id.eq(user_id))
            .order(headshots::created_at.desc())
            .select(Headshot::as_select())
            .into_boxed();

        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        query.load(conn).await
    }

    pub async fn set_file_path(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
        path: &str,
    ) -> Result<Self, diesel::result::Error> {
        diesel::update(headshots::table.find(headshot_id))
            .set(headshots::file_path.eq(Some(path)))
            .returning(Headshot::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn set_favorite(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
        favorite: bool,
    ) -> Result<Self, diesel::result::Error> {
        diesel::update(headshots::table.find(headshot_id))
            .set(headshots::favorite.eq(favorite))
            .returning(Headshot::as_returning())
            .get_result(conn)
            .await
    }

    /// Flip the flag in a single statement so concurrent toggles both apply
    pub async fn toggle_favorite(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
    ) -> Result<Self, diesel::result::Error> {
        diesel::update(headshots::table.find(headshot_id))
            .set(headshots::favorite.eq(diesel::dsl::not(headshots::favorite)))
            .returning(Headshot::as_returning())
            .get_result(conn)
            .await
    }

    /// Hard delete with no archive copy; used to discard a generation that never completed
    pub async fn delete(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
    ) -> Result<usize, diesel::result::Error> {
        diesel::delete(headshots::table.find(headshot_id))
            .execute(conn)
            .await
    }

    /// Copy the row into deleted_headshots and remove it, in one transaction.
    /// Returns None when the headshot no longer exists.
    pub async fn archive_and_delete(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
    ) -> Result<Option<DeletedHeadshot>, diesel::result::Error> {
        conn.transaction(|conn| {
            async move {
                let existing = headshots::table
                    .find(headshot_id)
                    .select(Headshot::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                let Some(headshot) = existing else {
                    return Ok(None);
                };

                let archived = diesel::insert_into(deleted_headshots::table)
                    .values(DeletedHeadshot::from(headshot))
                    .returning(DeletedHeadshot::as_returning())
                    .get_result(conn)
                    .await?;

                diesel::delete(headshots::table.find(headshot_id))
                    .execute(conn)
                    .await?;

                Ok(Some(archived))
            }
            .scope_boxed()
        })
        .await
    }
}

impl DeletedHeadshot {
    /// Point the archive row at the archived image, or clear it when the file could not be kept
    pub async fn set_file_path(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
        path: Option<&str>,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(deleted_headshots::table.find(headshot_id))
            .set(deleted_headshots::file_path.eq(path))
            .execute(conn)
            .await
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        headshot_id: i32,
    ) -> Result<Option<Self>, diesel::result::Error> {
        deleted_headshots::table
            .find(headshot_id)
            .select(DeletedHeadshot::as_select())
            .first(conn)
            .await
            .optional()
    }
}
