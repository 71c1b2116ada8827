use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::uploaded_photos;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = uploaded_photos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    pub id: i32,
    pub user_id: i32,
    pub filename: String,
    pub file_size: i32,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = uploaded_photos)]
pub struct NewUploadedPhoto {
    pub user_id: i32,
    pub filename: String,
    pub file_size: i32,
    pub path: String,
}

impl UploadedPhoto {
    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_photo: NewUploadedPhoto,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(uploaded_photos::table)
            .values(&new_photo)
            .returning(UploadedPhoto::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        photo_id: i32,
    ) -> Result<Option<Self>, diesel::result::Error> {
        uploaded_photos::table
            .find(photo_id)
            .select(UploadedPhoto::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// All photos of a user, newest first
    pub async fn find_by_user(
        conn: &mut AsyncPgConnection,
        user_id: i32,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        uploaded_photos::table
            .filter(uploaded_photos::user_id.eq(user_id))
            .order(uploaded_photos::uploaded_at.desc())
            .select(UploadedPhoto::as_select())
            .load(conn)
            .await
    }

    /// Subset of `photo_ids` that belongs to `user_id`
    pub async fn find_owned(
        conn: &mut AsyncPgConnection,
        user_id: i32,
        photo_ids: &[i32],
    ) -> Result<Vec<Self>, diesel::result::Error> {
        uploaded_photos::table
            .filter(uploaded_photos::user_id.eq(user_id))
            .filter(uploaded_photos::id.eq_any(photo_ids))
            .select(UploadedPhoto::as_select())
            .load(conn)
            .await
    }

    pub async fn delete(
        conn: &mut AsyncPgConnection,
        photo_id: i32,
    ) -> Result<usize, diesel::result::Error> {
        diesel::delete(uploaded_photos::table.find(photo_id))
            .execute(conn)
            .await
    }
}
