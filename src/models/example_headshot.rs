use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::example_headshots;

/// Public gallery entry
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = example_headshots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct ExampleHeadshot {
    pub id: i32,
    pub style: String,
    pub file_path: String,
    pub image_url: String,
    pub prompt: Option<String>,
    pub headshot_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl ExampleHeadshot {
    pub async fn list(
        conn: &mut AsyncPgConnection,
        style: Option<&str>,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        let mut query = example_headshots::table
            .order(example_headshots::created_at.desc())
            .select(ExampleHeadshot::as_select())
            .into_boxed();

        if let Some(style) = style {
            query = query.filter(example_headshots::style.eq(style.to_string()));
        }

        query.load(conn).await
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        example_id: i32,
    ) -> Result<Option<Self>, diesel::result::Error> {
        example_headshots::table
            .find(example_id)
            .select(ExampleHeadshot::as_select())
            .first(conn)
            .await
            .optional()
    }
}
