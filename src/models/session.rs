// Browser session rows
// `sess` holds `{"userId": <id>}`; expired rows are purged by a background task

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::schema::session;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = session)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SessionRecord {
    pub sid: String,
    pub sess: JsonValue,
    pub expire: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user_id: i32,
}

impl SessionRecord {
    pub fn data(&self) -> Option<SessionData> {
        serde_json::from_value(self.sess.clone()).ok()
    }

    pub async fn insert(
        conn: &mut AsyncPgConnection,
        record: &SessionRecord,
    ) -> Result<usize, diesel::result::Error> {
        diesel::insert_into(session::table)
            .values(record)
            .execute(conn)
            .await
    }

    /// Unexpired session by id
    pub async fn find_active(
        conn: &mut AsyncPgConnection,
        sid: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        session::table
            .filter(session::sid.eq(sid))
            .filter(session::expire.gt(Utc::now()))
            .select(SessionRecord::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn delete(
        conn: &mut AsyncPgConnection,
        sid: &str,
    ) -> Result<usize, diesel::result::Error> {
        diesel::delete(session::table.filter(session::sid.eq(sid)))
            .execute(conn)
            .await
    }

    pub async fn purge_expired(
        conn: &mut AsyncPgConnection,
    ) -> Result<usize, diesel::result::Error> {
        diesel::delete(session::table.filter(session::expire.le(Utc::now())))
            .execute(conn)
            .await
    }
}
