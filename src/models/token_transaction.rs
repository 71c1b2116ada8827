use chrono::{DateTime, Utc};
use diesel::dsl::sum;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::schema::token_transactions;

/// Kind of balance movement recorded in the ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    TrainModel,
    GenerateHeadshot,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::TrainModel => "train_model",
            TransactionType::GenerateHeadshot => "generate_headshot",
            TransactionType::Refund => "refund",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(TransactionType::Purchase),
            "train_model" => Some(TransactionType::TrainModel),
            "generate_headshot" => Some(TransactionType::GenerateHeadshot),
            "refund" => Some(TransactionType::Refund),
            _ => None,
        }
    }
}

/// Append-only ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = token_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct TokenTransaction {
    pub id: i32,
    pub user_id: i32,
    #[serde(rename = "type")]
    pub kind: String,
    pub reference_id: Option<i32>,
    pub tokens_delta: i32,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = token_transactions)]
pub struct NewTokenTransaction {
    pub user_id: i32,
    pub kind: String,
    pub reference_id: Option<i32>,
    pub tokens_delta: i32,
    pub metadata: JsonValue,
}

impl TokenTransaction {
    pub async fn record(
        conn: &mut AsyncPgConnection,
        entry: NewTokenTransaction,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(token_transactions::table)
            .values(&entry)
            .returning(TokenTransaction::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn find_by_user(
        conn: &mut AsyncPgConnection,
        user_id: i32,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        token_transactions::table
            .filter(token_transactions::user_id.eq(user_id))
            .order((
                token_transactions::created_at.asc(),
                token_transactions::id.asc(),
            ))
            .select(TokenTransaction::as_select())
            .load(conn)
            .await
    }

    /// Sum of all deltas for a user; zero when there are none
    pub async fn sum_for_user(
        conn: &mut AsyncPgConnection,
        user_id: i32,
    ) -> Result<i64, diesel::result::Error> {
        let total: Option<i64> = token_transactions::table
            .filter(token_transactions::user_id.eq(user_id))
            .select(sum(token_transactions::tokens_delta))
            .first(conn)
            .await?;

        Ok(total.unwrap_or(0))
    }
}
