use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::schema::payments;

/// Token purchase through a hosted checkout session
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i32,
    pub user_id: i32,
    pub stripe_payment_id: String, // Checkout session id
    pub amount: i32,               // Amount in cents (e.g., 1000 for $10.00)
    pub currency: String,
    pub status: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
pub struct NewPayment {
    pub user_id: i32,
    pub stripe_payment_id: String,
    pub amount: i32,
    pub currency: String,
    pub status: String,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            "expired" => Some(PaymentStatus::Expired),
            _ => None,
        }
    }
}

impl Payment {
    pub fn status(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_string(&self.status)
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_payment: NewPayment,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(payments::table)
            .values(&new_payment)
            .returning(Payment::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn find_by_session_id(
        conn: &mut AsyncPgConnection,
        session_id: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        payments::table
            .filter(payments::stripe_payment_id.eq(session_id))
            .select(Payment::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Same lookup taking a row lock; must run inside a transaction
    pub async fn lock_by_session_id(
        conn: &mut AsyncPgConnection,
        session_id: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        payments::table
            .filter(payments::stripe_payment_id.eq(session_id))
            .select(Payment::as_select())
            .for_update()
            .first(conn)
            .await
            .optional()
    }

    pub async fn set_status(
        conn: &mut AsyncPgConnection,
        payment_id: i32,
        status: PaymentStatus,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(payments::table.find(payment_id))
            .set((
                payments::status.eq(status.as_str()),
                payments::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await
    }

    /// Move a pending payment to expired; other states are left untouched
    pub async fn expire_if_pending(
        conn: &mut AsyncPgConnection,
        session_id: &str,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(
            payments::table
                .filter(payments::stripe_payment_id.eq(session_id))
                .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            payments::status.eq(PaymentStatus::Expired.as_str()),
            payments::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await
    }

    /// Expire every pending payment created before `cutoff`
    pub async fn expire_stale_pending(
        conn: &mut AsyncPgConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(
            payments::table
                .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
                .filter(payments::created_at.lt(cutoff)),
        )
        .set((
            payments::status.eq(PaymentStatus::Expired.as_str()),
            payments::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await
    }
}
