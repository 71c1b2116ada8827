// Token Ledger Service
// Sole writer of users.tokens. Every balance change is paired with exactly one
// token_transactions row inside the same database transaction.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::db::DieselPool;
use crate::models::token_transaction::{NewTokenTransaction, TokenTransaction, TransactionType};
use crate::models::user::User;
use crate::schema::users;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Token amount must be positive, got {0}")]
    InvalidAmount(i32),

    #[error("Insufficient tokens: required {required}, current {current}")]
    InsufficientTokens { required: i32, current: i32 },

    #[error("User {0} not found")]
    UserNotFound(i32),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Pool error: {0}")]
    Pool(String),
}

/// Describes the transaction row written alongside a balance change
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub kind: TransactionType,
    pub reference_id: Option<i32>,
    pub metadata: JsonValue,
}

impl LedgerEntry {
    pub fn new(kind: TransactionType) -> Self {
        Self {
            kind,
            reference_id: None,
            metadata: json!({}),
        }
    }

    pub fn reference(mut self, reference_id: i32) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A debit to apply before an operation and to reverse if it fails
#[derive(Debug, Clone)]
pub struct Charge {
    pub user_id: i32,
    pub amount: i32,
    pub entry: LedgerEntry,
}

/// Result of comparing the cached balance with the ledger history
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub balance: i32,
    pub ledger_sum: i64,
    pub consistent: bool,
}

#[derive(Clone)]
pub struct TokenLedger {
    pool: DieselPool,
}

impl TokenLedger {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }

    async fn connection(
        &self,
    ) -> Result<
        bb8::PooledConnection<
            '_,
            diesel_async::pooled_connection::AsyncDieselConnectionManager<AsyncPgConnection>,
        >,
        LedgerError,
    > {
        self.pool
            .get()
            .await
            .map_err(|e| LedgerError::Pool(e.to_string()))
    }

    /// Read-only admission gate. Returns the current balance when it covers `required`.
    pub async fn check_balance(&self, user_id: i32, required: i32) -> Result<i32, LedgerError> {
        let mut conn = self.connection().await?;
        let current = User::token_balance(&mut conn, user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        if current < required {
            return Err(LedgerError::InsufficientTokens { required, current });
        }

        Ok(current)
    }

    pub async fn balance(&self, user_id: i32) -> Result<i32, LedgerError> {
        let mut conn = self.connection().await?;
        User::token_balance(&mut conn, user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    /// Debit `amount` tokens in its own transaction; returns the new balance
    #[instrument(skip(self, entry), fields(kind = entry.kind.as_str()))]
    pub async fn deduct(
        &self,
        user_id: i32,
        amount: i32,
        entry: LedgerEntry,
    ) -> Result<i32, LedgerError> {
        let mut conn = self.connection().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            async move { Self::deduct_in(conn, user_id, amount, entry).await }.scope_boxed()
        })
        .await
    }

    /// Credit `amount` tokens in its own transaction; returns the new balance
    #[instrument(skip(self, entry), fields(kind = entry.kind.as_str()))]
    pub async fn add(&self, user_id: i32, amount: i32, entry: LedgerEntry) -> Result<i32, LedgerError> {
        let mut conn = self.connection().await?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            async move { Self::add_in(conn, user_id, amount, entry).await }.scope_boxed()
        })
        .await
    }

    /// Credit tokens back as a `refund` entry carrying the reason
    pub async fn refund(
        &self,
        user_id: i32,
        amount: i32,
        reference_id: Option<i32>,
        reason: &str,
    ) -> Result<i32, LedgerError> {
        self.add(user_id, amount, refund_entry(reference_id, reason))
            .await
    }

    /// Conditional debit on an open connection. The caller owns the transaction.
    /// Zero rows updated means the balance did not cover the amount; nothing is written.
    pub async fn deduct_in(
        conn: &mut AsyncPgConnection,
        user_id: i32,
        amount: i32,
        entry: LedgerEntry,
    ) -> Result<i32, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let updated: Option<i32> = diesel::update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::tokens.ge(amount)),
        )
        .set(users::tokens.eq(users::tokens - amount))
        .returning(users::tokens)
        .get_result(conn)
        .await
        .optional()?;

        let Some(new_balance) = updated else {
            let current = User::token_balance(conn, user_id)
                .await?
                .ok_or(LedgerError::UserNotFound(user_id))?;
            warn!(
                "Rejected debit of {} tokens for user {} (balance {})",
                amount, user_id, current
            );
            return Err(LedgerError::InsufficientTokens {
                required: amount,
                current,
            });
        };

        Self::record(conn, user_id, -amount, entry).await?;
        Ok(new_balance)
    }

    /// Credit on an open connection. The caller owns the transaction.
    pub async fn add_in(
        conn: &mut AsyncPgConnection,
        user_id: i32,
        amount: i32,
        entry: LedgerEntry,
    ) -> Result<i32, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let new_balance: i32 = diesel::update(users::table.filter(users::id.eq(user_id)))
            .set(users::tokens.eq(users::tokens + amount))
            .returning(users::tokens)
            .get_result(conn)
            .await
            .optional()?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        Self::record(conn, user_id, amount, entry).await?;
        Ok(new_balance)
    }

    /// Refund on an open connection
    pub async fn refund_in(
        conn: &mut AsyncPgConnection,
        user_id: i32,
        amount: i32,
        reference_id: Option<i32>,
        reason: &str,
    ) -> Result<i32, LedgerError> {
        Self::add_in(conn, user_id, amount, refund_entry(reference_id, reason)).await
    }

    async fn record(
        conn: &mut AsyncPgConnection,
        user_id: i32,
        delta: i32,
        entry: LedgerEntry,
    ) -> Result<(), LedgerError> {
        TokenTransaction::record(
            conn,
            NewTokenTransaction {
                user_id,
                kind: entry.kind.as_str().to_string(),
                reference_id: entry.reference_id,
                tokens_delta: delta,
                metadata: entry.metadata,
            },
        )
        .await?;
        Ok(())
    }

    /// Compare users.tokens with the sum of the user's transaction deltas
    pub async fn reconcile(&self, user_id: i32) -> Result<Reconciliation, LedgerError> {
        let mut conn = self.connection().await?;
        let balance = User::token_balance(&mut conn, user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;
        let ledger_sum = TokenTransaction::sum_for_user(&mut conn, user_id).await?;

        Ok(Reconciliation {
            balance,
            ledger_sum,
            consistent: i64::from(balance) == ledger_sum,
        })
    }

    /// Charge, attempt, refund on failure.
    ///
    /// Deducts the charge, runs `op`, and when `op` fails credits the same amount
    /// back as a `refund` carrying the failure reason. The operation's error is
    /// returned either way; a failed refund is logged, never surfaced.
    pub async fn with_charge<T, E, F, Fut>(&self, charge: Charge, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LedgerError> + std::fmt::Display,
    {
        let Charge {
            user_id,
            amount,
            entry,
        } = charge;
        let reference_id = entry.reference_id;

        self.deduct(user_id, amount, entry).await?;

        match op().await {
            Ok(value) => Ok(value),
            Err(err) => {
                let reason = err.to_string();
                match self.refund(user_id, amount, reference_id, &reason).await {
                    Ok(balance) => info!(
                        "Refunded {} tokens to user {} after failure (balance {})",
                        amount, user_id, balance
                    ),
                    Err(refund_err) => error!(
                        "Failed to refund {} tokens to user {}: {}",
                        amount, user_id, refund_err
                    ),
                }
                Err(err)
            },
        }
    }
}

fn refund_entry(reference_id: Option<i32>, reason: &str) -> LedgerEntry {
    LedgerEntry {
        kind: TransactionType::Refund,
        reference_id,
        metadata: json!({ "reason": reason }),
    }
}
