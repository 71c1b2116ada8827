// Payment Service
// Token purchases: hosted checkout sessions in, signed webhooks crediting the ledger out

use chrono::Utc;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::app_config::AppConfig;
use crate::config::{Catalog, PricePackage};
use crate::db::DieselPool;
use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::token_transaction::TransactionType;
use crate::services::ledger::{LedgerEntry, TokenLedger};
use crate::services::stripe::{
    verify_signature, CheckoutRequest, PaymentProvider, StripeError, StripeEvent,
};
use crate::utils::ServiceError;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Price ID is required"))]
    pub price_id: String,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub client_url: String,
    pub webhook_secret: String,
    pub payment_expiry_hours: i64,
}

impl PaymentSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            client_url: config.server.client_url.trim_end_matches('/').to_string(),
            webhook_secret: config.stripe.webhook_secret.clone(),
            payment_expiry_hours: config.stripe.payment_expiry_hours,
        }
    }
}

/// What a webhook delivery did
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Credited { user_id: i32, tokens: i32 },
    AlreadyProcessed,
    Expired,
    Ignored,
}

#[derive(Clone)]
pub struct PaymentService {
    pool: DieselPool,
    ledger: TokenLedger,
    provider: Arc<dyn PaymentProvider>,
    catalog: Arc<Catalog>,
    settings: PaymentSettings,
}

impl PaymentService {
    pub fn new(
        pool: DieselPool,
        provider: Arc<dyn PaymentProvider>,
        catalog: Arc<Catalog>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            ledger: TokenLedger::new(pool.clone()),
            pool,
            provider,
            catalog,
            settings,
        }
    }

    pub fn packages(&self) -> &[PricePackage] {
        self.catalog.prices.packages()
    }

    pub async fn balance(&self, user_id: i32) -> Result<i32, ServiceError> {
        Ok(self.ledger.balance(user_id).await?)
    }

    /// Open a hosted checkout and record it as a pending payment; returns the checkout URL
    #[instrument(skip(self))]
    pub async fn create_checkout(&self, user_id: i32, price_id: &str) -> Result<String, ServiceError> {
        let package = self
            .catalog
            .prices
            .find(price_id)
            .ok_or_else(|| ServiceError::BadRequest("Invalid price ID".to_string()))?;

        let session = self
            .provider
            .create_checkout_session(CheckoutRequest {
                price_id: package.price_id.clone(),
                user_id,
                tokens: package.tokens,
                success_url: format!(
                    "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}",
                    self.settings.client_url
                ),
                cancel_url: format!("{}/payment/cancel", self.settings.client_url),
            })
            .await?;

        let amount = session
            .amount_total
            .and_then(|a| i32::try_from(a).ok())
            .unwrap_or(package.amount);

        let mut conn = self.pool.get().await?;
        Payment::create(
            &mut conn,
            NewPayment {
                user_id,
                stripe_payment_id: session.id.clone(),
                amount,
                currency: session.currency.clone().unwrap_or_else(|| "usd".to_string()),
                status: PaymentStatus::Pending.as_str().to_string(),
                metadata: json!({
                    "tokens": package.tokens,
                    "priceId": package.price_id,
                    "sessionId": session.id,
                }),
            },
        )
        .await?;

        session
            .url
            .ok_or_else(|| ServiceError::UpstreamProviderError("Checkout session has no URL".to_string()))
    }

    /// Verify and apply a provider webhook delivery
    #[instrument(skip(self, payload, signature))]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let signature = signature.ok_or(StripeError::MissingSignature)?;
        verify_signature(
            payload,
            signature,
            &self.settings.webhook_secret,
            Utc::now().timestamp(),
        )?;

        let event = StripeEvent::parse(payload)?;
        info!("Received payment event {}", event.event_type);

        match event.event_type.as_str() {
            "checkout.session.completed" => self.complete_checkout(&event).await,
            "checkout.session.expired" => {
                let Some(session_id) = event.session_id() else {
                    return Err(ServiceError::BadRequest("Missing session id".to_string()));
                };
                let mut conn = self.pool.get().await?;
                let changed = Payment::expire_if_pending(&mut conn, session_id).await?;
                if changed == 0 {
                    warn!("Expired event for unknown or settled session {}", session_id);
                }
                Ok(WebhookOutcome::Expired)
            },
            _ => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn complete_checkout(&self, event: &StripeEvent) -> Result<WebhookOutcome, ServiceError> {
        let user_id = positive_int(event.metadata_str("userId"))
            .ok_or_else(|| ServiceError::BadRequest("Invalid metadata".to_string()))?;
        let tokens = positive_int(event.metadata_str("tokens"))
            .ok_or_else(|| ServiceError::BadRequest("Invalid metadata".to_string()))?;
        let session_id = event
            .session_id()
            .ok_or_else(|| ServiceError::BadRequest("Missing session id".to_string()))?
            .to_string();

        let mut conn = self.pool.get().await?;
        conn.transaction::<_, ServiceError, _>(|conn| {
            async move {
                let payment = Payment::lock_by_session_id(conn, &session_id)
                    .await?
                    .ok_or_else(|| ServiceError::BadRequest("Payment not found".to_string()))?;

                if payment.status() == Some(PaymentStatus::Succeeded) {
                    info!("Payment {} already credited", payment.id);
                    return Ok(WebhookOutcome::AlreadyProcessed);
                }

                TokenLedger::add_in(
                    conn,
                    user_id,
                    tokens,
                    LedgerEntry::new(TransactionType::Purchase)
                        .reference(payment.id)
                        .metadata(json!({ "stripeSessionId": session_id })),
                )
                .await?;
                Payment::set_status(conn, payment.id, PaymentStatus::Succeeded).await?;

                info!("Credited {} tokens to user {} for payment {}", tokens, user_id, payment.id);
                Ok(WebhookOutcome::Credited { user_id, tokens })
            }
            .scope_boxed()
        })
        .await
    }

    /// Expire pending payments older than the configured age
    pub async fn expire_stale(&self) -> Result<usize, ServiceError> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.settings.payment_expiry_hours);
        let mut conn = self.pool.get().await?;
        let expired = Payment::expire_stale_pending(&mut conn, cutoff).await?;
        if expired > 0 {
            info!("Expired {} stale pending payments", expired);
        }
        Ok(expired)
    }
}

fn positive_int(value: Option<&str>) -> Option<i32> {
    value
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|n| *n > 0)
}
