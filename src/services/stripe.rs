// Stripe Payment Provider
// Hosted checkout sessions over the form-encoded REST API and webhook signature checks

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::app_config::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook timestamp
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum StripeError {
    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Stripe API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for StripeError {
    fn from(err: reqwest::Error) -> Self {
        StripeError::Http(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub user_id: i32,
    pub tokens: i32,
    pub success_url: String,
    pub cancel_url: String,
}

/// The fields of a created checkout session the service needs
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, StripeError>;
}

#[derive(Clone)]
pub struct StripeClient {
    client: Arc<Client>,
    api_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Arc::new(Client::new()),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self, request), fields(user_id = request.user_id, price_id = %request.price_id))]
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, StripeError> {
        let user_id = request.user_id.to_string();
        let tokens = request.tokens.to_string();
        let form = [
            ("mode", "payment"),
            ("payment_method_types[0]", "card"),
            ("line_items[0][price]", request.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("success_url", request.success_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("metadata[userId]", user_id.as_str()),
            ("metadata[tokens]", tokens.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Checkout session creation failed. Status: {}, Error: {}", status, body);
            return Err(StripeError::Api(format!("status {}: {}", status, body)));
        }

        let session: CheckoutSession = response.json().await?;
        info!("Checkout session {} created", session.id);
        Ok(session)
    }
}

/// Verify a `Stripe-Signature` header (`t=...,v1=...`) against the raw body.
/// The expected signature is hex HMAC-SHA256 of `"{t}.{payload}"` keyed by the endpoint secret.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), StripeError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value),
                _ => {},
            }
        }
    }

    let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(StripeError::InvalidSignature);
    }

    // `t` is untrusted, so the age check must not overflow
    let age = now
        .checked_sub(timestamp)
        .map(i64::unsigned_abs)
        .ok_or(StripeError::TimestampOutOfTolerance)?;
    if age > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(StripeError::TimestampOutOfTolerance);
    }

    let expected = compute_signature(payload, timestamp, secret)?;

    let matched = signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(StripeError::InvalidSignature)
    }
}

/// Hex HMAC-SHA256 signature for a payload signed at `timestamp`
pub fn compute_signature(payload: &[u8], timestamp: i64, secret: &str) -> Result<String, StripeError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| StripeError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: JsonValue,
}

/// Minimal webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

impl StripeEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, StripeError> {
        serde_json::from_slice(payload).map_err(|e| StripeError::InvalidPayload(e.to_string()))
    }

    /// Checkout session id of a `checkout.session.*` event
    pub fn session_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(JsonValue::as_str)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(JsonValue::as_str)
    }
}
