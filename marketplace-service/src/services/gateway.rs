//! Payment gateway boundary.
//!
//! The engine only ever sees the `PaymentGateway` trait: create an intent,
//! get back an intent id and a client secret. Success/failure arrives later
//! through the webhook-driven `confirm_success`/`confirm_failure` calls, so
//! nothing here touches the ledger.

use crate::error::EngineError;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

/// Intent creation request. Amounts are integer minor units (cents).
#[derive(Debug, Clone)]
pub struct CreateIntent {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: serde_json::Value,
}

/// A created payment intent.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    /// Gateway-side id; stored as the payment's `transaction_id`.
    pub intent_id: String,
    /// Handed to the buyer's client to complete the charge.
    pub client_secret: String,
}

/// Opaque payment gateway capability.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, EngineError>;
}

/// Convert a decimal major-unit amount to integer minor units, rounding
/// half-up so the charged amount and the stored breakdown never drift by a
/// cent.
pub fn to_minor_units(amount: Decimal) -> Result<i64, EngineError> {
    let minor = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    minor
        .to_i64()
        .ok_or(EngineError::InvalidAmount { amount })
}

/// Stripe client implementing the gateway trait.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: Secret<String>,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl StripeGateway {
    pub fn new(secret_key: Secret<String>, api_base: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            api_base,
        }
    }

    /// Check if Stripe is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.secret_key.expose_secret().is_empty()
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, EngineError> {
        let url = format!("{}/v1/payment_intents", self.api_base);

        let mut params = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("payment_method_types[]".to_string(), "card".to_string()),
        ];
        if let Some(metadata) = request.metadata.as_object() {
            for (key, value) in metadata {
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                params.push((format!("metadata[{}]", key), value));
            }
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None)
            .form(&params)
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("intent request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message.or(b.error.kind))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(EngineError::Gateway(format!(
                "intent rejected ({}): {}",
                status, detail
            )));
        }

        let intent: StripeIntent = response
            .json()
            .await
            .map_err(|e| EngineError::Gateway(format!("malformed intent response: {}", e)))?;

        Ok(PaymentIntent {
            intent_id: intent.id,
            client_secret: intent.client_secret,
        })
    }
}
