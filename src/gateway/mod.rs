//! Payment gateway port.
//!
//! Everything that speaks a gateway's vocabulary lives under this module.
//! The rest of the crate talks to [`PaymentGateway`] through
//! `services::payment_service`.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GatewayKind, PaymentConfig};

pub mod memory;
pub mod stripe;
pub mod webhook;

pub use memory::InMemoryGateway;
pub use stripe::StripeGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),

    #[error("gateway has no record of {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: String,
    pub name: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentIntent {
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub customer_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    pub client_secret: Option<String>,
    pub customer: Option<String>,
    pub latest_charge: Option<String>,
    /// Set by the gateway when the most recent charge attempt was declined.
    #[serde(default)]
    pub last_payment_error: Option<PaymentAttemptError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentAttemptError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl PaymentAttemptError {
    pub fn reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.code.clone())
            .unwrap_or_else(|| "payment declined".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub payment_intent_id: String,
    /// `None` refunds whatever remains on the intent.
    pub amount: Option<i64>,
    pub idempotency_key: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    pub status: RefundStatus,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short name stored on payment rows.
    fn name(&self) -> &'static str;

    async fn create_customer(&self, request: NewCustomer) -> Result<GatewayCustomer, GatewayError>;

    async fn create_payment_intent(
        &self,
        request: NewPaymentIntent,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn create_refund(&self, request: NewRefund) -> Result<Refund, GatewayError>;
}

/// Build the gateway selected in configuration.
pub fn build_gateway(config: &PaymentConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match config.gateway {
        GatewayKind::Stripe => {
            let secret_key = config
                .stripe_secret_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("STRIPE_SECRET_KEY is not set"))?;
            let gateway = StripeGateway::new(
                secret_key,
                config.stripe_api_version.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Arc::new(gateway))
        }
        GatewayKind::Memory => {
            tracing::warn!("using the in-memory sandbox payment gateway");
            Ok(Arc::new(InMemoryGateway::new()))
        }
    }
}
