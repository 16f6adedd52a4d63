use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::instrument;

use super::{
    GatewayCustomer, GatewayError, NewCustomer, NewPaymentIntent, NewRefund, PaymentGateway,
    PaymentIntent, Refund,
};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

/// Stripe REST client covering the four calls checkout needs.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_version: String,
    base_url: String,
}

impl fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_version", &self.api_version)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StripeGateway {
    pub fn new(
        secret_key: String,
        api_version: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            secret_key,
            api_version,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .form(params);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        self.send(request).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let request = self.client.get(format!("{}/{}", self.base_url, path));
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request
            .basic_auth(&self.secret_key, Some(""))
            .header("Stripe-Version", &self.api_version)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = error_message(&body);
            tracing::warn!(status = status.as_u16(), %message, "stripe request failed");
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn create_customer(&self, request: NewCustomer) -> Result<GatewayCustomer, GatewayError> {
        let customer: GatewayCustomer = self
            .post_form("customers", &customer_params(&request), None)
            .await?;
        tracing::info!(customer_id = %customer.id, "stripe customer created");
        Ok(customer)
    }

    #[instrument(skip(self, request), fields(amount = request.amount, currency = %request.currency))]
    async fn create_payment_intent(
        &self,
        request: NewPaymentIntent,
    ) -> Result<PaymentIntent, GatewayError> {
        let intent: PaymentIntent = self
            .post_form("payment_intents", &intent_params(&request), None)
            .await?;
        tracing::info!(intent_id = %intent.id, "stripe payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        if intent_id.is_empty() || !intent_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GatewayError::NotFound(intent_id.to_string()));
        }
        self.get_json(&format!("payment_intents/{intent_id}")).await
    }

    #[instrument(skip(self, request), fields(intent_id = %request.payment_intent_id, amount = ?request.amount))]
    async fn create_refund(&self, request: NewRefund) -> Result<Refund, GatewayError> {
        let refund: Refund = self
            .post_form(
                "refunds",
                &refund_params(&request),
                Some(&request.idempotency_key),
            )
            .await?;
        tracing::info!(refund_id = %refund.id, status = ?refund.status, "stripe refund created");
        Ok(refund)
    }
}

fn push_metadata(params: &mut Vec<(String, String)>, metadata: &BTreeMap<String, String>) {
    params.extend(
        metadata
            .iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
    );
}

fn customer_params(request: &NewCustomer) -> Vec<(String, String)> {
    let mut params = vec![("email".to_string(), request.email.clone())];
    if let Some(name) = &request.name {
        params.push(("name".to_string(), name.clone()));
    }
    push_metadata(&mut params, &request.metadata);
    params
}

fn intent_params(request: &NewPaymentIntent) -> Vec<(String, String)> {
    let mut params = vec![
        ("amount".to_string(), request.amount.to_string()),
        ("currency".to_string(), request.currency.to_ascii_lowercase()),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
    ];
    if let Some(customer) = &request.customer_id {
        params.push(("customer".to_string(), customer.clone()));
    }
    push_metadata(&mut params, &request.metadata);
    params
}

fn refund_params(request: &NewRefund) -> Vec<(String, String)> {
    let mut params = vec![(
        "payment_intent".to_string(),
        request.payment_intent_id.clone(),
    )];
    if let Some(amount) = request.amount {
        params.push(("amount".to_string(), amount.to_string()));
    }
    push_metadata(&mut params, &request.metadata);
    params
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        code: Option<String>,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(Envelope { error }) => match (error.message, error.code) {
            (Some(message), _) => message,
            (None, Some(code)) => code,
            (None, None) => "unknown error".to_string(),
        },
        Err(_) => body.chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::IntentStatus;

    fn metadata() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("order_id".to_string(), "42".to_string()),
            ("order_number".to_string(), "ORD-1".to_string()),
        ])
    }

    #[test]
    fn intent_params_carry_amount_customer_and_metadata() {
        let params = intent_params(&NewPaymentIntent {
            amount: 6_424,
            currency: "USD".to_string(),
            customer_id: Some("cus_123".to_string()),
            metadata: metadata(),
        });

        assert!(params.contains(&("amount".to_string(), "6424".to_string())));
        assert!(params.contains(&("currency".to_string(), "usd".to_string())));
        assert!(params.contains(&("customer".to_string(), "cus_123".to_string())));
        assert!(params.contains(&("metadata[order_id]".to_string(), "42".to_string())));
    }

    #[test]
    fn full_refund_omits_amount() {
        let params = refund_params(&NewRefund {
            payment_intent_id: "pi_1".to_string(),
            amount: None,
            idempotency_key: "refund-1".to_string(),
            metadata: BTreeMap::new(),
        });
        assert_eq!(
            params,
            vec![("payment_intent".to_string(), "pi_1".to_string())]
        );
    }

    #[test]
    fn error_message_prefers_stripe_message() {
        let body = r#"{"error":{"message":"No such payment_intent","code":"resource_missing"}}"#;
        assert_eq!(error_message(body), "No such payment_intent");
        assert_eq!(error_message("gateway down"), "gateway down");
    }

    #[test]
    fn intent_status_tolerates_unknown_values() {
        let intent: PaymentIntent = serde_json::from_str(
            r#"{"id":"pi_1","amount":100,"currency":"usd","status":"something_new","client_secret":null,"customer":null,"latest_charge":null}"#,
        )
        .unwrap();
        assert_eq!(intent.status, IntentStatus::Unknown);
    }
}
