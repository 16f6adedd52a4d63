use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    gateway::webhook::{DEFAULT_TOLERANCE_SECS, WebhookEvent, verify_signature},
    response::{ApiResponse, Meta},
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub event_id: String,
    pub event_type: String,
    /// Outcome of reconciliation for `payment_intent.*` events.
    pub paid: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/payments", post(payment_webhook))
}

#[utoipa::path(
    post,
    path = "/api/webhooks/payments",
    request_body(content = String, description = "Raw gateway event JSON"),
    params(("Stripe-Signature" = Option<String>, Header, description = "Required when a webhook secret is configured")),
    responses(
        (status = 200, description = "Event accepted", body = ApiResponse<WebhookAck>),
        (status = 400, description = "Bad signature or payload"),
        (status = 429, description = "Too many requests")
    ),
    tag = "Webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<WebhookAck>>> {
    if let Some(secret) = state.config.payment.webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::BadRequest("Missing signature header".into()))?;
        verify_signature(
            &body,
            header,
            secret,
            DEFAULT_TOLERANCE_SECS,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|err| {
            tracing::warn!(error = %err, "webhook signature rejected");
            AppError::BadRequest(err.to_string())
        })?;
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("Invalid event payload: {err}")))?;

    let paid = match event.payment_intent_id() {
        Some(intent_id) => Some(state.payments.confirm_payment(&state.orm, intent_id).await),
        None => {
            tracing::debug!(event_type = %event.event_type, "webhook event ignored");
            None
        }
    };
    tracing::info!(event_id = %event.id, event_type = %event.event_type, ?paid, "webhook processed");

    Ok(Json(ApiResponse::success(
        "Received",
        WebhookAck {
            event_id: event.id,
            event_type: event.event_type,
            paid,
        },
        Some(Meta::empty()),
    )))
}
