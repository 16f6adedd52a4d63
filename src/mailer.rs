//! Outbound mail.
//!
//! Callers hand a [`Mail`] to a [`Mailer`] and move on. [`QueuedMailer`]
//! buffers messages on a channel drained by a background task that delivers
//! them through a [`MailTransport`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::pricing::format_minor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mail {
    OrderConfirmation {
        order_id: Uuid,
        order_number: String,
        to: String,
        total: i64,
        currency: String,
    },
    RefundNotice {
        order_id: Uuid,
        order_number: String,
        to: String,
        amount: i64,
        currency: String,
        full: bool,
    },
    PaymentFailed {
        order_id: Uuid,
        order_number: String,
        to: String,
        reason: String,
    },
}

impl Mail {
    pub fn recipient(&self) -> &str {
        match self {
            Mail::OrderConfirmation { to, .. }
            | Mail::RefundNotice { to, .. }
            | Mail::PaymentFailed { to, .. } => to,
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Mail::OrderConfirmation { order_id, .. }
            | Mail::RefundNotice { order_id, .. }
            | Mail::PaymentFailed { order_id, .. } => *order_id,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Mail::OrderConfirmation { order_number, .. } => {
                format!("Order {order_number} confirmed")
            }
            Mail::RefundNotice { order_number, .. } => {
                format!("Refund issued for order {order_number}")
            }
            Mail::PaymentFailed { order_number, .. } => {
                format!("Payment for order {order_number} did not go through")
            }
        }
    }

    pub fn body(&self) -> String {
        match self {
            Mail::OrderConfirmation {
                order_number,
                total,
                currency,
                ..
            } => format!(
                "Thanks for your purchase. Payment of {} for order {order_number} was received.",
                format_minor(*total, currency)
            ),
            Mail::RefundNotice {
                order_number,
                amount,
                currency,
                full,
                ..
            } => {
                let kind = if *full { "A full" } else { "A partial" };
                format!(
                    "{kind} refund of {} for order {order_number} is on its way.",
                    format_minor(*amount, currency)
                )
            }
            Mail::PaymentFailed {
                order_number,
                reason,
                ..
            } => format!(
                "We could not charge your payment method for order {order_number} ({reason}). \
                 Please try again with another card."
            ),
        }
    }
}

/// Fire-and-forget mail sink.
pub trait Mailer: Send + Sync {
    fn enqueue(&self, mail: Mail);
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn deliver(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Transport that writes each message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, mail: &Mail) -> Result<(), MailError> {
        tracing::info!(
            to = %mail.recipient(),
            subject = %mail.subject(),
            body = %mail.body(),
            "mail delivered"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QueuedMailer {
    tx: mpsc::Sender<Mail>,
}

impl QueuedMailer {
    /// Spawn the delivery worker. The worker stops once every sender is dropped.
    pub fn start<T: MailTransport>(transport: T, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Mail>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(mail) = rx.recv().await {
                if let Err(err) = transport.deliver(&mail).await {
                    tracing::error!(
                        error = %err,
                        order_id = %mail.order_id(),
                        subject = %mail.subject(),
                        "mail delivery failed"
                    );
                }
            }
            tracing::debug!("mail queue closed");
        });
        (Self { tx }, worker)
    }
}

impl Mailer for QueuedMailer {
    fn enqueue(&self, mail: Mail) {
        if let Err(err) = self.tx.try_send(mail) {
            tracing::warn!(error = %err, "mail could not be queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct CollectingTransport {
        delivered: Arc<Mutex<Vec<Mail>>>,
    }

    #[async_trait]
    impl MailTransport for CollectingTransport {
        async fn deliver(&self, mail: &Mail) -> Result<(), MailError> {
            self.delivered.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    fn confirmation() -> Mail {
        Mail::OrderConfirmation {
            order_id: Uuid::new_v4(),
            order_number: "ORD-20261018-ABCDEF12".to_string(),
            to: "buyer@example.com".to_string(),
            total: 6_424,
            currency: "usd".to_string(),
        }
    }

    #[tokio::test]
    async fn queued_mail_reaches_the_transport() {
        let transport = CollectingTransport::default();
        let delivered = transport.delivered.clone();
        let (mailer, worker) = QueuedMailer::start(transport, 8);

        mailer.enqueue(confirmation());
        drop(mailer);
        worker.await.unwrap();

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recipient(), "buyer@example.com");
    }

    #[test]
    fn renders_subject_and_body() {
        let mail = confirmation();
        assert_eq!(mail.subject(), "Order ORD-20261018-ABCDEF12 confirmed");
        assert!(mail.body().contains("64.24 USD"));

        let refund = Mail::RefundNotice {
            order_id: Uuid::new_v4(),
            order_number: "ORD-1".to_string(),
            to: "buyer@example.com".to_string(),
            amount: 1_000,
            currency: "usd".to_string(),
            full: false,
        };
        assert!(refund.body().starts_with("A partial refund of 10.00 USD"));
    }

    #[test]
    fn payment_failed_mentions_the_reason() {
        let mail = Mail::PaymentFailed {
            order_id: Uuid::new_v4(),
            order_number: "ORD-2".to_string(),
            to: "buyer@example.com".to_string(),
            reason: "Your card was declined.".to_string(),
        };
        assert_eq!(mail.subject(), "Payment for order ORD-2 did not go through");
        assert!(mail.body().contains("(Your card was declined.)"));
        assert_eq!(mail.recipient(), "buyer@example.com");
    }
}
