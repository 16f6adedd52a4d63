use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    GatewayCustomer, GatewayError, IntentStatus, NewCustomer, NewPaymentIntent, NewRefund,
    PaymentAttemptError, PaymentGateway, PaymentIntent, Refund, RefundStatus,
};

/// Sandbox gateway that keeps intents and refunds in memory.
///
/// Intents start in `requires_payment_method`; callers move them along with
/// [`InMemoryGateway::set_intent_status`]. Refunds honour idempotency keys.
#[derive(Debug)]
pub struct InMemoryGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    refunds: Mutex<HashMap<String, Refund>>,
    customers_created: AtomicUsize,
    fail_intents: AtomicBool,
    fail_refunds: AtomicBool,
    refund_status: Mutex<RefundStatus>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(HashMap::new()),
            refunds: Mutex::new(HashMap::new()),
            customers_created: AtomicUsize::new(0),
            fail_intents: AtomicBool::new(false),
            fail_refunds: AtomicBool::new(false),
            refund_status: Mutex::new(RefundStatus::Succeeded),
        }
    }

    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) -> bool {
        match lock(&self.intents).get_mut(intent_id) {
            Some(intent) => {
                intent.status = status;
                if status == IntentStatus::Succeeded {
                    intent.latest_charge = Some(format!("ch_{}", Uuid::new_v4().simple()));
                    intent.last_payment_error = None;
                }
                true
            }
            None => false,
        }
    }

    /// Record a declined charge attempt; the intent goes back to
    /// `requires_payment_method`.
    pub fn decline_payment(&self, intent_id: &str, message: &str) -> bool {
        match lock(&self.intents).get_mut(intent_id) {
            Some(intent) => {
                intent.status = IntentStatus::RequiresPaymentMethod;
                intent.last_payment_error = Some(PaymentAttemptError {
                    code: Some("card_declined".to_string()),
                    message: Some(message.to_string()),
                });
                true
            }
            None => false,
        }
    }

    pub fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        lock(&self.intents).get(intent_id).cloned()
    }

    pub fn fail_intent_creation(&self, fail: bool) {
        self.fail_intents.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Status reported for refunds created from now on.
    pub fn set_refund_status(&self, status: RefundStatus) {
        *lock(&self.refund_status) = status;
    }

    pub fn customers_created(&self) -> usize {
        self.customers_created.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> Vec<Refund> {
        lock(&self.refunds).values().cloned().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn create_customer(&self, request: NewCustomer) -> Result<GatewayCustomer, GatewayError> {
        self.customers_created.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayCustomer {
            id: format!("cus_{}", Uuid::new_v4().simple()),
            email: Some(request.email),
        })
    }

    async fn create_payment_intent(
        &self,
        request: NewPaymentIntent,
    ) -> Result<PaymentIntent, GatewayError> {
        if self.fail_intents.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 402,
                message: "card_declined".to_string(),
            });
        }
        if request.amount <= 0 {
            return Err(GatewayError::Api {
                status: 400,
                message: "amount must be positive".to_string(),
            });
        }

        let id = format!("pi_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            client_secret: Some(format!("{id}_secret_{}", Uuid::new_v4().simple())),
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
            status: IntentStatus::RequiresPaymentMethod,
            customer: request.customer_id,
            latest_charge: None,
            last_payment_error: None,
        };
        lock(&self.intents).insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.intent(intent_id)
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))
    }

    async fn create_refund(&self, request: NewRefund) -> Result<Refund, GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 500,
                message: "refund service unavailable".to_string(),
            });
        }

        if let Some(existing) = lock(&self.refunds).get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let intent = self
            .intent(&request.payment_intent_id)
            .ok_or_else(|| GatewayError::NotFound(request.payment_intent_id.clone()))?;
        if intent.status != IntentStatus::Succeeded {
            return Err(GatewayError::Api {
                status: 400,
                message: "payment intent has not succeeded".to_string(),
            });
        }

        let refund = Refund {
            id: format!("re_{}", Uuid::new_v4().simple()),
            amount: request.amount.unwrap_or(intent.amount),
            status: *lock(&self.refund_status),
        };
        lock(&self.refunds).insert(request.idempotency_key, refund.clone());
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn new_intent(amount: i64) -> NewPaymentIntent {
        NewPaymentIntent {
            amount,
            currency: "usd".to_string(),
            customer_id: None,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn refunds_with_the_same_key_collapse() {
        let gateway = InMemoryGateway::new();
        let intent = gateway.create_payment_intent(new_intent(1_000)).await.unwrap();
        gateway.set_intent_status(&intent.id, IntentStatus::Succeeded);

        let request = NewRefund {
            payment_intent_id: intent.id.clone(),
            amount: Some(400),
            idempotency_key: "refund-a".to_string(),
            metadata: BTreeMap::new(),
        };
        let first = gateway.create_refund(request.clone()).await.unwrap();
        let second = gateway.create_refund(request).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(gateway.refunds().len(), 1);
    }

    #[tokio::test]
    async fn unknown_intent_is_not_found() {
        let gateway = InMemoryGateway::new();
        let err = gateway.retrieve_payment_intent("pi_missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }
}
