use std::{collections::BTreeMap, sync::Arc};

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::now,
    domain::{OrderStatus, PaymentRecordStatus, PaymentStatus},
    entity::{
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel,
        },
        users::Entity as Users,
    },
    gateway::{
        GatewayError, IntentStatus, NewCustomer, NewPaymentIntent, NewRefund, PaymentGateway,
        PaymentIntent, RefundStatus,
    },
    mailer::{Mail, Mailer},
};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("payment bookkeeping failed: {0}")]
    Db(#[from] DbErr),
}

/// Payment side of checkout: intents, reconciliation and refunds.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, mailer: Arc<dyn Mailer>) -> Self {
        Self { gateway, mailer }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    /// Request an intent for `order.total` and record it on the order.
    ///
    /// Runs on the caller's connection so checkout can keep it inside its
    /// transaction. Any error must abort that transaction.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id, total = order.total))]
    pub async fn create_payment_intent<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
    ) -> Result<(OrderModel, PaymentIntent), PaymentError> {
        let customer_id = match order.user_id {
            Some(user_id) => Some(self.resolve_customer(conn, user_id, &order).await?),
            None => None,
        };

        let intent = self
            .gateway
            .create_payment_intent(NewPaymentIntent {
                amount: order.total,
                currency: order.currency.clone(),
                customer_id: customer_id.clone(),
                metadata: order_metadata(&order),
            })
            .await?;

        let timestamp = now();
        PaymentActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            payment_intent_id: Set(intent.id.clone()),
            external_payment_id: Set(None),
            amount: Set(order.total),
            currency: Set(order.currency.clone()),
            status: Set(PaymentRecordStatus::Pending),
            gateway: Set(self.gateway.name().to_string()),
            captured: Set(false),
            authorized: Set(false),
            refunded_amount: Set(0),
            failure_reason: Set(None),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        }
        .insert(conn)
        .await?;

        let mut active: OrderActive = order.into();
        active.payment_intent_id = Set(Some(intent.id.clone()));
        active.gateway_customer_id = Set(customer_id);
        active.updated_at = Set(timestamp);
        let order = active.update(conn).await?;

        tracing::info!(intent_id = %intent.id, "payment intent attached to order");
        Ok((order, intent))
    }

    /// Reuse the customer id from any earlier order of the user, else create one.
    async fn resolve_customer<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        order: &OrderModel,
    ) -> Result<String, PaymentError> {
        let previous = Orders::find()
            .filter(OrderCol::UserId.eq(user_id))
            .filter(OrderCol::GatewayCustomerId.is_not_null())
            .order_by_desc(OrderCol::CreatedAt)
            .one(conn)
            .await?;
        if let Some(customer_id) = previous.and_then(|o| o.gateway_customer_id) {
            return Ok(customer_id);
        }

        let name = Users::find_by_id(user_id)
            .one(conn)
            .await?
            .and_then(|user| user.name);
        let customer = self
            .gateway
            .create_customer(NewCustomer {
                email: order.email.clone(),
                name,
                metadata: BTreeMap::from([("user_id".to_string(), user_id.to_string())]),
            })
            .await?;
        Ok(customer.id)
    }

    /// Bring the order in line with the gateway's view of `intent_id`.
    ///
    /// Returns `true` only when the intent has succeeded. Safe to call any
    /// number of times; the confirmation mail goes out once, on the move
    /// into `paid`. Errors are logged and reported as `false`.
    #[instrument(skip(self, db))]
    pub async fn confirm_payment(&self, db: &DatabaseConnection, intent_id: &str) -> bool {
        match self.reconcile_intent(db, intent_id).await {
            Ok(paid) => paid,
            Err(err) => {
                tracing::error!(error = %err, intent_id, "payment confirmation failed");
                false
            }
        }
    }

    async fn reconcile_intent(
        &self,
        db: &DatabaseConnection,
        intent_id: &str,
    ) -> Result<bool, PaymentError> {
        let Some(order) = Orders::find()
            .filter(OrderCol::PaymentIntentId.eq(intent_id))
            .one(db)
            .await?
        else {
            tracing::warn!(intent_id, "no order carries this payment intent");
            return Ok(false);
        };

        let intent = self.gateway.retrieve_payment_intent(intent_id).await?;
        match intent.status {
            IntentStatus::Succeeded => {
                self.mark_paid(db, order, &intent).await?;
                Ok(true)
            }
            IntentStatus::RequiresPaymentMethod => {
                self.mark_awaiting_payment(db, order, &intent).await?;
                Ok(false)
            }
            IntentStatus::Canceled => {
                self.mark_canceled(db, order, &intent).await?;
                Ok(false)
            }
            other => {
                tracing::debug!(status = ?other, intent_id, "payment intent not settled yet");
                Ok(false)
            }
        }
    }

    async fn mark_paid(
        &self,
        db: &DatabaseConnection,
        order: OrderModel,
        intent: &PaymentIntent,
    ) -> Result<(), PaymentError> {
        let newly_paid = !order.payment_status.is_settled();
        let txn = db.begin().await?;

        let mut active: OrderActive = order.clone().into();
        if order.status == OrderStatus::Pending {
            active.status = Set(OrderStatus::Confirmed);
        }
        if newly_paid {
            active.payment_status = Set(PaymentStatus::Paid);
        }
        active.updated_at = Set(now());
        let order = active.update(&txn).await?;

        if let Some(payment) = find_payment(&txn, order.id, &intent.id).await? {
            let upgrade = matches!(
                payment.status,
                PaymentRecordStatus::Pending
                    | PaymentRecordStatus::Failed
                    | PaymentRecordStatus::Canceled
            );
            let mut payment: PaymentActive = payment.into();
            if upgrade {
                payment.status = Set(PaymentRecordStatus::Succeeded);
            }
            payment.captured = Set(true);
            payment.authorized = Set(true);
            if intent.latest_charge.is_some() {
                payment.external_payment_id = Set(intent.latest_charge.clone());
            }
            payment.updated_at = Set(now());
            payment.update(&txn).await?;
        }

        txn.commit().await?;

        if newly_paid {
            tracing::info!(order_id = %order.id, "order paid");
            self.mailer.enqueue(Mail::OrderConfirmation {
                order_id: order.id,
                order_number: order.order_number.clone(),
                to: order.email.clone(),
                total: order.total,
                currency: order.currency.clone(),
            });
        }
        Ok(())
    }

    /// The intent needs a (new) payment method. When the gateway reports a
    /// declined attempt the payment row moves to `failed` and the customer is
    /// told once; later calls against the same failure send nothing.
    async fn mark_awaiting_payment(
        &self,
        db: &DatabaseConnection,
        order: OrderModel,
        intent: &PaymentIntent,
    ) -> Result<(), PaymentError> {
        let txn = db.begin().await?;

        let mut active: OrderActive = order.clone().into();
        active.payment_status = Set(PaymentStatus::PaymentPending);
        active.updated_at = Set(now());
        let order = active.update(&txn).await?;

        let mut declined = None;
        if let Some(error) = &intent.last_payment_error {
            if let Some(payment) = find_payment(&txn, order.id, &intent.id).await? {
                if payment.status == PaymentRecordStatus::Pending {
                    let reason = error.reason();
                    let mut payment: PaymentActive = payment.into();
                    payment.status = Set(PaymentRecordStatus::Failed);
                    payment.failure_reason = Set(Some(reason.clone()));
                    payment.updated_at = Set(now());
                    payment.update(&txn).await?;
                    declined = Some(reason);
                }
            }
        }

        txn.commit().await?;

        if let Some(reason) = declined {
            tracing::info!(order_id = %order.id, %reason, "payment attempt declined");
            self.mailer.enqueue(Mail::PaymentFailed {
                order_id: order.id,
                order_number: order.order_number.clone(),
                to: order.email.clone(),
                reason,
            });
        }
        Ok(())
    }

    async fn mark_canceled(
        &self,
        db: &DatabaseConnection,
        order: OrderModel,
        intent: &PaymentIntent,
    ) -> Result<(), PaymentError> {
        let txn = db.begin().await?;

        let mut active: OrderActive = order.clone().into();
        match order.status.transition_to(OrderStatus::Cancelled) {
            Ok(status) => active.status = Set(status),
            Err(err) => tracing::warn!(error = %err, order_id = %order.id, "keeping order status"),
        }
        active.payment_status = Set(PaymentStatus::PaymentPending);
        active.updated_at = Set(now());
        active.update(&txn).await?;

        if let Some(payment) = find_payment(&txn, order.id, &intent.id).await? {
            if payment.status == PaymentRecordStatus::Pending {
                let mut payment: PaymentActive = payment.into();
                payment.status = Set(PaymentRecordStatus::Canceled);
                payment.failure_reason = Set(Some("payment intent canceled".to_string()));
                payment.updated_at = Set(now());
                payment.update(&txn).await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    /// Refund all or part of an order's payment.
    ///
    /// Requests are capped at what is still refundable on the payment row and
    /// carry an idempotency key built from the order and the amount already
    /// refunded, so a repeated submission against the same state yields one
    /// gateway refund. Returns `false` without touching the order when there
    /// is no intent, the amount is out of range, or the gateway does not
    /// report success.
    #[instrument(skip(self, db, order), fields(order_id = %order.id))]
    pub async fn refund_payment(
        &self,
        db: &DatabaseConnection,
        order: &OrderModel,
        amount: Option<i64>,
    ) -> bool {
        let Some(intent_id) = order.payment_intent_id.as_deref() else {
            tracing::warn!("order has no payment intent to refund");
            return false;
        };

        match self.issue_refund(db, order, intent_id, amount).await {
            Ok(refunded) => refunded,
            Err(err) => {
                tracing::error!(error = %err, "refund failed");
                false
            }
        }
    }

    async fn issue_refund(
        &self,
        db: &DatabaseConnection,
        order: &OrderModel,
        intent_id: &str,
        amount: Option<i64>,
    ) -> Result<bool, PaymentError> {
        let payment = find_payment(db, order.id, intent_id).await?;
        let (charged, already_refunded) = payment
            .as_ref()
            .map_or((order.total, 0), |p| (p.amount, p.refunded_amount));
        let refundable = (charged - already_refunded).max(0);
        let requested = amount.unwrap_or(refundable);
        if requested <= 0 || requested > refundable {
            tracing::warn!(requested, refundable, "refund amount out of range");
            return Ok(false);
        }

        let refund = self
            .gateway
            .create_refund(NewRefund {
                payment_intent_id: intent_id.to_string(),
                amount: Some(requested),
                idempotency_key: format!("refund-{}-{}-{}", order.id, already_refunded, requested),
                metadata: order_metadata(order),
            })
            .await?;
        if refund.status != RefundStatus::Succeeded {
            tracing::warn!(refund_id = %refund.id, status = ?refund.status, "refund not settled");
            return Ok(false);
        }

        let refunded_total = already_refunded + requested;
        let full = amount.is_none_or(|a| a >= order.total) || refunded_total >= charged;

        let txn = db.begin().await?;
        let mut active: OrderActive = order.clone().into();
        if full {
            active.payment_status = Set(PaymentStatus::Refunded);
            match order.status.transition_to(OrderStatus::Refunded) {
                Ok(status) => active.status = Set(status),
                Err(err) => tracing::warn!(error = %err, "keeping order status after refund"),
            }
        } else {
            active.payment_status = Set(PaymentStatus::PartiallyRefunded);
        }
        active.updated_at = Set(now());
        active.update(&txn).await?;

        if let Some(payment) = payment {
            let mut payment: PaymentActive = payment.into();
            payment.refunded_amount = Set(refunded_total);
            payment.status = Set(if full {
                PaymentRecordStatus::Refunded
            } else {
                PaymentRecordStatus::PartiallyRefunded
            });
            payment.updated_at = Set(now());
            payment.update(&txn).await?;
        }
        txn.commit().await?;

        tracing::info!(refund_id = %refund.id, amount = requested, full, "refund recorded");
        self.mailer.enqueue(Mail::RefundNotice {
            order_id: order.id,
            order_number: order.order_number.clone(),
            to: order.email.clone(),
            amount: requested,
            currency: order.currency.clone(),
            full,
        });
        Ok(true)
    }
}

async fn find_payment<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    intent_id: &str,
) -> Result<Option<PaymentModel>, DbErr> {
    Payments::find()
        .filter(PaymentCol::OrderId.eq(order_id))
        .filter(PaymentCol::PaymentIntentId.eq(intent_id))
        .one(conn)
        .await
}

fn order_metadata(order: &OrderModel) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("order_id".to_string(), order.id.to_string()),
        ("order_number".to_string(), order.order_number.clone()),
    ])
}
