mod common;

use chrono::Duration;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use storefront_api::{
    domain::{OrderStatus, PaymentRecordStatus, PaymentStatus},
    dto::cart::AddToCartRequest,
    entity::{Orders, Payments, orders, payments},
    gateway::{IntentStatus, RefundStatus},
    mailer::Mail,
    services::{
        cart_service::{self, CartOwner},
        checkout_service::{CheckoutParams, create_order_from_cart},
    },
};

use common::{TestApp, create_product, create_user, setup};

/// A pending order for 2 x 25.00, total 64.24.
async fn place_order(app: &TestApp) -> anyhow::Result<orders::Model> {
    let user = create_user(app.db(), "payer@example.com", "user").await?;
    let product = create_product(app.db(), "Ferris Mug", 2_500, 10).await?;
    let owner = CartOwner::User(user.id);
    cart_service::add_item(
        app.db(),
        &owner,
        Duration::days(30),
        AddToCartRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 2,
        },
    )
    .await?;
    let cart = cart_service::find_active_cart(app.db(), &owner)
        .await?
        .expect("active cart");

    let outcome = create_order_from_cart(
        app.db(),
        app.payments(),
        &cart,
        Some(&user),
        CheckoutParams {
            currency: "usd".to_string(),
            ..Default::default()
        },
    )
    .await?;
    Ok(outcome.order)
}

async fn reload(app: &TestApp, order: &orders::Model) -> anyhow::Result<orders::Model> {
    Ok(Orders::find_by_id(order.id)
        .one(app.db())
        .await?
        .expect("order"))
}

async fn payment_row(app: &TestApp, order: &orders::Model) -> anyhow::Result<payments::Model> {
    Ok(Payments::find()
        .filter(payments::Column::OrderId.eq(order.id))
        .one(app.db())
        .await?
        .expect("payment row"))
}

fn intent_id(order: &orders::Model) -> String {
    order.payment_intent_id.clone().expect("payment intent")
}

async fn paid_order(app: &TestApp) -> anyhow::Result<orders::Model> {
    let order = place_order(app).await?;
    let intent = intent_id(&order);
    assert!(app.gateway.set_intent_status(&intent, IntentStatus::Succeeded));
    assert!(app.payments().confirm_payment(app.db(), &intent).await);
    reload(app, &order).await
}

#[tokio::test]
async fn confirming_twice_sends_a_single_confirmation() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = place_order(&app).await?;
    let intent = intent_id(&order);
    app.gateway.set_intent_status(&intent, IntentStatus::Succeeded);

    assert!(app.payments().confirm_payment(app.db(), &intent).await);
    assert!(app.payments().confirm_payment(app.db(), &intent).await);

    let order = reload(&app, &order).await?;
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    let payment = payment_row(&app, &order).await?;
    assert_eq!(payment.status, PaymentRecordStatus::Succeeded);
    assert!(payment.captured);
    assert!(payment.external_payment_id.is_some());

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        Mail::OrderConfirmation { order_id, total, .. } if *order_id == order.id && *total == 6_424
    ));
    Ok(())
}

#[tokio::test]
async fn unsettled_intent_leaves_the_order_awaiting_payment() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = place_order(&app).await?;

    assert!(!app.payments().confirm_payment(app.db(), &intent_id(&order)).await);

    let order = reload(&app, &order).await?;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::PaymentPending);
    assert!(app.mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn canceled_intent_cancels_the_order() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = place_order(&app).await?;
    let intent = intent_id(&order);
    app.gateway.set_intent_status(&intent, IntentStatus::Canceled);

    assert!(!app.payments().confirm_payment(app.db(), &intent).await);

    let order = reload(&app, &order).await?;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::PaymentPending);
    let payment = payment_row(&app, &order).await?;
    assert_eq!(payment.status, PaymentRecordStatus::Canceled);
    Ok(())
}

#[tokio::test]
async fn unknown_intent_is_not_confirmed() -> anyhow::Result<()> {
    let app = setup().await?;
    assert!(!app.payments().confirm_payment(app.db(), "pi_missing").await);
    assert!(app.mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn partial_then_full_refund() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = paid_order(&app).await?;

    assert!(app.payments().refund_payment(app.db(), &order, Some(1_000)).await);
    let order = reload(&app, &order).await?;
    assert_eq!(order.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(order.status, OrderStatus::Confirmed);
    let payment = payment_row(&app, &order).await?;
    assert_eq!(payment.refunded_amount, 1_000);
    assert_eq!(payment.status, PaymentRecordStatus::PartiallyRefunded);

    assert!(app.payments().refund_payment(app.db(), &order, None).await);
    let order = reload(&app, &order).await?;
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(order.status, OrderStatus::Refunded);
    let payment = payment_row(&app, &order).await?;
    assert_eq!(payment.refunded_amount, 6_424);
    assert_eq!(payment.status, PaymentRecordStatus::Refunded);

    let mut amounts: Vec<i64> = app.gateway.refunds().iter().map(|r| r.amount).collect();
    amounts.sort_unstable();
    assert_eq!(amounts, vec![1_000, 5_424]);

    let notices: Vec<(i64, bool)> = app
        .mailer
        .sent()
        .into_iter()
        .filter_map(|mail| match mail {
            Mail::RefundNotice { amount, full, .. } => Some((amount, full)),
            _ => None,
        })
        .collect();
    assert_eq!(notices, vec![(1_000, false), (5_424, true)]);
    Ok(())
}

#[tokio::test]
async fn refund_larger_than_the_payment_is_refused() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = paid_order(&app).await?;

    assert!(!app.payments().refund_payment(app.db(), &order, Some(10_000)).await);
    assert!(!app.payments().refund_payment(app.db(), &order, Some(0)).await);

    let order = reload(&app, &order).await?;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert!(app.gateway.refunds().is_empty());
    Ok(())
}

#[tokio::test]
async fn order_without_intent_cannot_be_refunded() -> anyhow::Result<()> {
    let app = setup().await?;
    let mut order = paid_order(&app).await?;
    order.payment_intent_id = None;

    assert!(!app.payments().refund_payment(app.db(), &order, None).await);
    assert!(app.gateway.refunds().is_empty());
    Ok(())
}

#[tokio::test]
async fn gateway_refund_failure_changes_nothing() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = paid_order(&app).await?;
    app.gateway.fail_refunds(true);

    assert!(!app.payments().refund_payment(app.db(), &order, None).await);

    let order = reload(&app, &order).await?;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.status, OrderStatus::Confirmed);
    let payment = payment_row(&app, &order).await?;
    assert_eq!(payment.refunded_amount, 0);
    assert_eq!(app.mailer.sent().len(), 1);
    Ok(())
}

#[tokio::test]
async fn intents_still_in_flight_change_nothing() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = place_order(&app).await?;
    let intent = intent_id(&order);

    for status in [IntentStatus::Processing, IntentStatus::RequiresAction] {
        let before = reload(&app, &order).await?;
        let payment_before = payment_row(&app, &order).await?;
        app.gateway.set_intent_status(&intent, status);

        assert!(!app.payments().confirm_payment(app.db(), &intent).await);

        assert_eq!(reload(&app, &order).await?, before);
        assert_eq!(payment_row(&app, &order).await?, payment_before);
    }
    assert!(app.mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn declined_attempt_sends_one_payment_failed_notice() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = place_order(&app).await?;
    let intent = intent_id(&order);
    assert!(app.gateway.decline_payment(&intent, "Your card was declined."));

    assert!(!app.payments().confirm_payment(app.db(), &intent).await);
    assert!(!app.payments().confirm_payment(app.db(), &intent).await);

    let current = reload(&app, &order).await?;
    assert_eq!(current.status, OrderStatus::Pending);
    assert_eq!(current.payment_status, PaymentStatus::PaymentPending);
    let payment = payment_row(&app, &order).await?;
    assert_eq!(payment.status, PaymentRecordStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("Your card was declined."));

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        Mail::PaymentFailed { order_id, reason, .. }
            if *order_id == order.id && reason == "Your card was declined."
    ));

    // A retry with another card goes through.
    app.gateway.set_intent_status(&intent, IntentStatus::Succeeded);
    assert!(app.payments().confirm_payment(app.db(), &intent).await);
    let payment = payment_row(&app, &order).await?;
    assert_eq!(payment.status, PaymentRecordStatus::Succeeded);
    assert_eq!(app.mailer.sent().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unsettled_gateway_refund_changes_nothing() -> anyhow::Result<()> {
    let app = setup().await?;
    let order = paid_order(&app).await?;
    let payment_before = payment_row(&app, &order).await?;
    app.gateway.set_refund_status(RefundStatus::Pending);

    assert!(!app.payments().refund_payment(app.db(), &order, Some(1_000)).await);

    assert_eq!(reload(&app, &order).await?, order);
    assert_eq!(payment_row(&app, &order).await?, payment_before);
    assert_eq!(app.mailer.sent().len(), 1);
    Ok(())
}
