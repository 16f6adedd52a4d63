mod common;

use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use storefront_api::{
    domain::CartStatus,
    entity::{Carts, cart_items, carts},
    jobs::{ReapReport, reap_carts},
};
use uuid::Uuid;

use common::{create_product, create_user, setup};

struct CartSeed {
    user_id: Option<Uuid>,
    status: CartStatus,
    age: TimeDelta,
    expires_in: TimeDelta,
}

impl CartSeed {
    fn guest(age: TimeDelta) -> Self {
        Self {
            user_id: None,
            status: CartStatus::Active,
            age,
            expires_in: TimeDelta::days(30),
        }
    }
}

async fn insert_cart(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
    seed: CartSeed,
) -> anyhow::Result<carts::Model> {
    let created = (now - seed.age).fixed_offset();
    Ok(carts::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(seed.user_id),
        session_id: Set(seed.user_id.is_none().then(|| Uuid::new_v4().to_string())),
        status: Set(seed.status),
        subtotal: Set(0),
        tax_amount: Set(0),
        shipping_amount: Set(0),
        discount_amount: Set(0),
        total: Set(0),
        expires_at: Set((now + seed.expires_in).fixed_offset()),
        created_at: Set(created),
        updated_at: Set(created),
    }
    .insert(db)
    .await?)
}

async fn add_line(
    db: &DatabaseConnection,
    cart: &carts::Model,
    product_id: Uuid,
) -> anyhow::Result<()> {
    let timestamp = cart.created_at;
    cart_items::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart.id),
        product_id: Set(product_id),
        variant_id: Set(None),
        quantity: Set(1),
        unit_price: Set(1_000),
        created_at: Set(timestamp),
        updated_at: Set(timestamp),
    }
    .insert(db)
    .await?;
    Ok(())
}

async fn status_of(db: &DatabaseConnection, cart: &carts::Model) -> anyhow::Result<Option<CartStatus>> {
    Ok(Carts::find_by_id(cart.id)
        .one(db)
        .await?
        .map(|cart| cart.status))
}

#[tokio::test]
async fn empty_guest_carts_older_than_an_hour_are_deleted() -> anyhow::Result<()> {
    let app = setup().await?;
    let db = app.db();
    let now = Utc::now();

    let old_empty = insert_cart(db, now, CartSeed::guest(TimeDelta::hours(2))).await?;
    let fresh_empty = insert_cart(db, now, CartSeed::guest(TimeDelta::minutes(10))).await?;
    let user = create_user(db, "keeper@example.com", "user").await?;
    let old_user_cart = insert_cart(
        db,
        now,
        CartSeed {
            user_id: Some(user.id),
            ..CartSeed::guest(TimeDelta::hours(5))
        },
    )
    .await?;

    let report = reap_carts(db, now).await?;
    assert_eq!(report.deleted_empty, 1);

    assert_eq!(status_of(db, &old_empty).await?, None);
    assert_eq!(status_of(db, &fresh_empty).await?, Some(CartStatus::Active));
    assert_eq!(status_of(db, &old_user_cart).await?, Some(CartStatus::Active));
    Ok(())
}

#[tokio::test]
async fn week_old_guest_carts_with_items_are_abandoned() -> anyhow::Result<()> {
    let app = setup().await?;
    let db = app.db();
    let now = Utc::now();
    let product = create_product(db, "Ferris Mug", 1_000, 5).await?;

    let stale = insert_cart(db, now, CartSeed::guest(TimeDelta::days(8))).await?;
    add_line(db, &stale, product.id).await?;
    let recent = insert_cart(db, now, CartSeed::guest(TimeDelta::days(2))).await?;
    add_line(db, &recent, product.id).await?;

    let report = reap_carts(db, now).await?;
    assert_eq!(
        report,
        ReapReport {
            deleted_empty: 0,
            abandoned_stale: 1,
            abandoned_expired: 0,
        }
    );
    assert_eq!(status_of(db, &stale).await?, Some(CartStatus::Abandoned));
    assert_eq!(status_of(db, &recent).await?, Some(CartStatus::Active));
    Ok(())
}

#[tokio::test]
async fn expired_carts_are_abandoned_and_finished_carts_untouched() -> anyhow::Result<()> {
    let app = setup().await?;
    let db = app.db();
    let now = Utc::now();
    let user = create_user(db, "shopper@example.com", "user").await?;

    let expired = insert_cart(
        db,
        now,
        CartSeed {
            user_id: Some(user.id),
            expires_in: TimeDelta::hours(-1),
            ..CartSeed::guest(TimeDelta::days(31))
        },
    )
    .await?;
    let converted = insert_cart(
        db,
        now,
        CartSeed {
            user_id: Some(user.id),
            status: CartStatus::Converted,
            expires_in: TimeDelta::hours(-1),
            ..CartSeed::guest(TimeDelta::days(31))
        },
    )
    .await?;
    let already_abandoned = insert_cart(
        db,
        now,
        CartSeed {
            status: CartStatus::Abandoned,
            ..CartSeed::guest(TimeDelta::days(3))
        },
    )
    .await?;

    let report = reap_carts(db, now).await?;
    assert_eq!(report.abandoned_expired, 1);
    assert_eq!(report.deleted_empty, 0);

    assert_eq!(status_of(db, &expired).await?, Some(CartStatus::Abandoned));
    assert_eq!(status_of(db, &converted).await?, Some(CartStatus::Converted));
    assert_eq!(
        status_of(db, &already_abandoned).await?,
        Some(CartStatus::Abandoned)
    );

    let again = reap_carts(db, now).await?;
    assert_eq!(again, ReapReport::default());
    Ok(())
}
