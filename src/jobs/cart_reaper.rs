//! Periodic cleanup of stale carts.
//!
//! Three bulk statements run in order, each touching `active` carts only:
//!
//! 1. guest carts with no items, older than an hour, are deleted;
//! 2. guest carts with items, older than a week, become `abandoned`;
//! 3. any cart past its `expires_at` becomes `abandoned`.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    sea_query::{Query, SelectStatement},
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::instrument;

use crate::{
    domain::CartStatus,
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts},
    },
};

pub const EMPTY_GUEST_CART_HOURS: i64 = 1;
pub const STALE_GUEST_CART_DAYS: i64 = 7;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub deleted_empty: u64,
    pub abandoned_stale: u64,
    pub abandoned_expired: u64,
}

fn carts_with_items() -> SelectStatement {
    Query::select()
        .column(CartItemCol::CartId)
        .from(CartItems)
        .to_owned()
}

fn abandoned(at: DateTime<Utc>) -> CartActive {
    CartActive {
        status: Set(CartStatus::Abandoned),
        updated_at: Set(at.fixed_offset()),
        ..Default::default()
    }
}

/// Run the three sweeps as of `now`. The first failing sweep stops the run.
#[instrument(skip(conn))]
pub async fn reap_carts<C: ConnectionTrait>(conn: &C, now: DateTime<Utc>) -> Result<ReapReport, DbErr> {
    let deleted_empty = Carts::delete_many()
        .filter(CartCol::Status.eq(CartStatus::Active))
        .filter(CartCol::UserId.is_null())
        .filter(CartCol::CreatedAt.lt((now - TimeDelta::hours(EMPTY_GUEST_CART_HOURS)).fixed_offset()))
        .filter(CartCol::Id.not_in_subquery(carts_with_items()))
        .exec(conn)
        .await?
        .rows_affected;

    let abandoned_stale = Carts::update_many()
        .set(abandoned(now))
        .filter(CartCol::Status.eq(CartStatus::Active))
        .filter(CartCol::UserId.is_null())
        .filter(CartCol::CreatedAt.lt((now - TimeDelta::days(STALE_GUEST_CART_DAYS)).fixed_offset()))
        .filter(CartCol::Id.in_subquery(carts_with_items()))
        .exec(conn)
        .await?
        .rows_affected;

    let abandoned_expired = Carts::update_many()
        .set(abandoned(now))
        .filter(CartCol::Status.eq(CartStatus::Active))
        .filter(CartCol::ExpiresAt.lt(now.fixed_offset()))
        .exec(conn)
        .await?
        .rows_affected;

    let report = ReapReport {
        deleted_empty,
        abandoned_stale,
        abandoned_expired,
    };
    tracing::info!(?report, "cart reaper finished");
    Ok(report)
}

/// Run [`reap_carts`] every `every`. Failures are logged and retried on the
/// next tick.
pub fn spawn_cart_reaper(db: DatabaseConnection, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = reap_carts(&db, Utc::now()).await {
                tracing::error!(error = %err, "cart reaper failed");
            }
        }
    })
}
