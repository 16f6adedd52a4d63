use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    audit,
    db::now,
    dto::{
        admin::{
            BulkActionResult, BulkOrderRequest, InventoryAdjustRequest, LowStockList,
            LowStockQuery, RefundRequest, RefundResult, UpdateOrderStatusRequest,
        },
        orders::{OrderList, OrderWithItems},
    },
    entity::{
        orders::{ActiveModel as OrderActive, Entity as Orders},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, Product},
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    services::order_service::{find_orders, load_order_with_items},
    state::AppState,
};

const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 5;

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    find_orders(state, Condition::all(), query).await
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let data = load_order_with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("Order found", data, Some(Meta::empty())))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let existing = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let from = existing.status;
    let status = from
        .transition_to(payload.status)
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let mut active: OrderActive = existing.into();
    active.status = Set(status);
    active.updated_at = Set(now());
    let order = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "from": from, "to": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        order.into(),
        Some(Meta::empty()),
    ))
}

/// Apply one status change to many orders. Orders that are missing or cannot
/// take the change are skipped and reported back.
pub async fn bulk_update_orders(
    state: &AppState,
    user: &AuthUser,
    payload: BulkOrderRequest,
) -> AppResult<ApiResponse<BulkActionResult>> {
    ensure_admin(user)?;
    if payload.ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".into()));
    }

    let target = payload.action.target();
    let orders = Orders::find()
        .filter(crate::entity::orders::Column::Id.is_in(payload.ids.clone()))
        .all(&state.orm)
        .await?;

    let mut updated = 0u64;
    let mut skipped: Vec<Uuid> = payload
        .ids
        .iter()
        .filter(|id| !orders.iter().any(|o| o.id == **id))
        .copied()
        .collect();

    for order in orders {
        if order.status == target || !order.status.can_transition_to(target) {
            skipped.push(order.id);
            continue;
        }
        let mut active: OrderActive = order.into();
        active.status = Set(target);
        active.updated_at = Set(now());
        active.update(&state.orm).await?;
        updated += 1;
    }

    tracing::info!(action = ?payload.action, updated, skipped = skipped.len(), "bulk order update");
    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_bulk_update",
        "orders",
        serde_json::json!({ "status": target, "updated": updated, "skipped": skipped }),
    )
    .await;

    Ok(ApiResponse::success(
        "Orders updated",
        BulkActionResult { updated, skipped },
        Some(Meta::empty()),
    ))
}

pub async fn refund_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: RefundRequest,
) -> AppResult<ApiResponse<RefundResult>> {
    ensure_admin(user)?;
    if payload.amount.is_some_and(|amount| amount <= 0) {
        return Err(AppError::BadRequest("amount must be greater than 0".into()));
    }

    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    if !order.payment_status.is_settled() {
        return Err(AppError::BadRequest("Order has not been paid".into()));
    }

    let refunded = state
        .payments
        .refund_payment(&state.orm, &order, payload.amount)
        .await;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if refunded {
        audit::record(
            &state.orm,
            Some(user.user_id),
            "order_refund",
            "orders",
            serde_json::json!({ "order_id": order.id, "amount": payload.amount }),
        )
        .await;
    }

    let message = if refunded { "Refund issued" } else { "Refund failed" };
    Ok(ApiResponse::success(
        message,
        RefundResult {
            refunded,
            order: order.into(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<LowStockList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    let (page, limit, offset) = query.pagination().normalize();

    let finder = Products::find()
        .filter(ProdCol::TrackInventory.eq(true))
        .filter(ProdCol::InventoryQuantity.lte(threshold))
        .order_by_asc(ProdCol::InventoryQuantity)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await?;
    let items: Vec<Product> = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(ApiResponse::paginated(
        "Low stock products",
        LowStockList { items },
        page,
        limit,
        total,
    ))
}

/// Add `delta` (possibly negative) to a product's stock, never below zero.
pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be zero".into()));
    }

    let mut update = Products::update_many()
        .col_expr(
            ProdCol::InventoryQuantity,
            Expr::col(ProdCol::InventoryQuantity).add(payload.delta),
        )
        .col_expr(ProdCol::UpdatedAt, Expr::value(now()))
        .filter(ProdCol::Id.eq(id));
    if payload.delta < 0 {
        update = update.filter(ProdCol::InventoryQuantity.gte(-payload.delta));
    }
    let result = update.exec(&state.orm).await?;

    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    if result.rows_affected == 0 {
        return Err(AppError::BadRequest(format!(
            "Cannot remove {} units, only {} in stock",
            -payload.delta, product.inventory_quantity
        )));
    }

    audit::record(
        &state.orm,
        Some(user.user_id),
        "inventory_adjust",
        "products",
        serde_json::json!({
            "product_id": product.id,
            "delta": payload.delta,
            "inventory_quantity": product.inventory_quantity,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Inventory updated",
        product.into(),
        Some(Meta::empty()),
    ))
}
