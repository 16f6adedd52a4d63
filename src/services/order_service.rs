use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::{
    dto::{
        checkout::{CheckoutRequest, CheckoutResponse},
        orders::{OrderList, OrderWithItems, PaymentConfirmation},
    },
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{Column as PaymentCol, Entity as Payments},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Order,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        cart_service::{self, CartOwner},
        checkout_service::{self, CheckoutError, CheckoutParams},
    },
    state::AppState,
};

/// Checkout the caller's active cart and mark it converted.
pub async fn checkout(
    state: &AppState,
    owner: &CartOwner,
    user: Option<&AuthUser>,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutResponse>> {
    let user = match user {
        Some(auth) => Some(
            Users::find_by_id(auth.user_id)
                .one(&state.orm)
                .await?
                .ok_or_else(|| AppError::Unauthorized("Unknown user".into()))?,
        ),
        None => None,
    };

    let cart = cart_service::find_active_cart(&state.orm, owner)
        .await?
        .ok_or(CheckoutError::CartEmpty)?;

    let params = CheckoutParams::from_request(payload, &state.config.currency);
    let outcome = checkout_service::create_order_from_cart(
        &state.orm,
        &state.payments,
        &cart,
        user.as_ref(),
        params,
    )
    .await?;

    if let Err(err) = cart_service::mark_converted(&state.orm, cart.id).await {
        tracing::warn!(error = %err, cart_id = %cart.id, "cart not marked converted");
    }

    Ok(ApiResponse::success(
        "Order placed",
        CheckoutResponse {
            order: outcome.order.into(),
            items: outcome.items.into_iter().map(Into::into).collect(),
            client_secret: outcome.client_secret,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    find_orders(state, condition, query).await
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_own_order(state, user, id).await?;
    let data = load_order_with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

/// Ask the gateway where the order's payment stands and apply it.
pub async fn confirm_order_payment(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<PaymentConfirmation>> {
    let order = find_own_order(state, user, id).await?;
    let intent_id = order
        .payment_intent_id
        .clone()
        .ok_or_else(|| AppError::BadRequest("Order has no payment intent".into()))?;

    let paid = state.payments.confirm_payment(&state.orm, &intent_id).await;
    let order = Orders::find_by_id(order.id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let message = if paid { "Payment confirmed" } else { "Payment not completed" };
    Ok(ApiResponse::success(
        message,
        PaymentConfirmation {
            paid,
            order: order.into(),
        },
        Some(Meta::empty()),
    ))
}

async fn find_own_order(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<OrderModel> {
    Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

/// Paginated order listing shared with the admin views.
pub(crate) async fn find_orders(
    state: &AppState,
    mut condition: Condition,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }
    if let Some(payment_status) = query.payment_status {
        condition = condition.add(OrderCol::PaymentStatus.eq(payment_status));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await?;
    let items: Vec<Order> = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(ApiResponse::paginated(
        "Orders",
        OrderList { items },
        page,
        limit,
        total,
    ))
}

pub(crate) async fn load_order_with_items<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
) -> Result<OrderWithItems, DbErr> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    let payments = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .order_by_asc(PaymentCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(OrderWithItems {
        order: order.into(),
        items,
        payments,
    })
}
