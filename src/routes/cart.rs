use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddToCartRequest, CartView, UpdateCartItemRequest},
    error::AppResult,
    response::{ApiResponse, Meta},
    routes::params::CartItemQuery,
    services::cart_service::{self, CartOwner},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(view_cart))
        .route("/items", post(add_item))
        .route("/items/{product_id}", patch(update_item).delete(remove_item))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    params(("x-session-id" = Option<String>, Header, description = "Guest session id")),
    responses(
        (status = 200, description = "Current cart with totals", body = ApiResponse<CartView>)
    ),
    security((), ("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn view_cart(
    State(state): State<AppState>,
    owner: CartOwner,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let cart = cart_service::view_cart(&state.orm, &owner).await?;
    Ok(Json(ApiResponse::success("OK", cart, Some(Meta::empty()))))
}

#[utoipa::path(
    post,
    path = "/api/cart/items",
    request_body = AddToCartRequest,
    params(("x-session-id" = Option<String>, Header, description = "Guest session id")),
    responses(
        (status = 200, description = "Item added", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid product or quantity")
    ),
    security((), ("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    owner: CartOwner,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let cart =
        cart_service::add_item(&state.orm, &owner, state.config.cart_ttl(), payload).await?;
    Ok(Json(ApiResponse::success("Added to cart", cart, Some(Meta::empty()))))
}

#[utoipa::path(
    patch,
    path = "/api/cart/items/{product_id}",
    request_body = UpdateCartItemRequest,
    params(
        ("product_id" = Uuid, Path, description = "Product id"),
        ("x-session-id" = Option<String>, Header, description = "Guest session id")
    ),
    responses(
        (status = 200, description = "Quantity changed", body = ApiResponse<CartView>),
        (status = 404, description = "Item not in cart")
    ),
    security((), ("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    owner: CartOwner,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let cart = cart_service::update_item(&state.orm, &owner, product_id, payload).await?;
    Ok(Json(ApiResponse::success("Cart updated", cart, Some(Meta::empty()))))
}

#[utoipa::path(
    delete,
    path = "/api/cart/items/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product id"),
        ("variant_id" = Option<Uuid>, Query, description = "Only remove this variant"),
        ("x-session-id" = Option<String>, Header, description = "Guest session id")
    ),
    responses(
        (status = 200, description = "Removed", body = ApiResponse<CartView>),
        (status = 404, description = "Item not in cart")
    ),
    security((), ("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    owner: CartOwner,
    Path(product_id): Path<Uuid>,
    Query(query): Query<CartItemQuery>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let cart = cart_service::remove_item(&state.orm, &owner, product_id, query.variant_id).await?;
    Ok(Json(ApiResponse::success("Removed from cart", cart, Some(Meta::empty()))))
}
