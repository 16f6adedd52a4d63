use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::checkout::{CheckoutRequest, CheckoutResponse},
    error::AppResult,
    middleware::auth::OptionalAuthUser,
    response::ApiResponse,
    services::{cart_service::CartOwner, order_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

#[utoipa::path(
    post,
    path = "/api/checkout",
    request_body = CheckoutRequest,
    params(("x-session-id" = Option<String>, Header, description = "Guest session id")),
    responses(
        (status = 200, description = "Order placed, payment pending", body = ApiResponse<CheckoutResponse>),
        (status = 422, description = "Empty cart, missing stock or invalid details"),
        (status = 429, description = "Too many checkout attempts")
    ),
    security((), ("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    owner: CartOwner,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<ApiResponse<CheckoutResponse>>> {
    let response = order_service::checkout(&state, &owner, user.as_ref(), payload).await?;
    Ok(Json(response))
}
