mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use storefront_api::{
    gateway::{IntentStatus, webhook::sign_payload},
    middleware::{auth::SESSION_HEADER, rate_limit::LIMIT_EXCEEDED_BODY},
    routes::{build_app, webhooks::SIGNATURE_HEADER},
};
use tower::ServiceExt;

use common::{bearer, create_product, create_user, setup, setup_with};

const WEBHOOK_SECRET: &str = "whsec_test";

async fn send(app: &Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Vec<u8>)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes().to_vec();
    Ok((status, body))
}

fn json_request(method: &str, uri: &str, body: Value) -> anyhow::Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(SESSION_HEADER, "guest-session")
        .body(Body::from(body.to_string()))?)
}

#[tokio::test]
async fn checkout_is_throttled_per_client() -> anyhow::Result<()> {
    let app = setup_with(|config| config.rate_limit.max_requests = 2).await?;
    let router = build_app(app.state.clone());

    for _ in 0..2 {
        let (status, _) = send(&router, json_request("POST", "/api/checkout", json!({}))?).await?;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/checkout", json!({}))?)
        .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(&body[..], LIMIT_EXCEEDED_BODY.as_bytes());

    let (status, _) = send(
        &router,
        Request::builder().uri("/api/products").body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}


#[tokio::test]
async fn rotating_forwarded_for_does_not_reset_the_budget() -> anyhow::Result<()> {
    let app = setup_with(|config| config.rate_limit.max_requests = 2).await?;
    let router = build_app(app.state.clone());

    let mut statuses = Vec::new();
    for n in 0..3 {
        let mut request = json_request("POST", "/api/checkout", json!({}))?;
        request
            .headers_mut()
            .insert("x-forwarded-for", format!("198.51.100.{n}").parse()?);
        let (status, _) = send(&router, request).await?;
        statuses.push(status);
    }
    assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_separates_forwarded_clients() -> anyhow::Result<()> {
    let app = setup_with(|config| {
        config.rate_limit.max_requests = 1;
        config.rate_limit.trust_proxy = true;
    })
    .await?;
    let router = build_app(app.state.clone());

    for n in 0..3 {
        let mut request = json_request("POST", "/api/checkout", json!({}))?;
        request
            .headers_mut()
            .insert("x-forwarded-for", format!("198.51.100.{n}").parse()?);
        let (status, _) = send(&router, request).await?;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(())
}
#[tokio::test]
async fn guest_checkout_over_http() -> anyhow::Result<()> {
    let app = setup().await?;
    let product = create_product(app.db(), "Sticker Pack", 1_000, 3).await?;
    let router = build_app(app.state.clone());

    let (status, _) = send(
        &router,
        json_request(
            "POST",
            "/api/cart/items",
            json!({ "product_id": product.id, "quantity": 2 }),
        )?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, json_request("POST", "/api/checkout", json!({}))?).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["data"]["details"][0], "Email can't be blank");

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/checkout",
            json!({ "email": "guest@example.com" }),
        )?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["data"]["order"]["total"], 2_000 + 170 + 999);
    assert_eq!(json["data"]["order"]["payment_status"], "payment_pending");
    assert!(json["data"]["client_secret"].is_string());

    let (status, body) = send(
        &router,
        Request::builder()
            .uri("/api/cart")
            .header(SESSION_HEADER, "guest-session")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["data"]["items"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn webhook_requires_a_valid_signature() -> anyhow::Result<()> {
    let app = setup_with(|config| {
        config.payment.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await?;
    let user = create_user(app.db(), "hooked@example.com", "user").await?;
    let product = create_product(app.db(), "Ferris Mug", 2_500, 5).await?;
    let router = build_app(app.state.clone());

    let (status, _) = send(
        &router,
        Request::builder()
            .method("POST")
            .uri("/api/cart/items")
            .header(header::AUTHORIZATION, bearer(&user))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "product_id": product.id, "quantity": 1 }).to_string(),
            ))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        Request::builder()
            .method("POST")
            .uri("/api/checkout")
            .header(header::AUTHORIZATION, bearer(&user))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body)?;
    let intent_id = json["data"]["order"]["payment_intent_id"]
        .as_str()
        .expect("intent id")
        .to_string();
    app.gateway.set_intent_status(&intent_id, IntentStatus::Succeeded);

    let payload = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": intent_id, "object": "payment_intent" } }
    })
    .to_string();
    let webhook = |signature: String| {
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(payload.clone()))
    };

    let now = chrono::Utc::now().timestamp();
    let forged = sign_payload(payload.as_bytes(), "wrong-secret", now);
    let (status, _) = send(&router, webhook(forged)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.mailer.sent().len(), 0);

    let signed = sign_payload(payload.as_bytes(), WEBHOOK_SECRET, now);
    let (status, body) = send(&router, webhook(signed)?).await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["data"]["paid"], true);
    assert_eq!(app.mailer.sent().len(), 1);
    Ok(())
}

#[tokio::test]
async fn orders_need_a_token_and_admin_routes_need_the_admin_role() -> anyhow::Result<()> {
    let app = setup().await?;
    let user = create_user(app.db(), "plain@example.com", "user").await?;
    let admin = create_user(app.db(), "boss@example.com", "admin").await?;
    let router = build_app(app.state.clone());

    let (status, _) = send(
        &router,
        Request::builder().uri("/api/orders").body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &router,
        Request::builder()
            .uri("/api/orders")
            .header(header::AUTHORIZATION, bearer(&user))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &router,
        Request::builder()
            .uri("/api/admin/orders")
            .header(header::AUTHORIZATION, bearer(&user))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &router,
        Request::builder()
            .uri("/api/admin/orders?page=1&per_page=5")
            .header(header::AUTHORIZATION, bearer(&admin))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["meta"]["per_page"], 5);
    Ok(())
}
