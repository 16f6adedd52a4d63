mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use storefront_api::routes::build_app;
use tower::ServiceExt;

#[tokio::test]
async fn health_check_reports_database_and_gateway() -> anyhow::Result<()> {
    let app = common::setup().await?;
    let response = build_app(app.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = response.into_body().collect().await?.to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(json["message"], "Health check");
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["database"], "up");
    assert_eq!(json["data"]["gateway"], "sandbox");
    Ok(())
}

#[tokio::test]
async fn unknown_routes_are_404() -> anyhow::Result<()> {
    let app = common::setup().await?;
    let response = build_app(app.state.clone())
        .oneshot(Request::builder().uri("/nope").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
