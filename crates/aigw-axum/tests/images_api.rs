//! OpenAI-compatible image endpoint and ingress rate limiting.

mod common;

use std::collections::HashMap;

use axum::http::StatusCode;
use common::{app, body_json, json_request, settings};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_generations_returns_requested_format() {
    let (router, _) = app(settings());
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/images/generations",
            &json!({"prompt": "fox", "n": 2}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["created"].as_i64().is_some());
    assert_eq!(body["data"], json!([{"b64_json": "img-1"}, {"b64_json": "img-2"}]));

    let response = router
        .oneshot(json_request(
            "POST",
            "/v1/images/generations",
            &json!({"prompt": "fox", "response_format": "url"}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["data"], json!([{"url": "img-1"}]));
}

#[tokio::test]
async fn test_generations_validation() {
    let (router, _) = app(settings());
    let cases = [
        (json!({"prompt": ""}), "empty_prompt"),
        (json!({"prompt": "fox", "n": 11}), "invalid_n"),
        (json!({"prompt": "fox", "size": "10x10"}), "invalid_size"),
        (json!({"prompt": "fox", "model": "chat-1"}), "model_not_supported"),
        (
            json!({"prompt": "fox", "response_format": "png"}),
            "invalid_response_format",
        ),
    ];
    for (body, code) in cases {
        let response = router
            .clone()
            .oneshot(json_request("POST", "/v1/images/generations", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{code}");
        assert_eq!(body_json(response).await["error"]["code"], code);
    }
}

#[tokio::test]
async fn test_generations_without_tokens() {
    let mut empty = settings();
    empty.tokens = HashMap::new();
    let (router, _) = app(empty);
    let response = router
        .oneshot(json_request(
            "POST",
            "/v1/images/generations",
            &json!({"prompt": "fox"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("retry-after").is_none());
}

#[tokio::test]
async fn test_rate_limit_rejects_with_retry_after() {
    let mut limited = settings();
    limited.rate_limit.enabled = true;
    limited
        .rate_limit
        .route_limits
        .insert("/v1/images/generations".into(), 1);
    let (router, _) = app(limited);
    let request = || json_request("POST", "/v1/images/generations", &json!({"prompt": "fox"}));

    let first = router.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.clone().oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("x-trace-id"));
    let retry_after: u64 = second.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        body_json(second).await["error"]["code"],
        "rate_limit_exceeded"
    );

    // Outside the limited prefixes.
    let health = router.oneshot(common::get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_generations_require_api_key_when_enabled() {
    let mut gated = settings();
    gated.auth.auth_required = true;
    gated.auth.api_key = Some("sk-test".to_string());
    let (router, _) = app(gated);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/images/generations",
            &json!({"prompt": "fox"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");

    let mut request = json_request("POST", "/v1/images/generations", &json!({"prompt": "fox"}));
    request
        .headers_mut()
        .insert("authorization", "Bearer sk-test".parse().unwrap());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_required_api_key_without_value_is_unavailable() {
    let mut misconfigured = settings();
    misconfigured.auth.auth_required = true;
    let (router, _) = app(misconfigured);

    let response = router
        .oneshot(json_request(
            "POST",
            "/v1/images/generations",
            &json!({"prompt": "fox"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json(response).await["error"]["message"],
        "API authentication is enabled but app.api_key is empty"
    );
}
