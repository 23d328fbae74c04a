//! Imagine session, SSE and gating behaviour through the full router.

mod common;

use axum::http::StatusCode;
use common::{app, body_json, body_text, get, json_request, settings, sse_payloads};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_health_check() {
    let (router, _) = app(settings());
    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-trace-id"));
    assert_eq!(body_text(response).await, "OK");
}

#[tokio::test]
async fn test_start_returns_normalized_session() {
    let (router, state) = app(settings());
    let response = router
        .oneshot(json_request(
            "POST",
            "/imagine/start",
            &json!({"prompt": "a fox", "aspect_ratio": "1280x720", "quantity": 4}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["aspect_ratio"], "16:9");
    assert_eq!(body["quantity"], 4);
    assert_eq!(body["concurrent"], 1);
    let task_id = body["task_id"].as_str().unwrap();
    assert!(state.sessions.contains(task_id));
}

#[tokio::test]
async fn test_start_validation_errors() {
    let (router, _) = app(settings());
    let cases = [
        (json!({"prompt": "  "}), "invalid_prompt"),
        (json!({"prompt": "fox", "quantity": 201}), "invalid_quantity"),
        (json!({"prompt": "fox", "concurrent": 0}), "invalid_concurrent"),
    ];
    for (body, code) in cases {
        let response = router
            .clone()
            .oneshot(json_request("POST", "/imagine/start", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], code);
    }
}

#[tokio::test]
async fn test_stop_removes_sessions() {
    let (router, state) = app(settings());
    let id = state.sessions.create("fox", "1:1", None, 0, 1);
    let response = router
        .oneshot(json_request(
            "POST",
            "/imagine/stop",
            &json!({"task_ids": [id, "missing"]}),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body, json!({"status": "success", "removed": 1}));
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn test_public_gate() {
    let mut closed = settings();
    closed.auth.public_enabled = false;
    let (router, _) = app(closed);
    let response = router
        .clone()
        .oneshot(json_request("POST", "/imagine/start", &json!({"prompt": "fox"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"]["message"],
        "Public access is disabled"
    );

    let mut keyed = settings();
    keyed.auth.public_key = Some("pk".into());
    let (router, _) = app(keyed);
    let mut request = json_request("POST", "/imagine/start", &json!({"prompt": "fox"}));
    request
        .headers_mut()
        .insert("authorization", "Bearer pk".parse().unwrap());
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(get("/imagine/sse?prompt=fox&public_key=wrong"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"]["message"],
        "Invalid authentication token"
    );
}

#[tokio::test]
async fn test_sse_unknown_task_is_not_found() {
    let (router, _) = app(settings());
    let response = router
        .oneshot(get("/imagine/sse?task_id=nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sse_inline_run_ends_with_stopped() {
    let (router, _) = app(settings());
    let response = router
        .oneshot(get("/imagine/sse?prompt=fox&quantity=2&concurrent=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let events = sse_payloads(&body_text(response).await);
    assert_eq!(events.first().unwrap()["status"], "running");
    let images: Vec<_> = events.iter().filter(|e| e["type"] == "image").collect();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["b64_json"], "img-1");
    assert_eq!(images[1]["sequence"], 2);

    let last = events.last().unwrap();
    assert_eq!(last["status"], "stopped");
    assert_eq!(last["reason"], "quantity_reached");
    let run_id = &events[0]["run_id"];
    assert!(events.iter().all(|e| &e["run_id"] == run_id));
}

#[tokio::test]
async fn test_sse_resume_drops_session() {
    let (router, state) = app(settings());
    let id = state.sessions.create("fox", "1:1", None, 1, 1);
    let response = router
        .oneshot(get(&format!("/imagine/sse?task_id={id}")))
        .await
        .unwrap();
    let events = sse_payloads(&body_text(response).await);
    assert_eq!(events.last().unwrap()["reason"], "quantity_reached");

    // The run drops its session on exit, just after the final frame.
    for _ in 0..50 {
        if !state.sessions.contains(&id) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("session {id} was not dropped");
}

#[tokio::test]
async fn test_rejected_prompt_stops_with_error() {
    let (router, _) = app(settings());
    let response = router
        .oneshot(get("/imagine/sse?prompt=reject+me"))
        .await
        .unwrap();
    let events = sse_payloads(&body_text(response).await);
    assert!(events.iter().any(|e| e["code"] == "invalid_request"));
    assert_eq!(events.last().unwrap()["reason"], "error");
}

#[tokio::test]
async fn test_config_reports_client_defaults() {
    let mut custom = settings();
    custom.imagine.nsfw_default = true;
    custom.imagine.final_min_bytes = 100_000;
    let (router, _) = app(custom);
    let response = router.oneshot(get("/imagine/config")).await.unwrap();
    assert_eq!(
        body_json(response).await,
        json!({"nsfw": true, "final_min_bytes": 100_000, "medium_min_bytes": 0})
    );
}
