//! Shared fixtures for router tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aigw_axum::{AppState, AxumContext, CorsConfig, GatewayPorts, create_router};
use aigw_core::ports::{
    GenerationError, GenerationOutput, GenerationService, ImageRequest, NsfwOutcome, TokenError,
    TokenMaintenance, UsageCheck,
};
use aigw_core::{GatewaySettings, StaticModelCatalog, StaticTokenPool};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use serde_json::{Map, Value, json};

/// Returns `n` list-mode images; prompts containing "reject" are refused
/// and prompts containing "slow" never finish.
pub struct FakeGeneration;

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn generate(
        &self,
        _token: &str,
        request: ImageRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        if request.prompt.contains("reject") {
            return Err(GenerationError::Rejected("prompt refused".into()));
        }
        if request.prompt.contains("slow") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(GenerationOutput::Images(
            (1..=request.n).map(|i| format!("img-{i}")).collect(),
        ))
    }
}

/// `good-*` tokens pass, `cf-*` hit a challenge, everything else fails.
pub struct FakeMaintenance;

#[async_trait]
impl TokenMaintenance for FakeMaintenance {
    async fn refresh_usage(&self, token: &str) -> Result<UsageCheck, TokenError> {
        if token.starts_with("good") {
            Ok(UsageCheck::ok())
        } else if token.starts_with("cf") {
            Ok(UsageCheck::failed(Some("cloudflare_challenge"), "Just a moment"))
        } else {
            Ok(UsageCheck::failed(Some("invalid_token"), "rejected"))
        }
    }

    async fn enable_nsfw(&self, _token: &str) -> Result<NsfwOutcome, TokenError> {
        Ok(NsfwOutcome {
            success: true,
            detail: Map::new(),
        })
    }
}

pub const APP_KEY: &str = "admin-secret";

/// Open public surface, admin behind [`APP_KEY`], one pooled token.
pub fn settings() -> GatewaySettings {
    let mut settings = GatewaySettings::default();
    settings.auth.app_key = Some(APP_KEY.to_string());
    settings.auth.public_enabled = true;
    settings.tokens = HashMap::from([("basic".to_string(), vec!["good-token".to_string()])]);
    settings
}

pub fn app(settings: GatewaySettings) -> (Router, AppState) {
    let ports = GatewayPorts {
        tokens: Arc::new(StaticTokenPool::new(&settings.tokens)),
        generation: Arc::new(FakeGeneration),
        maintenance: Arc::new(FakeMaintenance),
        models: Arc::new(StaticModelCatalog::from_settings(&settings.imagine)),
    };
    let state: AppState = Arc::new(AxumContext::from_parts(settings, ports));
    let router = create_router(Arc::clone(&state), &CorsConfig::AllowAll);
    (router, state)
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn admin_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    let mut request = json_request(method, uri, body);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {APP_KEY}").parse().unwrap(),
    );
    request
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// JSON payloads of every `data:` line in an SSE body.
pub fn sse_payloads(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap_or_else(|_| json!(null)))
        .collect()
}
