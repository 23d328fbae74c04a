//! Admin token maintenance jobs.

use std::sync::Arc;

use aigw_core::{Task, collect_tokens};
use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::HttpError;
use crate::state::AppState;

/// `{token?, tokens?}`. A non-string `token` is ignored; list entries of
/// other types are stringified.
#[derive(Debug, Default, Deserialize)]
pub struct TokensRequest {
    pub token: Option<Value>,
    #[serde(default)]
    pub tokens: Vec<Value>,
}

impl TokensRequest {
    pub fn requested(&self) -> Vec<String> {
        let list: Vec<String> = self
            .tokens
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        collect_tokens(self.token.as_ref().and_then(Value::as_str), &list)
    }
}

fn accepted(task: &Arc<Task>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "task_id": task.id(),
        "total": task.total(),
    }))
}

/// `GET /verify`: the admin gate already checked the key.
pub async fn verify() -> Json<Value> {
    Json(json!({ "status": "success" }))
}

/// `POST /tokens/refresh`: runs the refresh inline and returns its summary.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<TokensRequest>,
) -> Result<Json<Value>, HttpError> {
    Ok(Json(state.jobs.refresh(body.requested()).await?))
}

/// `POST /tokens/nsfw/enable`
pub async fn enable_nsfw(
    State(state): State<AppState>,
    Json(body): Json<TokensRequest>,
) -> Result<Json<Value>, HttpError> {
    Ok(Json(state.jobs.enable_nsfw(body.requested()).await?))
}

/// `POST /tokens/refresh/async`
pub async fn refresh_async(
    State(state): State<AppState>,
    Json(body): Json<TokensRequest>,
) -> Result<Json<Value>, HttpError> {
    let task = state.jobs.start_refresh(body.requested())?;
    Ok(accepted(&task))
}

/// `POST /tokens/nsfw/enable/async`: every pooled token when none are given.
pub async fn enable_nsfw_async(
    State(state): State<AppState>,
    Json(body): Json<TokensRequest>,
) -> Result<Json<Value>, HttpError> {
    let task = state.jobs.start_nsfw(body.requested()).await?;
    Ok(accepted(&task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_tokens() {
        let body: TokensRequest = serde_json::from_value(json!({
            "token": " a ",
            "tokens": ["b", "a", "", 42, null]
        }))
        .unwrap();
        assert_eq!(body.requested(), vec!["a", "b", "42"]);

        let body: TokensRequest = serde_json::from_value(json!({"token": 7})).unwrap();
        assert!(body.requested().is_empty());
    }
}
