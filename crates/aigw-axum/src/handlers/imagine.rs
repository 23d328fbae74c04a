//! Imagine session endpoints and the SSE transport.

use std::convert::Infallible;

use aigw_core::imagine::params::{
    loose_bool, normalize_concurrent, normalize_prompt, normalize_quantity, parse_flag,
    resolve_aspect_ratio,
};
use aigw_core::{ImagineEvent, ParamError, RunHandle, RunParams};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::HttpError;
use crate::middleware::auth::{bearer, check_public_key};
use crate::state::AppState;

/// Capacity of the per-connection event buffer.
pub(crate) const EVENT_BUFFER: usize = 64;

const DEFAULT_QUANTITY: u32 = 0;
const DEFAULT_CONCURRENT: u32 = 1;

/// Run parameters as clients send them: loosely typed, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImagineRequest {
    pub prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub nsfw: Option<Value>,
    pub quantity: Option<Value>,
    pub concurrent: Option<Value>,
}

impl ImagineRequest {
    /// Validate into run parameters, filling quantity and concurrent from
    /// `defaults` when absent.
    pub fn normalize(&self, defaults: (u32, u32)) -> Result<RunParams, ParamError> {
        let prompt = normalize_prompt(self.prompt.as_deref())?;
        let quantity = normalize_quantity(self.quantity.as_ref(), defaults.0)?;
        let concurrent = normalize_concurrent(self.concurrent.as_ref(), defaults.1)?;
        Ok(RunParams {
            prompt,
            aspect_ratio: resolve_aspect_ratio(self.aspect_ratio.as_deref().unwrap_or_default())
                .to_string(),
            nsfw: loose_bool(self.nsfw.as_ref()),
            quantity,
            concurrent,
            session_id: None,
        })
    }
}

pub(crate) const fn default_limits() -> (u32, u32) {
    (DEFAULT_QUANTITY, DEFAULT_CONCURRENT)
}

/// `POST /imagine/start`: store a session for a later SSE or WS connection.
pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<ImagineRequest>,
) -> Result<Json<Value>, HttpError> {
    let params = body.normalize(default_limits())?;
    let task_id = state.sessions.create(
        &params.prompt,
        &params.aspect_ratio,
        params.nsfw,
        params.quantity,
        params.concurrent,
    );
    Ok(Json(json!({
        "task_id": task_id,
        "aspect_ratio": params.aspect_ratio,
        "quantity": params.quantity,
        "concurrent": params.concurrent,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub task_ids: Vec<String>,
}

/// `POST /imagine/stop`: drop sessions. Unknown ids are ignored.
pub async fn stop(State(state): State<AppState>, Json(body): Json<StopRequest>) -> Json<Value> {
    let removed = state.sessions.drop_many(&body.task_ids);
    Json(json!({ "status": "success", "removed": removed }))
}

/// `GET /imagine/config`: client defaults for the imagine page.
pub async fn config(State(state): State<AppState>) -> Json<Value> {
    let imagine = &state.settings.imagine;
    Json(json!({
        "nsfw": imagine.nsfw_default,
        "final_min_bytes": imagine.final_min_bytes,
        "medium_min_bytes": imagine.medium_min_bytes,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SseQuery {
    pub task_id: Option<String>,
    pub prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub nsfw: Option<String>,
    pub quantity: Option<String>,
    pub concurrent: Option<String>,
    pub public_key: Option<String>,
}

impl SseQuery {
    fn inline_params(&self) -> Result<RunParams, ParamError> {
        let request = ImagineRequest {
            prompt: self.prompt.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            nsfw: None,
            quantity: self.quantity.clone().map(Value::String),
            concurrent: self.concurrent.clone().map(Value::String),
        };
        let mut params = request.normalize(default_limits())?;
        params.nsfw = self.nsfw.as_deref().map(parse_flag);
        Ok(params)
    }
}

/// `GET /imagine/sse`: run over server-sent events.
///
/// With `task_id` the stored session is resumed and dropped when the run
/// ends. Without it the run parameters come from the query string and the
/// public key gate applies.
pub async fn sse(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpError> {
    let task_id = query.task_id.as_deref().filter(|id| !id.trim().is_empty());
    let params = if let Some(task_id) = task_id {
        let session = state
            .sessions
            .get(task_id)
            .ok_or_else(|| HttpError::NotFound("Task not found".to_string()))?;
        RunParams {
            prompt: session.prompt,
            aspect_ratio: session.aspect_ratio,
            nsfw: session.nsfw,
            quantity: session.quantity,
            concurrent: session.concurrent,
            session_id: Some(session.id),
        }
    } else {
        let presented = query.public_key.as_deref().or_else(|| bearer(&headers));
        check_public_key(&state.settings.auth, presented)?;
        query.inline_params()?
    };

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let handle = state.orchestrator.spawn(params, tx);
    Ok(Sse::new(run_events(handle, rx)))
}

/// Forward run events until `stopped`. Dropping the stream drops the
/// handle, which stops the run.
fn run_events(
    handle: RunHandle,
    mut rx: mpsc::Receiver<ImagineEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _handle = handle;
        while let Some(event) = rx.recv().await {
            let stopped = event.is_stopped();
            yield Ok(Event::default().data(event.to_json()));
            if stopped {
                break;
            }
        }
    }
}
