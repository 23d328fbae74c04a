//! Background task endpoints.

use std::time::Duration;

use aigw_core::TaskEvent;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub app_key: Option<String>,
}

fn task_not_found() -> HttpError {
    HttpError::NotFound("Task not found".to_string())
}

/// `GET /batch/{task_id}/stream`
///
/// Sends a `snapshot`, then either the cached terminal event or live events
/// until a terminal one. Idle gaps get a `: ping` comment.
pub async fn stream(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HttpError> {
    if let Some(expected) = state.settings.auth.app_key()
        && query.app_key.as_deref().map(str::trim) != Some(expected)
    {
        return Err(HttpError::Unauthorized(
            "Invalid authentication token".to_string(),
        ));
    }
    let task = state.registry.get(&task_id).ok_or_else(task_not_found)?;
    let keepalive = Duration::from_secs(state.settings.batch.keepalive_secs.max(1));

    // Attach before the snapshot so nothing published in between is lost.
    let mut subscription = task.attach();
    let events = async_stream::stream! {
        yield Event::default().json_data(TaskEvent::Snapshot(task.snapshot()));
        if let Some(last) = task.final_event() {
            yield Event::default().json_data(last);
            return;
        }
        loop {
            match tokio::time::timeout(keepalive, subscription.recv()).await {
                Ok(Some(event)) => {
                    let terminal = event.is_terminal();
                    yield Event::default().json_data(event);
                    if terminal {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    if let Some(last) = task.final_event() {
                        yield Event::default().json_data(last);
                        break;
                    }
                    yield Ok(Event::default().comment("ping"));
                }
            }
        }
    };
    Ok(Sse::new(events))
}

/// `POST /batch/{task_id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    if !state.registry.cancel(&task_id) {
        return Err(task_not_found());
    }
    tracing::info!(%task_id, "Task cancellation requested");
    Ok(Json(json!({ "status": "success" })))
}
