//! WebSocket transport for imagine runs.
//!
//! `GET /imagine/ws[?task_id=...]` upgrades to a text WebSocket.
//!
//! | Direction | Frame |
//! |---|---|
//! | Client → Server | `{"type":"start", prompt, aspect_ratio?, nsfw?, quantity?, concurrent?}` |
//! | Client → Server | `{"type":"stop"}` |
//! | Server → Client | imagine events (`status`, `image`, `error`, provider chunks) |
//!
//! One run is active per connection; `start` stops the previous run first.
//! Connecting with a live `task_id` skips the public key check and seeds
//! quantity/concurrent defaults from that session, which is dropped when
//! the socket closes.

use aigw_core::{ImagineEvent, ImagineSession, RunHandle, RunParams};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::imagine::{EVENT_BUFFER, ImagineRequest, default_limits};
use crate::middleware::auth::{bearer, check_public_key};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub task_id: Option<String>,
    pub public_key: Option<String>,
}

/// A parsed client frame.
#[derive(Debug, PartialEq)]
pub enum Control {
    Start(RunParams),
    Stop,
}

/// Parse one text frame. Errors come back as the event to send.
pub fn parse_control(raw: &str, session: Option<&ImagineSession>) -> Result<Control, ImagineEvent> {
    let invalid_payload = || ImagineEvent::error("invalid_payload", "Invalid message format.");
    let value: Value = serde_json::from_str(raw).map_err(|_| invalid_payload())?;
    if !value.is_object() {
        return Err(invalid_payload());
    }

    match value.get("type").and_then(Value::as_str) {
        Some("start") => {
            let request: ImagineRequest =
                serde_json::from_value(value).map_err(|_| invalid_payload())?;
            let defaults = session.map_or_else(default_limits, |s| (s.quantity, s.concurrent));
            request
                .normalize(defaults)
                .map(Control::Start)
                .map_err(|e| ImagineEvent::error(e.code(), e.to_string()))
        }
        Some("stop") => Ok(Control::Stop),
        _ => Err(ImagineEvent::error("invalid_action", "Unknown action.")),
    }
}

/// `GET /imagine/ws`
pub async fn imagine_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let presented = query
        .public_key
        .clone()
        .or_else(|| bearer(&headers).map(ToString::to_string));
    ws.on_upgrade(move |socket| handle_imagine_ws(socket, state, query.task_id, presented))
}

async fn handle_imagine_ws(
    mut socket: WebSocket,
    state: AppState,
    task_id: Option<String>,
    presented: Option<String>,
) {
    let session = task_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .and_then(|id| state.sessions.get(id));

    if session.is_none()
        && let Err(e) = check_public_key(&state.settings.auth, presented.as_deref())
    {
        debug!(error = %e, "Rejecting imagine WebSocket");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "Authentication failed".into(),
            })))
            .await;
        return;
    }

    info!(resumed = session.is_some(), "Imagine WebSocket opened");
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (events_tx, events_rx) = mpsc::channel::<ImagineEvent>(EVENT_BUFFER);

    let ingest_state = state.clone();
    let ingest_session = session.clone();
    let mut ingest = tokio::spawn(async move {
        let mut run: Option<RunHandle> = None;
        while let Some(msg) = ws_receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match parse_control(text.as_str(), ingest_session.as_ref()) {
                Ok(Control::Start(params)) => {
                    if let Some(previous) = run.take() {
                        previous.stop().await;
                    }
                    run = Some(ingest_state.orchestrator.spawn(params, events_tx.clone()));
                }
                Ok(Control::Stop) => {
                    if let Some(current) = run.take() {
                        current.stop().await;
                    }
                }
                Err(event) => {
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
        if let Some(current) = run.take() {
            current.stop().await;
        }
    });

    let mut egress = tokio::spawn(async move {
        let mut frames = ReceiverStream::new(events_rx)
            .map(|event| Ok::<_, axum::Error>(Message::Text(event.to_json().into())));
        if let Err(e) = ws_sender.send_all(&mut frames).await {
            debug!(error = %e, "Imagine WebSocket send failed");
        }
    });

    // Aborting ingest drops its run handle, which stops the run.
    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
    }

    if let Some(session) = session {
        state.sessions.drop_session(&session.id);
    }
    info!("Imagine WebSocket closed");
}
