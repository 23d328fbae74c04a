//! Round-based continuous generation.
//!
//! One run per transport connection. Each round draws a token, asks the
//! generation backend for up to `concurrent` images and forwards what comes
//! back. Runs end on quantity, on an external stop, or on an error that
//! retrying cannot fix; every run that still has a listener ends with
//! exactly one `stopped` status.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{ImagePayload, ImagineEvent, RunStatus, StopReason};
use super::session::SessionStore;
use crate::ports::{
    GenerationOutput, GenerationService, ImageRequest, ModelCatalog, ModelInfo, TokenManager,
    acquire_token,
};
use crate::settings::ImagineSettings;

/// Size sent upstream; the aspect ratio carries the real shape.
const REQUEST_SIZE: &str = "1024x1024";
const RESPONSE_FORMAT: &str = "b64_json";

/// Parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub prompt: String,
    pub aspect_ratio: String,
    pub nsfw: Option<bool>,
    /// 0 means unbounded.
    pub quantity: u32,
    pub concurrent: u32,
    /// Session polled before each round and dropped when the run ends.
    pub session_id: Option<String>,
}

/// What a finished run reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub reason: StopReason,
    pub generated_count: u32,
    pub rounds: u32,
    /// The listener went away before the run ended.
    pub disconnected: bool,
}

/// A spawned run. Dropping the handle stops the run.
#[derive(Debug)]
pub struct RunHandle {
    stop: CancellationToken,
    join: Option<JoinHandle<RunSummary>>,
}

impl RunHandle {
    /// Stop the run and wait for its teardown.
    pub async fn stop(mut self) -> Option<RunSummary> {
        self.stop.cancel();
        self.join.take()?.await.ok()
    }

    /// Wait for the run to end on its own.
    pub async fn finished(mut self) -> Option<RunSummary> {
        self.join.take()?.await.ok()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Drives imagine runs against the token pool and generation backend.
pub struct ImagineOrchestrator {
    tokens: Arc<dyn TokenManager>,
    generation: Arc<dyn GenerationService>,
    models: Arc<dyn ModelCatalog>,
    sessions: Arc<SessionStore>,
    settings: ImagineSettings,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ImagineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagineOrchestrator")
            .field("settings", &self.settings)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ImagineOrchestrator {
    pub fn new(
        tokens: Arc<dyn TokenManager>,
        generation: Arc<dyn GenerationService>,
        models: Arc<dyn ModelCatalog>,
        sessions: Arc<SessionStore>,
        settings: ImagineSettings,
    ) -> Self {
        Self {
            tokens,
            generation,
            models,
            sessions,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub const fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub const fn settings(&self) -> &ImagineSettings {
        &self.settings
    }

    /// A stop token that also fires on [`ImagineOrchestrator::shutdown`].
    pub fn stop_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Stop every run, current and future.
    pub fn shutdown(&self) {
        tracing::info!("Stopping all imagine runs");
        self.shutdown.cancel();
    }

    /// Spawn a run that pushes its events into `sink`.
    pub fn spawn(self: &Arc<Self>, params: RunParams, sink: mpsc::Sender<ImagineEvent>) -> RunHandle {
        let stop = self.stop_token();
        let this = Arc::clone(self);
        let run_stop = stop.clone();
        let join = tokio::spawn(async move { this.run(params, run_stop, sink).await });
        RunHandle {
            stop,
            join: Some(join),
        }
    }

    /// Drive one run to completion.
    pub async fn run(
        &self,
        params: RunParams,
        stop: CancellationToken,
        sink: mpsc::Sender<ImagineEvent>,
    ) -> RunSummary {
        let session_id = params.session_id.clone();
        let summary = Run::new(self, params, stop, sink).execute().await;
        if let Some(id) = session_id {
            self.sessions.drop_session(&id);
        }
        tracing::info!(
            run_id = %summary.run_id,
            reason = ?summary.reason,
            generated = summary.generated_count,
            rounds = summary.rounds,
            disconnected = summary.disconnected,
            "Imagine run ended"
        );
        summary
    }
}

enum RoundEnd {
    Completed,
    Cancelled,
    Disconnected,
}

/// Per-run state. Counters only move forward.
struct Run<'a> {
    orchestrator: &'a ImagineOrchestrator,
    params: RunParams,
    stop: CancellationToken,
    sink: mpsc::Sender<ImagineEvent>,
    run_id: String,
    target: u32,
    batch_size: u32,
    generated: u32,
    sequence: u32,
    rounds: u32,
}

impl<'a> Run<'a> {
    fn new(
        orchestrator: &'a ImagineOrchestrator,
        params: RunParams,
        stop: CancellationToken,
        sink: mpsc::Sender<ImagineEvent>,
    ) -> Self {
        let target = params.quantity;
        let batch_size = params.concurrent.max(1);
        Self {
            orchestrator,
            params,
            stop,
            sink,
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            target,
            batch_size,
            generated: 0,
            sequence: 0,
            rounds: 0,
        }
    }

    /// Push one event; false once the listener is gone.
    async fn emit(&self, event: ImagineEvent) -> bool {
        self.sink.send(event).await.is_ok()
    }

    fn quantity_reached(&self) -> bool {
        self.target > 0 && self.generated >= self.target
    }

    fn request_n(&self) -> u32 {
        if self.target == 0 {
            self.batch_size
        } else {
            self.batch_size.min(self.target - self.generated).max(1)
        }
    }

    /// Sleep unless stopped first; false when stopped.
    async fn backoff(&self, millis: u64) -> bool {
        tokio::select! {
            () = self.stop.cancelled() => false,
            () = tokio::time::sleep(Duration::from_millis(millis)) => true,
        }
    }

    fn session_alive(&self) -> bool {
        self.params
            .session_id
            .as_deref()
            .is_none_or(|id| self.orchestrator.sessions.contains(id))
    }

    fn summary(&self, reason: StopReason, disconnected: bool) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            reason,
            generated_count: self.generated,
            rounds: self.rounds,
            disconnected,
        }
    }

    async fn finish(&self, reason: StopReason) -> RunSummary {
        let delivered = self
            .emit(ImagineEvent::Status(RunStatus::Stopped {
                run_id: self.run_id.clone(),
                reason,
                generated_count: self.generated,
                target_count: self.target,
            }))
            .await;
        self.summary(reason, !delivered)
    }

    async fn execute(mut self) -> RunSummary {
        let orchestrator = self.orchestrator;
        let settings = &orchestrator.settings;
        let model = orchestrator
            .models
            .get(&settings.model_id)
            .filter(|m| m.is_image);
        let Some(model) = model else {
            tracing::warn!(model = %settings.model_id, "Image model is not available");
            if !self
                .emit(ImagineEvent::error(
                    "model_not_supported",
                    "Image model is not available.",
                ))
                .await
            {
                return self.summary(StopReason::Error, true);
            }
            return self.finish(StopReason::Error).await;
        };

        let running = ImagineEvent::Status(RunStatus::Running {
            prompt: self.params.prompt.clone(),
            aspect_ratio: self.params.aspect_ratio.clone(),
            run_id: self.run_id.clone(),
            target_count: self.target,
            batch_size: self.batch_size,
        });
        if !self.emit(running).await {
            return self.summary(StopReason::Stopped, true);
        }
        tracing::info!(
            run_id = %self.run_id,
            target = self.target,
            batch_size = self.batch_size,
            "Imagine run started"
        );

        let reason = loop {
            if self.stop.is_cancelled() || !self.session_alive() {
                break StopReason::Stopped;
            }
            if self.quantity_reached() {
                break StopReason::QuantityReached;
            }

            let request_n = self.request_n();
            let token = tokio::select! {
                () = self.stop.cancelled() => break StopReason::Stopped,
                token = acquire_token(
                    orchestrator.tokens.as_ref(),
                    &model.pool_candidates,
                ) => token,
            };
            let Some(token) = token else {
                tracing::debug!(run_id = %self.run_id, "No token available, backing off");
                let sent = self
                    .emit(ImagineEvent::error(
                        "rate_limit_exceeded",
                        "No available tokens. Please try again later.",
                    ))
                    .await;
                if !sent {
                    return self.summary(StopReason::Stopped, true);
                }
                if !self.backoff(settings.token_backoff_ms).await {
                    break StopReason::Stopped;
                }
                continue;
            };

            match self.round(&model, &token, request_n).await {
                Ok(RoundEnd::Completed) => {}
                Ok(RoundEnd::Cancelled) => break StopReason::Stopped,
                Ok(RoundEnd::Disconnected) => {
                    return self.summary(StopReason::Stopped, true);
                }
                Err(e) => {
                    tracing::warn!(run_id = %self.run_id, error = %e, "Imagine round failed");
                    if !self.emit(ImagineEvent::error(e.code(), e.to_string())).await {
                        return self.summary(StopReason::Stopped, true);
                    }
                    if !e.is_retryable() {
                        break StopReason::Error;
                    }
                    if !self.backoff(settings.error_backoff_ms).await {
                        break StopReason::Stopped;
                    }
                    continue;
                }
            }

            let round_done = ImagineEvent::Status(RunStatus::RoundDone {
                run_id: self.run_id.clone(),
                round: self.rounds,
                generated_count: self.generated,
                target_count: self.target,
                request_n,
            });
            if !self.emit(round_done).await {
                return self.summary(StopReason::Stopped, true);
            }
            if self.quantity_reached() {
                break StopReason::QuantityReached;
            }
        };

        self.finish(reason).await
    }

    /// One generation call and the events it yields.
    async fn round(
        &mut self,
        model: &ModelInfo,
        token: &str,
        request_n: u32,
    ) -> Result<RoundEnd, crate::ports::GenerationError> {
        // Counts generation calls only; passes that found no token are not rounds.
        self.rounds += 1;
        let request = ImageRequest {
            model_id: model.model_id.clone(),
            prompt: self.params.prompt.clone(),
            n: request_n,
            aspect_ratio: self.params.aspect_ratio.clone(),
            size: REQUEST_SIZE.to_string(),
            response_format: RESPONSE_FORMAT.to_string(),
            stream: true,
            nsfw: self.params.nsfw,
        };
        tracing::debug!(run_id = %self.run_id, round = self.rounds, request_n, "Imagine round");

        let generation = Arc::clone(&self.orchestrator.generation);
        let output = tokio::select! {
            () = self.stop.cancelled() => return Ok(RoundEnd::Cancelled),
            output = generation.generate(token, request) => output?,
        };

        match output {
            GenerationOutput::Images(images) => {
                let images: Vec<String> = images
                    .into_iter()
                    .filter(|img| !img.is_empty() && img != "error")
                    .collect();
                if images.is_empty() {
                    let sent = self
                        .emit(ImagineEvent::error(
                            "empty_image",
                            "Image generation returned empty data.",
                        ))
                        .await;
                    return Ok(if sent {
                        RoundEnd::Completed
                    } else {
                        RoundEnd::Disconnected
                    });
                }
                for b64_json in images {
                    self.sequence += 1;
                    let image = ImagineEvent::Image(ImagePayload {
                        b64_json,
                        sequence: self.sequence,
                        created_at: chrono::Utc::now().timestamp_millis(),
                        aspect_ratio: self.params.aspect_ratio.clone(),
                        run_id: self.run_id.clone(),
                    });
                    if !self.emit(image).await {
                        return Ok(RoundEnd::Disconnected);
                    }
                    self.generated += 1;
                    if self.quantity_reached() {
                        break;
                    }
                }
            }
            GenerationOutput::Stream(mut stream) => loop {
                let next = tokio::select! {
                    () = self.stop.cancelled() => return Ok(RoundEnd::Cancelled),
                    next = stream.next() => next,
                };
                let Some(mut event) = next.transpose()? else {
                    break;
                };
                event.set_default("run_id", self.run_id.clone());
                let is_final = event.is_final_image();
                if !self.emit(ImagineEvent::Upstream(event)).await {
                    return Ok(RoundEnd::Disconnected);
                }
                if is_final {
                    self.generated += 1;
                    if self.quantity_reached() {
                        break;
                    }
                }
            },
        }
        Ok(RoundEnd::Completed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::ports::{GenerationError, ProviderEvent, StaticModelCatalog};
    use crate::tokens::StaticTokenPool;

    #[derive(Clone, Copy)]
    enum Mode {
        List,
        Stream,
        Empty,
        Fail { retryable: bool },
    }

    struct FakeGeneration {
        mode: Mode,
        calls: Mutex<Vec<u32>>,
        /// Calls past this many never return.
        block_after: Option<usize>,
    }

    impl FakeGeneration {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: Mutex::new(Vec::new()),
                block_after: None,
            })
        }

        fn blocking_after(mode: Mode, calls: usize) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: Mutex::new(Vec::new()),
                block_after: Some(calls),
            })
        }

        fn requested(&self) -> Vec<u32> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn provider_event(value: serde_json::Value) -> ProviderEvent {
        match value {
            serde_json::Value::Object(map) => ProviderEvent(map),
            _ => unreachable!(),
        }
    }

    #[async_trait]
    impl GenerationService for FakeGeneration {
        async fn generate(
            &self,
            _token: &str,
            request: ImageRequest,
        ) -> Result<GenerationOutput, GenerationError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(request.n);
                calls.len()
            };
            if self.block_after.is_some_and(|limit| call > limit) {
                std::future::pending::<()>().await;
            }
            match self.mode {
                Mode::List => Ok(GenerationOutput::Images(
                    (0..request.n).map(|i| format!("img-{i}")).collect(),
                )),
                Mode::Empty => Ok(GenerationOutput::Images(vec![
                    String::new(),
                    "error".to_string(),
                ])),
                Mode::Stream => {
                    let mut events = Vec::new();
                    for i in 0..request.n {
                        events.push(Ok(provider_event(json!({"type": "progress", "stage": "medium"}))));
                        events.push(Ok(provider_event(json!({"type": "image", "b64_json": format!("s-{i}")}))));
                    }
                    Ok(GenerationOutput::Stream(stream::iter(events).boxed()))
                }
                Mode::Fail { retryable: true } => {
                    Err(GenerationError::Transport("connection reset".into()))
                }
                Mode::Fail { retryable: false } => {
                    Err(GenerationError::ModelNotSupported("imagine-1.0".into()))
                }
            }
        }
    }

    fn pool(tokens: &[&str]) -> Arc<StaticTokenPool> {
        let mut config = HashMap::new();
        config.insert(
            "basic".to_string(),
            tokens.iter().map(|t| (*t).to_string()).collect(),
        );
        Arc::new(StaticTokenPool::new(&config))
    }

    fn orchestrator_with(
        generation: Arc<FakeGeneration>,
        tokens: Arc<StaticTokenPool>,
        catalog: StaticModelCatalog,
    ) -> Arc<ImagineOrchestrator> {
        Arc::new(ImagineOrchestrator::new(
            tokens,
            generation,
            Arc::new(catalog),
            Arc::new(SessionStore::new(Duration::from_secs(600))),
            ImagineSettings::default(),
        ))
    }

    fn orchestrator(generation: Arc<FakeGeneration>) -> Arc<ImagineOrchestrator> {
        let catalog = StaticModelCatalog::from_settings(&ImagineSettings::default());
        orchestrator_with(generation, pool(&["tok-a"]), catalog)
    }

    fn params(quantity: u32, concurrent: u32) -> RunParams {
        RunParams {
            prompt: "a lighthouse".into(),
            aspect_ratio: "2:3".into(),
            nsfw: None,
            quantity,
            concurrent,
            session_id: None,
        }
    }

    async fn run_to_end(
        orchestrator: &Arc<ImagineOrchestrator>,
        params: RunParams,
    ) -> (Vec<ImagineEvent>, RunSummary) {
        let (tx, mut rx) = mpsc::channel(256);
        let summary = orchestrator
            .run(params, orchestrator.stop_token(), tx)
            .await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (events, summary)
    }

    fn stopped(events: &[ImagineEvent]) -> (StopReason, u32) {
        let stops: Vec<_> = events.iter().filter(|e| e.is_stopped()).collect();
        assert_eq!(stops.len(), 1, "exactly one stopped event");
        assert!(events.last().unwrap().is_stopped(), "stopped is last");
        match stops[0] {
            ImagineEvent::Status(RunStatus::Stopped {
                reason,
                generated_count,
                ..
            }) => (*reason, *generated_count),
            _ => unreachable!(),
        }
    }

    fn round_sizes(events: &[ImagineEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                ImagineEvent::Status(RunStatus::RoundDone { request_n, .. }) => Some(*request_n),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_image_single_round() {
        let generation = FakeGeneration::new(Mode::List);
        let orchestrator = orchestrator(Arc::clone(&generation));

        let (events, summary) = run_to_end(&orchestrator, params(1, 3)).await;

        assert!(matches!(
            events[0],
            ImagineEvent::Status(RunStatus::Running { target_count: 1, batch_size: 3, .. })
        ));
        assert_eq!(round_sizes(&events), vec![1]);
        assert_eq!(stopped(&events), (StopReason::QuantityReached, 1));
        assert_eq!(summary.rounds, 1);
        assert_eq!(generation.requested(), vec![1]);
    }

    #[tokio::test]
    async fn test_round_sizes_respect_remaining_quantity() {
        let generation = FakeGeneration::new(Mode::List);
        let orchestrator = orchestrator(Arc::clone(&generation));

        let (events, summary) = run_to_end(&orchestrator, params(8, 3)).await;

        assert_eq!(round_sizes(&events), vec![3, 3, 2]);
        assert_eq!(generation.requested(), vec![3, 3, 2]);
        assert_eq!(stopped(&events), (StopReason::QuantityReached, 8));
        assert_eq!(summary.generated_count, 8);

        let sequences: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ImagineEvent::Image(image) => Some(image.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unbounded_run_stops_after_external_stop() {
        let generation = FakeGeneration::blocking_after(Mode::List, 1);
        let orchestrator = orchestrator(Arc::clone(&generation));
        let (tx, mut rx) = mpsc::channel(64);
        let handle = orchestrator.spawn(params(0, 2), tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let round_done = matches!(event, ImagineEvent::Status(RunStatus::RoundDone { .. }));
            events.push(event);
            if round_done {
                break;
            }
        }
        let summary = handle.stop().await.unwrap();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(stopped(&events), (StopReason::Stopped, 2));
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(summary.generated_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_exhaustion_backs_off() {
        let generation = FakeGeneration::new(Mode::List);
        let catalog = StaticModelCatalog::from_settings(&ImagineSettings::default());
        let orchestrator = orchestrator_with(generation, pool(&[]), catalog);
        let (tx, mut rx) = mpsc::channel(64);
        let handle = orchestrator.spawn(params(0, 1), tx);

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let event = rx.recv().await.unwrap();
            if event.error_code() == Some("rate_limit_exceeded") {
                seen.push(Instant::now());
            }
        }
        for pair in seen.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }

        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(summary.generated_count, 0);
    }

    #[tokio::test]
    async fn test_missing_model_ends_with_error() {
        let generation = FakeGeneration::new(Mode::List);
        let orchestrator =
            orchestrator_with(Arc::clone(&generation), pool(&["t"]), StaticModelCatalog::default());

        let (events, _) = run_to_end(&orchestrator, params(1, 1)).await;

        assert_eq!(events[0].error_code(), Some("model_not_supported"));
        assert_eq!(stopped(&events), (StopReason::Error, 0));
        assert!(generation.requested().is_empty());
    }

    #[tokio::test]
    async fn test_stream_mode_counts_final_images() {
        let orchestrator = orchestrator(FakeGeneration::new(Mode::Stream));

        let (events, summary) = run_to_end(&orchestrator, params(3, 2)).await;

        assert_eq!(summary.generated_count, 3);
        assert_eq!(round_sizes(&events), vec![2, 1]);
        let upstream: Vec<&ProviderEvent> = events
            .iter()
            .filter_map(|e| match e {
                ImagineEvent::Upstream(event) => Some(event),
                _ => None,
            })
            .collect();
        assert!(!upstream.is_empty());
        assert!(upstream.iter().all(|e| e.0.get("run_id") == Some(&json!(summary.run_id))));
    }

    #[tokio::test]
    async fn test_empty_result_reports_empty_image() {
        let generation = FakeGeneration::blocking_after(Mode::Empty, 1);
        let orchestrator = orchestrator(generation);
        let (tx, mut rx) = mpsc::channel(64);
        let handle = orchestrator.spawn(params(2, 1), tx);

        let mut codes = Vec::new();
        while let Some(event) = rx.recv().await {
            if let Some(code) = event.error_code() {
                codes.push(code.to_string());
            }
            if matches!(event, ImagineEvent::Status(RunStatus::RoundDone { generated_count: 0, .. })) {
                break;
            }
        }
        assert_eq!(codes, vec!["empty_image"]);
        drop(handle);
    }

    #[tokio::test]
    async fn test_non_retryable_error_ends_run() {
        let orchestrator = orchestrator(FakeGeneration::new(Mode::Fail { retryable: false }));

        let (events, _) = run_to_end(&orchestrator, params(0, 1)).await;

        assert!(events.iter().any(|e| e.error_code() == Some("model_not_supported")));
        assert_eq!(stopped(&events), (StopReason::Error, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_keeps_running() {
        let generation = FakeGeneration::new(Mode::Fail { retryable: true });
        let orchestrator = orchestrator(Arc::clone(&generation));
        let (tx, mut rx) = mpsc::channel(64);
        let handle = orchestrator.spawn(params(0, 1), tx);

        let mut errors = 0;
        while errors < 2 {
            if rx.recv().await.unwrap().error_code() == Some("internal_error") {
                errors += 1;
            }
        }
        assert!(generation.requested().len() >= 2);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_session_stops_before_next_round() {
        let generation = FakeGeneration::blocking_after(Mode::List, 0);
        let orchestrator = orchestrator(Arc::clone(&generation));
        let session_id = orchestrator.sessions().create("p", "2:3", None, 0, 1);
        orchestrator.sessions().drop_session(&session_id);

        let mut run = params(0, 1);
        run.session_id = Some(session_id.clone());
        let (events, summary) = run_to_end(&orchestrator, run).await;

        assert_eq!(stopped(&events), (StopReason::Stopped, 0));
        assert_eq!(summary.rounds, 0);
        assert!(generation.requested().is_empty());
    }

    #[tokio::test]
    async fn test_run_drops_its_session_on_exit() {
        let orchestrator = orchestrator(FakeGeneration::new(Mode::List));
        let session_id = orchestrator.sessions().create("p", "2:3", None, 1, 1);

        let mut run = params(1, 1);
        run.session_id = Some(session_id.clone());
        let (_, summary) = run_to_end(&orchestrator, run).await;

        assert_eq!(summary.reason, StopReason::QuantityReached);
        assert!(orchestrator.sessions().get(&session_id).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_active_runs() {
        let orchestrator = orchestrator(FakeGeneration::blocking_after(Mode::List, 0));
        let (tx, mut rx) = mpsc::channel(64);
        let handle = orchestrator.spawn(params(0, 1), tx);

        orchestrator.shutdown();
        let summary = handle.finished().await.unwrap();
        assert_eq!(summary.reason, StopReason::Stopped);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(last.unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_closed_listener_ends_run_silently() {
        let orchestrator = orchestrator(FakeGeneration::new(Mode::List));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let summary = orchestrator
            .run(params(0, 1), orchestrator.stop_token(), tx)
            .await;
        assert!(summary.disconnected);
    }
}
