//! Fire-and-forget batch jobs on top of the task engine.
//!
//! A job runs its per-item work with bounded concurrency. Each finished item
//! is sent over a progress channel; a separate fan-out task records it on the
//! [`Task`] and broadcasts a `progress` event, so the work loop never waits
//! on listeners.

mod token_jobs;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, StreamExt, stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use token_jobs::{TokenJobs, collect_tokens};

use crate::error::CoreError;
use crate::tasks::Task;

/// How a job ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done {
        result: Value,
        warning: Option<String>,
    },
    Cancelled,
}

/// Sending half of a task's progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<bool>,
}

impl ProgressSender {
    /// Report one processed item.
    pub fn report(&self, ok: bool) {
        // The fan-out task only stops once every sender is gone.
        let _ = self.tx.send(ok);
    }
}

/// Open a progress channel for `task` and spawn its fan-out task.
///
/// The returned handle completes after every sender is dropped and every
/// reported item has been recorded.
pub fn progress_channel(task: Arc<Task>) -> (ProgressSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
    let handle = tokio::spawn(async move {
        while let Some(ok) = rx.recv().await {
            task.record(ok);
            task.publish_progress();
        }
    });
    (ProgressSender { tx }, handle)
}

/// Run `work` over `items` with at most `concurrency` in flight.
///
/// `work` yields whether the item succeeded plus a per-item value. Items not
/// yet started when cancellation is requested are skipped. Results keep the
/// input order.
pub async fn run_batch<T, F, Fut>(
    task: &Arc<Task>,
    items: Vec<String>,
    concurrency: usize,
    work: F,
) -> Vec<(String, T)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = (bool, T)>,
{
    let (progress, fan_out) = progress_channel(Arc::clone(task));

    let results: Vec<(String, T)> = stream::iter(items)
        .map(|item| {
            let progress = progress.clone();
            let fut = (!task.is_cancel_requested()).then(|| work(item.clone()));
            async move {
                let fut = fut?;
                let (ok, value) = fut.await;
                progress.report(ok);
                Some((item, value))
            }
        })
        .buffered(concurrency.max(1))
        .filter_map(std::future::ready)
        .collect()
        .await;

    drop(progress);
    if let Err(e) = fan_out.await {
        tracing::warn!(task_id = %task.id(), error = %e, "Progress fan-out ended abnormally");
    }
    results
}

/// Spawn `job` off the request path and settle `task` from its outcome.
///
/// Errors and panics inside the job become `fail`.
pub fn spawn_job<Fut>(task: Arc<Task>, job: Fut) -> JoinHandle<()>
where
    Fut: Future<Output = Result<JobOutcome, CoreError>> + Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(JobOutcome::Done { result, warning })) => {
                task.finish(result, warning);
            }
            Ok(Ok(JobOutcome::Cancelled)) => {
                if !task.finish_cancelled() {
                    task.fail("Job stopped without a cancellation request");
                }
            }
            Ok(Err(e)) => {
                tracing::error!(task_id = %task.id(), error = %e, "Batch job failed");
                task.fail(e.to_string());
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(task_id = %task.id(), panic = %message, "Batch job panicked");
                task.fail(format!("Internal error: {message}"));
            }
        }
    })
}
