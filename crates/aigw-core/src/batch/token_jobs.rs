//! Token maintenance jobs: usage refresh and NSFW enablement.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};

use super::{JobOutcome, run_batch, spawn_job};
use crate::error::CoreError;
use crate::ports::{TokenMaintenance, TokenManager, UsageCheck};
use crate::settings::BatchSettings;
use crate::tasks::{Task, TaskRegistry};
use crate::tokens::{mask_token, normalize_token};

const CHALLENGE_WARNING: &str =
    "Cloudflare challenge detected. Update cf_clearance and retry.";

/// Merge the single-token and list fields of a request, trimmed, blank
/// entries dropped, first occurrence kept.
pub fn collect_tokens(token: Option<&str>, tokens: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in token.into_iter().chain(tokens.iter().map(String::as_str)) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && !out.iter().any(|t| t == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Starts token maintenance jobs as background tasks.
#[derive(Clone)]
pub struct TokenJobs {
    tokens: Arc<dyn TokenManager>,
    maintenance: Arc<dyn TokenMaintenance>,
    registry: TaskRegistry,
    settings: BatchSettings,
}

impl std::fmt::Debug for TokenJobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenJobs")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TokenJobs {
    pub fn new(
        tokens: Arc<dyn TokenManager>,
        maintenance: Arc<dyn TokenMaintenance>,
        registry: TaskRegistry,
        settings: BatchSettings,
    ) -> Self {
        Self {
            tokens,
            maintenance,
            registry,
            settings,
        }
    }

    /// Start a usage refresh over `tokens`.
    pub fn start_refresh(&self, tokens: Vec<String>) -> Result<Arc<Task>, CoreError> {
        if tokens.is_empty() {
            return Err(CoreError::validation("No tokens provided", "invalid_request"));
        }
        let task = self.registry.create(tokens.len() as u64);
        let job = refresh_job(
            Arc::clone(&task),
            tokens,
            Arc::clone(&self.tokens),
            Arc::clone(&self.maintenance),
            self.settings.clone(),
        );
        spawn_job(Arc::clone(&task), job);
        Ok(task)
    }

    /// Run a usage refresh over `tokens` and wait for its result.
    pub async fn refresh(&self, tokens: Vec<String>) -> Result<Value, CoreError> {
        if tokens.is_empty() {
            return Err(CoreError::validation("No tokens provided", "invalid_request"));
        }
        let task = Task::standalone(tokens.len() as u64);
        let outcome = refresh_job(
            task,
            tokens,
            Arc::clone(&self.tokens),
            Arc::clone(&self.maintenance),
            self.settings.clone(),
        )
        .await?;
        inline_result(outcome)
    }

    /// `tokens`, or every pooled token when none are given.
    async fn nsfw_targets(&self, tokens: Vec<String>) -> Result<Vec<String>, CoreError> {
        let tokens = if tokens.is_empty() {
            let pooled: Vec<String> = self
                .tokens
                .list_tokens()
                .await
                .iter()
                .map(|t| normalize_token(t).to_string())
                .collect();
            collect_tokens(None, &pooled)
        } else {
            tokens
        };
        if tokens.is_empty() {
            return Err(CoreError::validation("No tokens available", "invalid_request"));
        }
        Ok(tokens)
    }

    /// Run NSFW enablement and wait for its result.
    pub async fn enable_nsfw(&self, tokens: Vec<String>) -> Result<Value, CoreError> {
        let tokens = self.nsfw_targets(tokens).await?;
        let task = Task::standalone(tokens.len() as u64);
        let outcome = nsfw_job(
            task,
            tokens,
            Arc::clone(&self.tokens),
            Arc::clone(&self.maintenance),
            self.settings.concurrency,
        )
        .await?;
        inline_result(outcome)
    }

    /// Start NSFW enablement over `tokens`, or over every pooled token when
    /// none are given.
    pub async fn start_nsfw(&self, tokens: Vec<String>) -> Result<Arc<Task>, CoreError> {
        let tokens = self.nsfw_targets(tokens).await?;
        let task = self.registry.create(tokens.len() as u64);
        let job = nsfw_job(
            Arc::clone(&task),
            tokens,
            Arc::clone(&self.tokens),
            Arc::clone(&self.maintenance),
            self.settings.concurrency,
        );
        spawn_job(Arc::clone(&task), job);
        Ok(task)
    }
}

/// Inline jobs run on a standalone task nobody can cancel.
fn inline_result(outcome: JobOutcome) -> Result<Value, CoreError> {
    match outcome {
        JobOutcome::Done { result, .. } => Ok(result),
        JobOutcome::Cancelled => Err(CoreError::Internal(
            "Job stopped without a cancellation request".to_string(),
        )),
    }
}

fn summary(total: usize, ok: usize, fail: usize) -> Value {
    json!({ "total": total, "ok": ok, "fail": fail })
}

async fn refresh_job(
    task: Arc<Task>,
    tokens: Vec<String>,
    manager: Arc<dyn TokenManager>,
    maintenance: Arc<dyn TokenMaintenance>,
    settings: BatchSettings,
) -> Result<JobOutcome, CoreError> {
    let total = tokens.len();
    let checks = run_batch(&task, tokens, settings.concurrency, |token| {
        let maintenance = Arc::clone(&maintenance);
        async move {
            let check = maintenance
                .refresh_usage(&token)
                .await
                .unwrap_or_else(|e| UsageCheck::failed(None, e.to_string()));
            (check.ok, check)
        }
    })
    .await;

    if task.is_cancel_requested() {
        return Ok(JobOutcome::Cancelled);
    }

    let mut results = Map::new();
    let (mut ok, mut fail, mut challenges) = (0usize, 0usize, 0usize);
    let mut upstream_message: Option<String> = None;
    for (token, check) in &checks {
        results.insert(token.clone(), Value::Bool(check.ok));
        if check.ok {
            ok += 1;
            continue;
        }
        fail += 1;
        if check.is_challenge() {
            challenges += 1;
            if upstream_message.is_none() {
                upstream_message.clone_from(&check.message);
            }
        }
    }

    manager.save().await?;

    let result_status = if ok == 0 {
        "failed"
    } else if fail > 0 {
        "partial"
    } else {
        "success"
    };
    let mut result = json!({
        "status": "success",
        "result_status": result_status,
        "summary": summary(total, ok, fail),
        "results": results,
        "challenge": { "blocked": challenges > 0, "count": challenges },
    });

    let mut warning = None;
    if challenges > 0 {
        manager.pause_auto_refresh(
            Duration::from_secs(settings.cf_challenge_pause_secs),
            "cloudflare_challenge",
        );
        if let Value::Object(map) = &mut result {
            map.insert("error_code".into(), json!("cloudflare_challenge"));
            map.insert(
                "message".into(),
                json!("Detected Cloudflare challenge. Please update proxy.cf_clearance and retry."),
            );
            if let Some(message) = upstream_message {
                map.insert("upstream_message".into(), json!(message));
            }
            map.insert("refresh_pause".into(), json!(manager.refresh_state()));
        }
        warning = Some(CHALLENGE_WARNING.to_string());
    }

    tracing::info!(task_id = %task.id(), ok, fail, challenges, "Token refresh finished");
    Ok(JobOutcome::Done { result, warning })
}

async fn nsfw_job(
    task: Arc<Task>,
    tokens: Vec<String>,
    manager: Arc<dyn TokenManager>,
    maintenance: Arc<dyn TokenMaintenance>,
    concurrency: usize,
) -> Result<JobOutcome, CoreError> {
    let total = tokens.len();
    let outcomes = run_batch(&task, tokens, concurrency, |token| {
        let maintenance = Arc::clone(&maintenance);
        async move {
            match maintenance.enable_nsfw(&token).await {
                Ok(outcome) => {
                    let detail = serde_json::to_value(&outcome)
                        .unwrap_or_else(|e| json!({ "error": e.to_string() }));
                    (outcome.success, detail)
                }
                Err(e) => (false, json!({ "error": e.to_string() })),
            }
        }
    })
    .await;

    if task.is_cancel_requested() {
        return Ok(JobOutcome::Cancelled);
    }

    let mut results = Map::new();
    let mut ok = 0usize;
    for (token, detail) in outcomes {
        if detail.get("success").and_then(Value::as_bool) == Some(true) {
            ok += 1;
        }
        results.insert(mask_token(&token), detail);
    }
    let fail = total - ok;

    manager.save().await?;

    tracing::info!(task_id = %task.id(), ok, fail, "NSFW enablement finished");
    Ok(JobOutcome::Done {
        result: json!({
            "status": "success",
            "summary": summary(total, ok, fail),
            "results": results,
        }),
        warning: None,
    })
}
