use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parasel_core::config::ErrorMode;
use parasel_core::context::Context;
use parasel_core::error::{ParaselError, Result};

use crate::policy::ExecutionPolicy;
use crate::result::{ExecutionResult, StepRecord, StepStatus};
use crate::step::Step;

/// Runs a step tree against a context under an [`ExecutionPolicy`].
///
/// Every step in the tree, the root included, goes through the same
/// wrapper: hooks, per-step timeout, and retry with linear backoff.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    policy: Arc<ExecutionPolicy>,
}

impl Executor {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Run `step` to completion. Failures are reported in the result, never
    /// as an `Err`.
    pub async fn run(&self, step: &Step, ctx: Context) -> ExecutionResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let runner = Runner {
            policy: self.policy.clone(),
            deadline: self
                .policy
                .timeout
                .map(|limit| tokio::time::Instant::now() + limit),
            records: Arc::new(Mutex::new(Vec::new())),
        };
        info!(%run_id, root = %step.name(), kind = step.kind(), "Run starting");

        let outcome = match self.policy.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, runner.execute(step, &ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(ParaselError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    }),
                }
            }
            None => runner.execute(step, &ctx).await,
        };

        let errors = match outcome {
            Ok(()) => Vec::new(),
            Err(e) => {
                let e = attribute(step, e);
                match self.policy.error_mode {
                    ErrorMode::FailFast => vec![e],
                    ErrorMode::Collect => e.flatten(),
                }
            }
        };
        let duration = started.elapsed();
        let success = errors.is_empty();
        if success {
            info!(%run_id, root = %step.name(), duration_ms = duration.as_millis() as u64, "Run succeeded");
        } else {
            warn!(
                %run_id,
                root = %step.name(),
                duration_ms = duration.as_millis() as u64,
                errors = errors.len(),
                "Run failed"
            );
        }

        ExecutionResult {
            run_id,
            started_at,
            context: ctx,
            success,
            duration,
            errors,
            steps: runner.take_records(),
        }
    }

    /// Run `step` against a fresh context seeded with `initial`.
    pub async fn run_with(&self, step: &Step, initial: HashMap<String, Value>) -> ExecutionResult {
        self.run(step, Context::from_map(initial)).await
    }
}

/// Errors that carry no step name are pinned on the root. The run deadline
/// is reported as is.
fn attribute(root: &Step, error: ParaselError) -> ParaselError {
    if error.step().is_some() || matches!(error, ParaselError::Timeout { .. }) {
        return error;
    }
    ParaselError::Failed {
        step: root.name().to_string(),
        source: Box::new(error),
    }
}

/// Per-run state shared by every step invocation.
#[derive(Clone)]
pub(crate) struct Runner {
    policy: Arc<ExecutionPolicy>,
    deadline: Option<tokio::time::Instant>,
    records: Arc<Mutex<Vec<StepRecord>>>,
}

impl Runner {
    pub(crate) fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    fn deadline_error(&self) -> Option<ParaselError> {
        let deadline = self.deadline?;
        if tokio::time::Instant::now() < deadline {
            return None;
        }
        let timeout_ms = self.policy.timeout.map_or(0, |t| t.as_millis() as u64);
        Some(ParaselError::Timeout { timeout_ms })
    }

    /// Execute one step with hooks, per-step timeout, and retry.
    pub(crate) fn execute<'a>(&'a self, step: &'a Step, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let info = step.info();
            let started = Instant::now();
            let slot = self.begin_record(step);
            let mut attempt: u32 = 0;

            loop {
                if let Some(e) = self.deadline_error() {
                    self.finish_record(slot, StepStatus::Failed, attempt, started);
                    return Err(e);
                }
                attempt += 1;
                self.update_record(slot, |r| r.attempts = attempt);
                debug!(step = %info.name, attempt, "Step running");

                for hook in &self.policy.hooks {
                    hook.before_step(step, ctx);
                }
                let result = self.attempt(step, ctx).await;
                match &result {
                    Ok(()) => {
                        for hook in &self.policy.hooks {
                            hook.after_step(step, ctx, None);
                        }
                    }
                    Err(e) => {
                        for hook in &self.policy.hooks {
                            hook.on_error(step, ctx, e);
                        }
                        for hook in &self.policy.hooks {
                            hook.after_step(step, ctx, Some(e));
                        }
                    }
                }

                let error = match result {
                    Ok(()) => {
                        debug!(step = %info.name, attempt, "Step succeeded");
                        self.finish_record(slot, StepStatus::Succeeded, attempt, started);
                        return Ok(());
                    }
                    Err(e) => e,
                };

                if attempt <= info.retries && self.policy.retry_on.matches(&error) {
                    let backoff = self.policy.backoff_for(attempt);
                    warn!(
                        step = %info.name,
                        attempt,
                        max_retries = info.retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Retrying step"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }

                debug!(step = %info.name, attempt, "Step failed");
                self.finish_record(slot, StepStatus::Failed, attempt, started);
                if attempt > 1 {
                    return Err(ParaselError::RetriesExhausted {
                        step: info.name.clone(),
                        attempts: attempt,
                        source: Box::new(error),
                    });
                }
                return Err(error);
            }
        })
    }

    async fn attempt(&self, step: &Step, ctx: &Context) -> Result<()> {
        match step.info().timeout {
            Some(limit) => match tokio::time::timeout(limit, step.run(self, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ParaselError::StepTimeout {
                    step: step.name().to_string(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => step.run(self, ctx).await,
        }
    }

    /// Note a child that a fail-fast group never started.
    pub(crate) fn record_skipped(&self, step: &Step) {
        self.push_record(step, StepStatus::Pending);
    }

    /// Steps cut off by the run deadline keep their `Running` record.
    fn begin_record(&self, step: &Step) -> usize {
        self.push_record(step, StepStatus::Running)
    }

    fn finish_record(&self, slot: usize, status: StepStatus, attempts: u32, started: Instant) {
        self.update_record(slot, |r| {
            r.status = status;
            r.attempts = attempts;
            r.elapsed_ms = started.elapsed().as_millis() as u64;
        });
    }

    fn push_record(&self, step: &Step, status: StepStatus) -> usize {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.push(StepRecord {
            name: step.name().to_string(),
            kind: step.kind().to_string(),
            status,
            attempts: 0,
            elapsed_ms: 0,
        });
        records.len() - 1
    }

    fn update_record(&self, slot: usize, f: impl FnOnce(&mut StepRecord)) {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(record) = records.get_mut(slot) {
            f(record);
        }
    }

    fn take_records(&self) -> Vec<StepRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|p| p.into_inner()))
    }
}
