use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parasel_core::config::{EngineConfig, ErrorMode};
use parasel_core::error::ParaselError;

use crate::hook::StepHook;

type RetryPredicate = dyn Fn(&ParaselError) -> bool + Send + Sync;

/// Which failures are worth another attempt.
#[derive(Clone, Default)]
pub enum RetryOn {
    /// Any step failure. Timeouts and cancellation are never retried.
    #[default]
    Always,
    Never,
    When(Arc<RetryPredicate>),
}

impl RetryOn {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&ParaselError) -> bool + Send + Sync + 'static,
    {
        RetryOn::When(Arc::new(predicate))
    }

    pub fn matches(&self, error: &ParaselError) -> bool {
        if matches!(
            error.root_cause(),
            ParaselError::Timeout { .. }
                | ParaselError::StepTimeout { .. }
                | ParaselError::Cancelled { .. }
        ) {
            return false;
        }
        match self {
            RetryOn::Always => true,
            RetryOn::Never => false,
            RetryOn::When(predicate) => predicate(error),
        }
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOn::Always => f.write_str("Always"),
            RetryOn::Never => f.write_str("Never"),
            RetryOn::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Knobs the executor applies to every step of a run.
#[derive(Clone)]
pub struct ExecutionPolicy {
    /// Deadline for the whole run.
    pub timeout: Option<Duration>,
    /// Attempt `n` waits `n * retry_backoff` before retrying.
    pub retry_backoff: Duration,
    pub retry_on: RetryOn,
    pub error_mode: ErrorMode,
    /// Worker bound for groups that set none.
    pub max_concurrency: Option<usize>,
    pub hooks: Vec<Arc<dyn StepHook>>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            retry_backoff: Duration::from_secs(1),
            retry_on: RetryOn::default(),
            error_mode: ErrorMode::default(),
            max_concurrency: None,
            hooks: Vec::new(),
        }
    }
}

impl ExecutionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy from the `[engine]` config section. Hooks are added separately.
    ///
    /// Values `AppConfig::load` would reject fall back to the defaults
    /// instead of panicking.
    pub fn from_config(config: &EngineConfig) -> Self {
        let defaults = Self::default();
        Self {
            timeout: config
                .timeout_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|t| !t.is_zero()),
            retry_backoff: Duration::try_from_secs_f64(config.retry_backoff_secs)
                .unwrap_or(defaults.retry_backoff),
            error_mode: config.error_mode,
            max_concurrency: config.max_concurrency,
            ..defaults
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_hook(mut self, hook: impl StepHook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Sleep before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}

impl fmt::Debug for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPolicy")
            .field("timeout", &self.timeout)
            .field("retry_backoff", &self.retry_backoff)
            .field("retry_on", &self.retry_on)
            .field("error_mode", &self.error_mode)
            .field("max_concurrency", &self.max_concurrency)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
