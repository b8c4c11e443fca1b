use std::sync::Arc;

use tracing::{debug, info, warn};

use parasel_core::config::HooksConfig;
use parasel_core::context::Context;
use parasel_core::error::ParaselError;
use parasel_core::hooks::spawn_hooks;

use crate::step::Step;

/// Observer of step lifecycle events. Called for every attempt of every step.
///
/// On failure `on_error` runs before `after_step`. Hooks run inline on the
/// executing task, so keep them short.
pub trait StepHook: Send + Sync + 'static {
    fn before_step(&self, _step: &Step, _ctx: &Context) {}

    /// `error` is set when the attempt failed.
    fn after_step(&self, _step: &Step, _ctx: &Context, _error: Option<&ParaselError>) {}

    fn on_error(&self, _step: &Step, _ctx: &Context, _error: &ParaselError) {}
}

/// Logs step lifecycle through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl StepHook for TracingHook {
    fn before_step(&self, step: &Step, _ctx: &Context) {
        debug!(step = %step.name(), kind = step.kind(), "Step starting");
    }

    fn after_step(&self, step: &Step, _ctx: &Context, error: Option<&ParaselError>) {
        if error.is_none() {
            info!(step = %step.name(), kind = step.kind(), "Step finished");
        }
    }

    fn on_error(&self, step: &Step, _ctx: &Context, error: &ParaselError) {
        warn!(step = %step.name(), kind = step.kind(), error = %error, "Step failed");
    }
}

/// Runs the shell commands from the `[hooks]` config section.
///
/// Commands see `PARASEL_STEP`, `PARASEL_EVENT` (`start`, `end` or `error`)
/// and, for errors, `PARASEL_ERROR`. They are spawned in the background.
#[derive(Debug, Clone, Default)]
pub struct CommandHook {
    config: HooksConfig,
}

impl CommandHook {
    pub fn from_config(config: &HooksConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn fire(commands: &[String], step: &Step, event: &str, error: Option<&ParaselError>) {
        if commands.is_empty() {
            return;
        }
        let mut env = vec![
            ("PARASEL_STEP".to_string(), step.name().to_string()),
            ("PARASEL_EVENT".to_string(), event.to_string()),
        ];
        if let Some(e) = error {
            env.push(("PARASEL_ERROR".to_string(), e.to_string()));
        }
        spawn_hooks(commands.to_vec(), env);
    }
}

impl StepHook for CommandHook {
    fn before_step(&self, step: &Step, _ctx: &Context) {
        Self::fire(&self.config.on_step_start, step, "start", None);
    }

    fn after_step(&self, step: &Step, _ctx: &Context, error: Option<&ParaselError>) {
        Self::fire(&self.config.on_step_end, step, "end", error);
    }

    fn on_error(&self, step: &Step, _ctx: &Context, error: &ParaselError) {
        Self::fire(&self.config.on_step_error, step, "error", Some(error));
    }
}

type BeforeFn = dyn Fn(&Step, &Context) + Send + Sync;
type AfterFn = dyn Fn(&Step, &Context, Option<&ParaselError>) + Send + Sync;
type ErrorFn = dyn Fn(&Step, &Context, &ParaselError) + Send + Sync;

/// Hook assembled from closures.
#[derive(Clone, Default)]
pub struct CallbackHook {
    before: Option<Arc<BeforeFn>>,
    after: Option<Arc<AfterFn>>,
    error: Option<Arc<ErrorFn>>,
}

impl CallbackHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl Fn(&Step, &Context) + Send + Sync + 'static) -> Self {
        self.before = Some(Arc::new(f));
        self
    }

    pub fn on_finish(
        mut self,
        f: impl Fn(&Step, &Context, Option<&ParaselError>) + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Arc::new(f));
        self
    }

    pub fn on_failure(
        mut self,
        f: impl Fn(&Step, &Context, &ParaselError) + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(f));
        self
    }
}

impl StepHook for CallbackHook {
    fn before_step(&self, step: &Step, ctx: &Context) {
        if let Some(f) = &self.before {
            f(step, ctx);
        }
    }

    fn after_step(&self, step: &Step, ctx: &Context, error: Option<&ParaselError>) {
        if let Some(f) = &self.after {
            f(step, ctx, error);
        }
    }

    fn on_error(&self, step: &Step, ctx: &Context, error: &ParaselError) {
        if let Some(f) = &self.error {
            f(step, ctx, error);
        }
    }
}
