use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use parasel_core::context::Context;
use parasel_core::error::{ParaselError, Result};

use super::{ByArgs, Step, StepInfo};
use crate::executor::Runner;

/// Runs children at the same time, at most `max_concurrency` at once.
///
/// In fail-fast mode (the default) the first failure stops children that
/// have not started yet; children already running are left to finish in the
/// background and may still write to the context. In collect mode every
/// child runs and all failures are reported together.
#[derive(Debug, Clone)]
pub struct Concurrent {
    pub(crate) info: StepInfo,
    children: Vec<Arc<Step>>,
    max_concurrency: Option<usize>,
    fail_fast: bool,
}

impl Concurrent {
    pub fn new(children: Vec<Step>) -> Self {
        Self {
            info: StepInfo::new("Concurrent"),
            children: children.into_iter().map(Arc::new).collect(),
            max_concurrency: None,
            fail_fast: true,
        }
    }

    /// Group of every clone a static fan-out expands to, named after its
    /// template.
    pub fn by_args(fanout: ByArgs) -> Self {
        let name = fanout.template().info.name.clone();
        Self::new(fanout.into_steps()).named(name)
    }

    pub fn push(mut self, step: impl Into<Step>) -> Self {
        self.children.push(Arc::new(step.into()));
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    /// Shorthand for `fail_fast(false)`.
    pub fn collect(self) -> Self {
        self.fail_fast(false)
    }

    pub fn children(&self) -> impl Iterator<Item = &Step> {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) async fn run(&self, runner: &Runner, ctx: &Context) -> Result<()> {
        run_group(
            runner,
            ctx,
            &self.info.name,
            &self.children,
            self.max_concurrency,
            self.fail_fast,
        )
        .await
    }
}

/// Run `children` as one bounded group. Shared by [`Concurrent`] and the
/// dynamic fan-out.
pub(crate) async fn run_group(
    runner: &Runner,
    ctx: &Context,
    group: &str,
    children: &[Arc<Step>],
    max_concurrency: Option<usize>,
    fail_fast: bool,
) -> Result<()> {
    if children.is_empty() {
        return Ok(());
    }

    let limit = max_concurrency
        .or(runner.policy().max_concurrency)
        .unwrap_or(children.len())
        .max(1);
    debug!(group = %group, children = children.len(), limit, fail_fast, "Starting concurrent group");

    let semaphore = Arc::new(Semaphore::new(limit));
    let cancel = CancellationToken::new();
    let mut join_set = JoinSet::new();

    for child in children {
        let child = child.clone();
        let runner = runner.clone();
        let ctx = ctx.clone();
        let sem = semaphore.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let name = child.name().to_string();
            let permit = match sem.acquire().await {
                Ok(permit) if !cancel.is_cancelled() => permit,
                _ => {
                    runner.record_skipped(&child);
                    return (name.clone(), Err(ParaselError::Cancelled { step: name }));
                }
            };
            let result = runner.execute(&child, &ctx).await;
            // Cancel before the permit passes to a waiting sibling.
            if fail_fast && result.is_err() {
                cancel.cancel();
            }
            drop(permit);
            (name, result)
        });
    }

    let mut errors = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        let (child, result) = match joined {
            Ok(pair) => pair,
            Err(join_err) => {
                error!(group = %group, error = %join_err, "Concurrent child task aborted");
                let failure = ParaselError::Leaf {
                    step: group.to_string(),
                    cause: anyhow::anyhow!("child task aborted: {}", join_err),
                };
                if fail_fast {
                    cancel.cancel();
                    join_set.detach_all();
                    return Err(failure);
                }
                errors.push(failure);
                continue;
            }
        };

        match result {
            Ok(()) => {}
            Err(ParaselError::Cancelled { .. }) if cancel.is_cancelled() => {}
            Err(e) => {
                let wrapped = ParaselError::Child {
                    step: group.to_string(),
                    child,
                    source: Box::new(e),
                };
                if fail_fast {
                    cancel.cancel();
                    join_set.detach_all();
                    debug!(group = %group, "Fail-fast: remaining children will not start");
                    return Err(wrapped);
                }
                errors.push(wrapped);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ParaselError::Aggregate {
            step: group.to_string(),
            errors,
        })
    }
}
