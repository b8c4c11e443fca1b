//! The closed set of executable step kinds.
//!
//! A pipeline is a tree of [`Step`]s sharing one [`Context`]:
//!
//! - [`Leaf`] wraps a user function.
//! - [`Sequence`] runs its children in order.
//! - [`Concurrent`] runs its children together, bounded by a worker count.
//! - [`ByKeys`] expands a template leaf over arrays found in the context at
//!   run time and runs the clones concurrently.
//!
//! [`ByArgs`] is the construction-time counterpart of `ByKeys`: it expands a
//! template leaf over a cartesian product of argument lists and is meant to
//! be placed inside a `Concurrent` group.

pub mod concurrent;
pub mod fanout;
pub mod leaf;
pub mod sequence;

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use parasel_core::context::Context;
use parasel_core::error::Result;

use crate::executor::Runner;

pub use concurrent::Concurrent;
pub use fanout::{ByArgs, ByKeys};
pub use leaf::{Leaf, LeafInput, LeafOutput};
pub use sequence::Sequence;

/// Identity and execution knobs shared by every step kind.
#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    /// Name used in errors, logs, and step records.
    pub name: String,
    /// Upper bound on a single attempt of this step.
    pub timeout: Option<Duration>,
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub metadata: HashMap<String, Value>,
}

impl StepInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A node in the step tree.
#[derive(Debug, Clone)]
pub enum Step {
    Leaf(Leaf),
    Sequence(Sequence),
    Concurrent(Concurrent),
    ByKeys(ByKeys),
}

impl Step {
    pub fn info(&self) -> &StepInfo {
        match self {
            Step::Leaf(s) => &s.info,
            Step::Sequence(s) => &s.info,
            Step::Concurrent(s) => &s.info,
            Step::ByKeys(s) => &s.info,
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    /// Short label for the step kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Leaf(_) => "leaf",
            Step::Sequence(_) => "sequence",
            Step::Concurrent(_) => "concurrent",
            Step::ByKeys(_) => "by_keys",
        }
    }

    /// One attempt of this step, without retry or hooks. Children are run
    /// back through `runner` so they get their own retry and hooks.
    pub(crate) fn run<'a>(&'a self, runner: &'a Runner, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        match self {
            Step::Leaf(leaf) => Box::pin(leaf.invoke(ctx)),
            Step::Sequence(seq) => Box::pin(seq.run(runner, ctx)),
            Step::Concurrent(group) => Box::pin(group.run(runner, ctx)),
            Step::ByKeys(fanout) => Box::pin(fanout.run(runner, ctx)),
        }
    }
}

impl From<Leaf> for Step {
    fn from(leaf: Leaf) -> Self {
        Step::Leaf(leaf)
    }
}

impl From<Sequence> for Step {
    fn from(seq: Sequence) -> Self {
        Step::Sequence(seq)
    }
}

impl From<Concurrent> for Step {
    fn from(group: Concurrent) -> Self {
        Step::Concurrent(group)
    }
}

impl From<ByKeys> for Step {
    fn from(fanout: ByKeys) -> Self {
        Step::ByKeys(fanout)
    }
}

/// Builder methods for the fields in [`StepInfo`], shared by every kind.
macro_rules! step_info_builders {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                /// Rename the step.
                pub fn named(mut self, name: impl Into<String>) -> Self {
                    self.info.name = name.into();
                    self
                }

                /// Bound a single attempt of this step.
                pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
                    self.info.timeout = Some(timeout);
                    self
                }

                /// Allow `retries` extra attempts after a failure.
                pub fn with_retries(mut self, retries: u32) -> Self {
                    self.info.retries = retries;
                    self
                }

                pub fn with_metadata(
                    mut self,
                    key: impl Into<String>,
                    value: serde_json::Value,
                ) -> Self {
                    self.info.metadata.insert(key.into(), value);
                    self
                }

                pub fn info(&self) -> &crate::step::StepInfo {
                    &self.info
                }
            }
        )+
    };
}

step_info_builders!(Leaf, Sequence, Concurrent, ByKeys);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(name: &str) -> Leaf {
        Leaf::new(name, |_| Ok(None))
    }

    #[test]
    fn test_info_builders() {
        let step: Step = noop("fetch")
            .with_retries(2)
            .with_timeout(Duration::from_millis(250))
            .with_metadata("owner", json!("search"))
            .into();

        let info = step.info();
        assert_eq!(info.name, "fetch");
        assert_eq!(info.retries, 2);
        assert_eq!(info.timeout, Some(Duration::from_millis(250)));
        assert_eq!(info.metadata["owner"], json!("search"));
        assert_eq!(step.kind(), "leaf");
    }

    #[test]
    fn test_kinds() {
        let seq: Step = Sequence::new(vec![noop("a").into()]).into();
        let group: Step = Concurrent::new(vec![noop("b").into()]).named("fan").into();
        let by_keys: Step = ByKeys::new(noop("c"), ["items"], "item").into();

        assert_eq!(seq.kind(), "sequence");
        assert_eq!(seq.name(), "Sequence");
        assert_eq!(group.kind(), "concurrent");
        assert_eq!(group.name(), "fan");
        assert_eq!(by_keys.kind(), "by_keys");
    }
}
