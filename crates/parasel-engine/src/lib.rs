//! Step-tree execution engine.
//!
//! Build a tree from [`Leaf`], [`Sequence`], [`Concurrent`], [`ByArgs`] and
//! [`ByKeys`], then hand it to an [`Executor`] together with a [`Context`].

pub mod executor;
pub mod hook;
pub mod policy;
pub mod result;
pub mod step;

pub use executor::Executor;
pub use hook::{CallbackHook, CommandHook, StepHook, TracingHook};
pub use policy::{ExecutionPolicy, RetryOn};
pub use result::{ErrorReport, ExecutionResult, RunReport, StepRecord, StepStatus};
pub use step::{ByArgs, ByKeys, Concurrent, Leaf, LeafInput, LeafOutput, Sequence, Step, StepInfo};

pub use parasel_core::{Context, ContextMap, ErrorMode, ParaselError, Result};
