//! Versioned task catalog with input/output contracts.

pub mod catalog;
pub mod contract;
pub mod run;
pub mod version;

pub use catalog::{RegisterOptions, TaskCatalog, TaskInfo, TaskSpec, TaskSummary};
pub use contract::{Contract, FieldSpec, FieldType};
pub use run::{run_task, RunRequest};
pub use version::{Version, VersionSelector};
