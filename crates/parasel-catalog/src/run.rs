use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use parasel_core::context::Context;
use parasel_core::error::{ParaselError, Result};
use parasel_engine::{Executor, RunReport};

use crate::catalog::TaskCatalog;
use crate::contract::check_keys;
use crate::version::VersionSelector;

/// A request to run a catalog task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    /// Initial context.
    #[serde(default)]
    pub data: HashMap<String, Value>,
    /// Task id, used when none is given by the caller.
    #[serde(default)]
    pub task: Option<String>,
    /// `latest` (default), `stable`, or a version string.
    #[serde(default)]
    pub version: Option<String>,
}

impl RunRequest {
    pub fn new(data: HashMap<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Resolve a task, check its input, run it, and check its output.
///
/// The task id is taken from `task`, then `request.task`, then a string
/// `task` key in the data. Contract failures are returned as errors; a run
/// that fails is still a successful call with `success: false` in the report.
pub async fn run_task(
    catalog: &TaskCatalog,
    executor: &Executor,
    task: Option<&str>,
    request: RunRequest,
) -> Result<RunReport> {
    let RunRequest { data, task: requested, version } = request;
    let task_id = task
        .map(str::to_string)
        .or(requested)
        .or_else(|| data.get("task").and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| ParaselError::Contract("no task given in the request or its data".into()))?;
    let selector: VersionSelector = version.as_deref().unwrap_or("latest").parse()?;

    let spec = catalog.get(&task_id, &selector)?;
    if let Some(contract) = &spec.input {
        contract.validate("input", &data)?;
    }
    check_keys("requires", &spec.requires, &data)?;

    let result = executor.run(&spec.step, Context::from_map(data)).await;

    if result.success {
        let output = result.data();
        check_keys("produces", &spec.produces, &output)?;
        if let Some(contract) = &spec.output {
            contract.validate("output", &output)?;
        }
    }

    let mut report = result.report();
    report.task_id = Some(spec.task_id.clone());
    report.version = Some(spec.version.to_string());
    info!(
        task_id = %spec.task_id,
        version = %spec.version,
        success = report.success,
        duration_ms = (report.duration * 1000.0) as u64,
        "Task run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TaskSpec;
    use crate::contract::{Contract, FieldType};
    use parasel_engine::{Leaf, LeafInput};
    use serde_json::json;

    fn doubler() -> Leaf {
        Leaf::new("double", |input: LeafInput| {
            let x = input.context.get_i64("x").unwrap_or(0);
            Ok(Some(json!(x * 2)))
        })
        .with_output("y")
    }

    fn catalog() -> TaskCatalog {
        let mut catalog = TaskCatalog::new();
        catalog
            .register(
                TaskSpec::new("double", "1.0.0", doubler())
                    .unwrap()
                    .with_input(Contract::new().field("x", FieldType::Integer))
                    .produces(["y"]),
            )
            .unwrap();
        catalog
            .register(TaskSpec::new("double", "2.0.0", doubler()).unwrap().produces(["z"]))
            .unwrap();
        catalog
    }

    fn data(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_run_exact_version() {
        let report = run_task(
            &catalog(),
            &Executor::default(),
            Some("double"),
            RunRequest::new(data(json!({"x": 21}))).with_version("1.0.0"),
        )
        .await
        .unwrap();

        assert!(report.success);
        assert_eq!(report.data["y"], json!(42));
        assert_eq!(report.task_id.as_deref(), Some("double"));
        assert_eq!(report.version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_task_id_from_data() {
        let report = run_task(
            &catalog(),
            &Executor::default(),
            None,
            RunRequest::new(data(json!({"x": 1, "task": "double"}))).with_version("1.0.0"),
        )
        .await
        .unwrap();
        assert_eq!(report.data["y"], json!(2));
    }

    #[tokio::test]
    async fn test_input_contract_rejected() {
        let err = run_task(
            &catalog(),
            &Executor::default(),
            Some("double"),
            RunRequest::new(data(json!({"x": "nope"}))).with_version("1.0.0"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ParaselError::Contract(_)));
    }

    #[tokio::test]
    async fn test_missing_produced_key() {
        let err = run_task(
            &catalog(),
            &Executor::default(),
            Some("double"),
            RunRequest::new(data(json!({"x": 1}))),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("produces: missing keys [z]"));
    }

    #[tokio::test]
    async fn test_unknown_task_and_version() {
        let catalog = catalog();
        let executor = Executor::default();

        let err = run_task(&catalog, &executor, Some("nope"), RunRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParaselError::TaskNotFound(_)));

        let err = run_task(&catalog, &executor, None, RunRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParaselError::Contract(_)));

        let err = run_task(
            &catalog,
            &executor,
            Some("double"),
            RunRequest::default().with_version("x.y"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ParaselError::InvalidVersion { .. }));
    }

    #[tokio::test]
    async fn test_failed_run_is_reported() {
        let mut catalog = TaskCatalog::new();
        catalog
            .register(TaskSpec::new("broken", "0.1.0", Leaf::new("fail", |_| anyhow::bail!("down"))).unwrap())
            .unwrap();

        let report = run_task(&catalog, &Executor::default(), Some("broken"), RunRequest::default())
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.errors[0].cause, "down");
    }
}
