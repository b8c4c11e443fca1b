use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use parasel_core::context::Context;
use parasel_core::error::ParaselError;

/// Lifecycle of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// State of one step invocation. `Running` at the end of a run means the
/// step was cut off by the run deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub kind: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Outcome of [`Executor::run`](crate::Executor::run).
#[derive(Debug)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub context: Context,
    pub success: bool,
    pub duration: Duration,
    pub errors: Vec<ParaselError>,
    /// One record per step invocation, in start order.
    pub steps: Vec<StepRecord>,
}

impl ExecutionResult {
    /// Context contents as a plain map.
    pub fn data(&self) -> HashMap<String, Value> {
        self.context.snapshot()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.context.get(key)
    }

    /// Elapsed milliseconds per step name. A name seen more than once keeps
    /// the last record.
    pub fn timings(&self) -> HashMap<String, u64> {
        self.steps
            .iter()
            .map(|r| (r.name.clone(), r.elapsed_ms))
            .collect()
    }

    pub fn record(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().rev().find(|r| r.name == name)
    }

    /// Serializable summary for the CLI and the gateway.
    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id.to_string(),
            started_at: self.started_at,
            success: self.success,
            duration: self.duration.as_secs_f64(),
            errors: self.errors.iter().map(ErrorReport::from).collect(),
            data: self.data(),
            steps: self.steps.clone(),
            task_id: None,
            version: None,
        }
    }
}

/// One failure in a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub step: Option<String>,
    pub message: String,
    pub cause: String,
}

impl From<&ParaselError> for ErrorReport {
    fn from(e: &ParaselError) -> Self {
        Self {
            step: e.step().map(str::to_string),
            message: e.to_string(),
            cause: e.cause_message(),
        }
    }
}

/// JSON shape of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    /// Seconds.
    pub duration: f64,
    pub errors: Vec<ErrorReport>,
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_shape() {
        let result = ExecutionResult {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            context: Context::from_json(json!({"final": 25})),
            success: false,
            duration: Duration::from_millis(1500),
            errors: vec![ParaselError::Child {
                step: "pipeline".into(),
                child: "fetch".into(),
                source: Box::new(ParaselError::Leaf {
                    step: "fetch".into(),
                    cause: anyhow::anyhow!("connection reset"),
                }),
            }],
            steps: vec![StepRecord {
                name: "fetch".into(),
                kind: "leaf".into(),
                status: StepStatus::Failed,
                attempts: 2,
                elapsed_ms: 12,
            }],
        };

        let value = serde_json::to_value(result.report()).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["duration"], json!(1.5));
        assert_eq!(value["data"]["final"], json!(25));
        assert_eq!(value["errors"][0]["step"], json!("pipeline"));
        assert_eq!(value["errors"][0]["cause"], json!("connection reset"));
        assert_eq!(value["steps"][0]["status"], json!("failed"));
        assert!(value.get("task_id").is_none());
        assert_eq!(value["run_id"], json!(result.run_id.to_string()));
        assert_eq!(result.timings()["fetch"], 12);
    }
}
