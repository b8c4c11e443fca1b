use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParaselError {
    // Context errors
    #[error("Key not found in context: {0}")]
    KeyNotFound(String),

    #[error("Context key is not a sequence: {0}")]
    NotASequence(String),

    // Step errors
    #[error("Step '{step}' failed: {cause:#}")]
    Leaf { step: String, cause: anyhow::Error },

    #[error("Step '{step}' child '{child}' failed: {source}")]
    Child {
        step: String,
        child: String,
        source: Box<ParaselError>,
    },

    #[error("Step '{step}' completed with {} error(s): {}", errors.len(), join_errors(errors))]
    Aggregate {
        step: String,
        errors: Vec<ParaselError>,
    },

    #[error("Step '{step}' failed: {source}")]
    Failed {
        step: String,
        source: Box<ParaselError>,
    },

    #[error("Step '{step}' failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        source: Box<ParaselError>,
    },

    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("Run exceeded its deadline of {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Step '{step}' cancelled before it started")]
    Cancelled { step: String },

    // Catalog errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task '{task_id}' version '{version}' already registered")]
    VersionConflict { task_id: String, version: String },

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Contract violation: {0}")]
    Contract(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_errors(errors: &[ParaselError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ParaselError {
    /// Name of the step this error is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Leaf { step, .. }
            | Self::Child { step, .. }
            | Self::Aggregate { step, .. }
            | Self::Failed { step, .. }
            | Self::RetriesExhausted { step, .. }
            | Self::StepTimeout { step, .. }
            | Self::Cancelled { step } => Some(step),
            _ => None,
        }
    }

    /// Follow single-cause wrappers down to the error that started the chain.
    ///
    /// Aggregates are not descended: they have no single cause.
    pub fn root_cause(&self) -> &ParaselError {
        match self {
            Self::Child { source, .. }
            | Self::Failed { source, .. }
            | Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The user function's error, when the chain ends in a leaf failure.
    pub fn leaf_cause(&self) -> Option<&anyhow::Error> {
        match self.root_cause() {
            Self::Leaf { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Description of the underlying cause, without the step wrappers.
    pub fn cause_message(&self) -> String {
        match self.root_cause() {
            Self::Leaf { cause, .. } => format!("{cause:#}"),
            other => other.to_string(),
        }
    }

    /// Split an aggregate into its individual errors. Anything else is
    /// returned as a single-element list.
    pub fn flatten(self) -> Vec<ParaselError> {
        match self {
            Self::Aggregate { errors, .. } => errors,
            other => vec![other],
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Timeout { .. } | Self::StepTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ParaselError>;
