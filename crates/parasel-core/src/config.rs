use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ParaselError, Result};

/// Top-level parasel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub hooks: Option<HooksConfig>,
}

/// Default execution policy for runs started by the CLI and the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Overall deadline for a run, in seconds. Unset means no deadline.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// Linear retry backoff unit: attempt N sleeps `N * retry_backoff_secs`.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: f64,
    #[serde(default)]
    pub error_mode: ErrorMode,
    /// Default worker bound for concurrent groups that set none.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            retry_backoff_secs: default_retry_backoff(),
            error_mode: ErrorMode::default(),
            max_concurrency: None,
        }
    }
}

fn default_retry_backoff() -> f64 { 1.0 }

/// How the driver reports failures of the root step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Report the root failure as a single error.
    #[default]
    FailFast,
    /// Split an aggregated root failure into its individual errors.
    Collect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8700".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing-subscriber` EnvFilter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "parasel=info,warn".to_string() }

/// Shell commands run around step execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub on_step_start: Vec<String>,
    #[serde(default)]
    pub on_step_end: Vec<String>,
    #[serde(default)]
    pub on_step_error: Vec<String>,
}

impl HooksConfig {
    pub fn is_empty(&self) -> bool {
        self.on_step_start.is_empty()
            && self.on_step_end.is_empty()
            && self.on_step_error.is_empty()
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ParaselError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| ParaselError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(secs) = self.engine.timeout_secs {
            if !(secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()) {
                return Err(ParaselError::Config(format!(
                    "engine.timeout_secs must be a positive number of seconds, got {}",
                    secs
                )));
            }
        }
        if Duration::try_from_secs_f64(self.engine.retry_backoff_secs).is_err() {
            return Err(ParaselError::Config(format!(
                "engine.retry_backoff_secs must be a non-negative number of seconds, got {}",
                self.engine.retry_backoff_secs
            )));
        }
        if self.engine.max_concurrency == Some(0) {
            return Err(ParaselError::Config(
                "engine.max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
