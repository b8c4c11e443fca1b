use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use parasel_core::error::{ParaselError, Result};
use parasel_engine::Step;

use crate::contract::Contract;
use crate::version::{Version, VersionSelector};

/// A runnable pipeline registered under an id and version.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: String,
    pub version: Version,
    pub step: Arc<Step>,
    pub description: Option<String>,
    /// Keys that must be in the input.
    pub requires: Vec<String>,
    /// Keys a successful run must leave in the context.
    pub produces: Vec<String>,
    pub input: Option<Contract>,
    pub output: Option<Contract>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl TaskSpec {
    /// Fails with `InvalidVersion` when `version` does not parse.
    pub fn new(task_id: impl Into<String>, version: &str, step: impl Into<Step>) -> Result<Self> {
        Ok(Self {
            task_id: task_id.into(),
            version: Version::parse(version)?,
            step: Arc::new(step.into()),
            description: None,
            requires: Vec::new(),
            produces: Vec::new(),
            input: None,
            output: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn requires(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn produces(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.produces = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, contract: Contract) -> Self {
        self.input = Some(contract);
        self
    }

    pub fn with_output(mut self, contract: Contract) -> Self {
        self.output = Some(contract);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            task_id: self.task_id.clone(),
            version: self.version.to_string(),
            description: self.description.clone(),
            requires: self.requires.clone(),
            produces: self.produces.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Serializable view of one task version.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub version: String,
    pub description: Option<String>,
    pub requires: Vec<String>,
    pub produces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Contract>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Contract>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

/// Serializable view of a task across its versions.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub versions: Vec<String>,
    pub latest: String,
    pub stable: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Replace an existing registration of the same version.
    pub overwrite: bool,
    pub mark_stable: bool,
}

#[derive(Debug, Default)]
struct TaskEntry {
    versions: BTreeMap<Version, Arc<TaskSpec>>,
    stable: Option<Version>,
}

/// Versioned tasks by id.
#[derive(Debug, Default)]
pub struct TaskCatalog {
    tasks: HashMap<String, TaskEntry>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails with `VersionConflict` if that version exists.
    pub fn register(&mut self, spec: TaskSpec) -> Result<Arc<TaskSpec>> {
        self.register_with(spec, RegisterOptions::default())
    }

    pub fn register_with(&mut self, spec: TaskSpec, options: RegisterOptions) -> Result<Arc<TaskSpec>> {
        let entry = self.tasks.entry(spec.task_id.clone()).or_default();
        if entry.versions.contains_key(&spec.version) && !options.overwrite {
            return Err(ParaselError::VersionConflict {
                task_id: spec.task_id.clone(),
                version: spec.version.to_string(),
            });
        }

        let spec = Arc::new(spec);
        // Drop the old key first so the written form of the version is refreshed.
        entry.versions.remove(&spec.version);
        entry.versions.insert(spec.version.clone(), spec.clone());
        if options.mark_stable {
            entry.stable = Some(spec.version.clone());
        }
        info!(
            task_id = %spec.task_id,
            version = %spec.version,
            stable = options.mark_stable,
            "Registered task"
        );
        Ok(spec)
    }

    pub fn get(&self, task_id: &str, selector: &VersionSelector) -> Result<Arc<TaskSpec>> {
        let entry = self.entry(task_id)?;
        let found = match selector {
            VersionSelector::Latest => entry.versions.values().next_back(),
            VersionSelector::Stable => {
                let stable = entry.stable.as_ref().ok_or_else(|| {
                    ParaselError::TaskNotFound(format!("no stable version marked for '{}'", task_id))
                })?;
                entry.versions.get(stable)
            }
            VersionSelector::Exact(version) => entry.versions.get(version),
        };
        found.cloned().ok_or_else(|| {
            let available: Vec<String> = entry.versions.keys().map(|v| v.to_string()).collect();
            ParaselError::TaskNotFound(format!(
                "'{}' version '{}' (available: {})",
                task_id,
                selector,
                available.join(", ")
            ))
        })
    }

    /// Versions of a task, lowest first.
    pub fn list_versions(&self, task_id: &str) -> Result<Vec<Version>> {
        Ok(self.entry(task_id)?.versions.keys().cloned().collect())
    }

    /// Task ids, sorted.
    pub fn list_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every task version carrying `tag`, ordered by id then version.
    pub fn by_tag(&self, tag: &str) -> Vec<Arc<TaskSpec>> {
        self.list_tasks()
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .flat_map(|entry| entry.versions.values())
            .filter(|spec| spec.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    pub fn mark_stable(&mut self, task_id: &str, version: &Version) -> Result<()> {
        let entry = self.tasks.get_mut(task_id).filter(|e| e.versions.contains_key(version));
        let Some(entry) = entry else {
            return Err(ParaselError::TaskNotFound(format!("'{}' version '{}'", task_id, version)));
        };
        entry.stable = Some(version.clone());
        debug!(task_id, version = %version, "Marked stable");
        Ok(())
    }

    pub fn stable_version(&self, task_id: &str) -> Option<&Version> {
        self.tasks.get(task_id).and_then(|e| e.stable.as_ref())
    }

    /// Remove one version, or the whole task when `version` is `None`.
    /// Removing the stable version clears the stable marker.
    pub fn unregister(&mut self, task_id: &str, version: Option<&Version>) -> Result<()> {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return Err(ParaselError::TaskNotFound(task_id.to_string()));
        };

        match version {
            None => {
                self.tasks.remove(task_id);
            }
            Some(version) => {
                if entry.versions.remove(version).is_none() {
                    return Err(ParaselError::TaskNotFound(format!("'{}' version '{}'", task_id, version)));
                }
                if entry.stable.as_ref() == Some(version) {
                    entry.stable = None;
                }
                if entry.versions.is_empty() {
                    self.tasks.remove(task_id);
                }
            }
        }
        info!(task_id, version = ?version.map(|v| v.to_string()), "Unregistered task");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// One summary per task, sorted by id.
    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.list_tasks()
            .into_iter()
            .filter_map(|id| {
                let entry = self.tasks.get(&id)?;
                let (latest_version, latest) = entry.versions.iter().next_back()?;
                Some(TaskSummary {
                    versions: entry.versions.keys().map(|v| v.to_string()).collect(),
                    latest: latest_version.to_string(),
                    stable: entry.stable.as_ref().map(|v| v.to_string()),
                    description: latest.description.clone(),
                    tags: latest.tags.clone(),
                    task_id: id,
                })
            })
            .collect()
    }

    fn entry(&self, task_id: &str) -> Result<&TaskEntry> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| ParaselError::TaskNotFound(task_id.to_string()))
    }
}
