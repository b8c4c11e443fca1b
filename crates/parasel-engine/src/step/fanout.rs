use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use parasel_core::context::Context;
use parasel_core::error::{ParaselError, Result};

use super::concurrent::run_group;
use super::{Leaf, Step, StepInfo};
use crate::executor::Runner;

/// Static fan-out: one leaf clone per combination of argument values.
///
/// Combinations follow cartesian order with the last parameter varying
/// fastest. Every clone keeps the template's output key and accumulates
/// into it. Place the clones in a [`Concurrent`](super::Concurrent) group,
/// usually through `Concurrent::by_args`.
#[derive(Debug, Clone)]
pub struct ByArgs {
    template: Leaf,
    params: Vec<(String, Vec<Value>)>,
}

impl ByArgs {
    pub fn new(template: Leaf) -> Self {
        Self {
            template,
            params: Vec::new(),
        }
    }

    /// Add a parameter and the values it ranges over. Declaring the same
    /// parameter again replaces its values and keeps its position.
    pub fn with_param(mut self, name: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        let name = name.into();
        let values: Vec<Value> = values.into_iter().collect();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = values,
            None => self.params.push((name, values)),
        }
        self
    }

    pub fn template(&self) -> &Leaf {
        &self.template
    }

    /// Every combination of parameter values, in expansion order.
    pub fn combinations(&self) -> Vec<Vec<(String, Value)>> {
        let mut combos: Vec<Vec<(String, Value)>> = vec![Vec::new()];
        for (name, values) in &self.params {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut extended = combo.clone();
                    extended.push((name.clone(), value.clone()));
                    next.push(extended);
                }
            }
            combos = next;
        }
        combos
    }

    /// Clone the template once per combination.
    pub fn expand(&self) -> Vec<Leaf> {
        self.combinations()
            .into_iter()
            .map(|combo| {
                let name = clone_name(&self.template.info.name, &combo);
                self.template.fan_out_clone(name, combo)
            })
            .collect()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.expand().into_iter().map(Step::Leaf).collect()
    }
}

fn clone_name(template: &str, combo: &[(String, Value)]) -> String {
    if combo.is_empty() {
        return template.to_string();
    }
    let bound: Vec<String> = combo
        .iter()
        .map(|(name, value)| match value {
            Value::String(s) => format!("{}={}", name, s),
            other => format!("{}={}", name, other),
        })
        .collect();
    format!("{}[{}]", template, bound.join(","))
}

/// Dynamic fan-out: one leaf clone per item found under context keys at
/// run time.
///
/// Every configured key must hold an array. Items are gathered key by key
/// (nested arrays are flattened one level) and each clone receives its item
/// as the argument `param`. The clones run as a concurrent group.
#[derive(Debug, Clone)]
pub struct ByKeys {
    pub(crate) info: StepInfo,
    template: Leaf,
    keys: Vec<String>,
    param: String,
    max_concurrency: Option<usize>,
    fail_fast: bool,
}

impl ByKeys {
    pub fn new(
        template: Leaf,
        keys: impl IntoIterator<Item = impl Into<String>>,
        param: impl Into<String>,
    ) -> Self {
        Self {
            info: StepInfo::new(template.info.name.clone()),
            template,
            keys: keys.into_iter().map(Into::into).collect(),
            param: param.into(),
            max_concurrency: None,
            fail_fast: true,
        }
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    /// Read and validate every key before anything is spawned.
    fn collect_items(&self, ctx: &Context) -> Result<Vec<Value>> {
        let mut lists = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let wrap = |source: ParaselError| ParaselError::Failed {
                step: self.info.name.clone(),
                source: Box::new(source),
            };
            match ctx.get(key) {
                None => return Err(wrap(ParaselError::KeyNotFound(key.clone()))),
                Some(Value::Array(items)) => lists.push(items),
                Some(_) => return Err(wrap(ParaselError::NotASequence(key.clone()))),
            }
        }

        let mut items = Vec::new();
        for item in lists.into_iter().flatten() {
            match item {
                Value::Array(nested) => items.extend(nested),
                other => items.push(other),
            }
        }
        Ok(items)
    }

    pub(crate) async fn run(&self, runner: &Runner, ctx: &Context) -> Result<()> {
        let items = self.collect_items(ctx)?;
        if items.is_empty() {
            debug!(step = %self.info.name, "No items to fan out over");
            return Ok(());
        }

        let clones: Vec<Arc<Step>> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let name = format!("{}[{}]", self.template.info.name, i);
                let leaf = self.template.fan_out_clone(name, [(self.param.clone(), item)]);
                Arc::new(Step::Leaf(leaf))
            })
            .collect();

        run_group(
            runner,
            ctx,
            &self.info.name,
            &clones,
            self.max_concurrency,
            self.fail_fast,
        )
        .await
    }
}
