use parasel_core::context::Context;
use parasel_core::error::{ParaselError, Result};

use super::{Step, StepInfo};
use crate::executor::Runner;

/// Runs children one after another against the shared context.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub(crate) info: StepInfo,
    children: Vec<Step>,
    continue_on_error: bool,
}

impl Sequence {
    pub fn new(children: Vec<Step>) -> Self {
        Self {
            info: StepInfo::new("Sequence"),
            children,
            continue_on_error: false,
        }
    }

    /// Append a child.
    pub fn then(mut self, step: impl Into<Step>) -> Self {
        self.children.push(step.into());
        self
    }

    /// Keep going after a child fails and report every failure at the end.
    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub fn children(&self) -> &[Step] {
        &self.children
    }

    pub(crate) async fn run(&self, runner: &Runner, ctx: &Context) -> Result<()> {
        let mut errors = Vec::new();

        for child in &self.children {
            let Err(e) = runner.execute(child, ctx).await else {
                continue;
            };
            let deadline_hit = matches!(e.root_cause(), ParaselError::Timeout { .. });
            let wrapped = ParaselError::Child {
                step: self.info.name.clone(),
                child: child.name().to_string(),
                source: Box::new(e),
            };
            if !self.continue_on_error || deadline_hit {
                return Err(wrapped);
            }
            errors.push(wrapped);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ParaselError::Aggregate {
                step: self.info.name.clone(),
                errors,
            })
        }
    }
}
