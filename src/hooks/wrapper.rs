// src/hooks/wrapper.rs

use super::{Hook, HookResult};
use crate::exec::BatchTask;

/// Rewrites every submitted command through a template.
///
/// `{}` in the template is replaced with the original command, e.g.
/// `time -p {}` or `singularity exec image.sif sh -c '{}'`.
#[derive(Debug, Clone)]
pub struct WrapperHook {
    template: String,
}

impl WrapperHook {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl Hook for WrapperHook {
    fn name(&self) -> &str {
        "wrapper"
    }

    fn batch_submit(&mut self, task: &mut BatchTask) -> HookResult {
        task.command = self.template.replace("{}", &task.command);
        Ok(())
    }
}
