// src/hooks/resources.rs

use anyhow::bail;

use super::{Hook, HookResult};
use crate::dag::Dag;
use crate::types::Resources;

/// Rejects the workflow at `dag_check` if any node asks for more than the
/// configured limits. Unset limits are unbounded.
#[derive(Debug, Clone)]
pub struct ResourceCheckHook {
    limits: Resources,
}

impl ResourceCheckHook {
    pub fn new(limits: Resources) -> Self {
        Self { limits }
    }
}

fn exceeds<T: PartialOrd + Copy>(requested: Option<T>, limit: Option<T>) -> Option<(T, T)> {
    match (requested, limit) {
        (Some(r), Some(l)) if r > l => Some((r, l)),
        _ => None,
    }
}

impl Hook for ResourceCheckHook {
    fn name(&self) -> &str {
        "resources"
    }

    fn dag_check(&mut self, dag: &Dag) -> HookResult {
        for node in dag.nodes() {
            let req = node.resources;
            if let Some((r, l)) = exceeds(req.cores, self.limits.cores) {
                bail!("node '{}' requests {r} cores, limit is {l}", node.name);
            }
            if let Some((r, l)) = exceeds(req.memory_mb, self.limits.memory_mb) {
                bail!("node '{}' requests {r} MB memory, limit is {l} MB", node.name);
            }
            if let Some((r, l)) = exceeds(req.disk_mb, self.limits.disk_mb) {
                bail!("node '{}' requests {r} MB disk, limit is {l} MB", node.name);
            }
        }
        Ok(())
    }
}
