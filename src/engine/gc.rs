// src/engine/gc.rs

//! Garbage collection of intermediate files.
//!
//! A file that no remaining node needs moves `EXIST -> COMPLETE`. If the
//! policy allows it, it then goes `COMPLETE -> CLEAN -> DELETED`, with the
//! matching file hooks at each step:
//!
//! - `file_complete` or `file_clean` veto: file is retained where it is
//! - failed removal: logged, file retained in `CLEAN`
//! - `file_deleted` veto: logged only

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use super::core::CoreRuntime;
use crate::dag::{DagFile, FileEvent, FileId};
use crate::errors::{BatchdagError, Result};
use crate::types::GcMode;

/// Which collectable files may actually be deleted.
#[derive(Debug, Clone)]
pub struct GcPolicy {
    mode: GcMode,
    keep: GlobSet,
}

impl GcPolicy {
    pub fn new(mode: GcMode, keep: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in keep {
            let glob = Glob::new(pattern).map_err(|e| {
                BatchdagError::ConfigError(format!("invalid gc keep pattern '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }
        let keep = builder
            .build()
            .map_err(|e| BatchdagError::ConfigError(format!("building gc keep set: {e}")))?;
        Ok(Self { mode, keep })
    }

    /// Only intermediate files are ever deleted; workflow inputs and final
    /// outputs stay.
    pub fn should_delete(&self, file: &DagFile) -> bool {
        self.mode == GcMode::RefCount
            && file.is_intermediate()
            && !file.retained
            && !self.keep.is_match(&file.path)
    }
}

impl CoreRuntime {
    /// One GC pass. Returns the files deleted in this pass.
    pub fn collect_garbage(&mut self) -> Result<Vec<FileId>> {
        let mut deleted = Vec::new();

        for id in self.sched.files_no_longer_needed() {
            let dag = self.sched.dag();
            if let Err(e) = self.hooks.file_complete(dag, dag.file(id)) {
                debug!(error = %e, "file retained");
                self.sched.set_retained(id);
                continue;
            }
            self.sched.apply_file(id, FileEvent::Complete)?;
            self.record_file(id);

            if !self.gc.should_delete(self.sched.dag().file(id)) {
                continue;
            }

            if self.collect_one(id)? {
                deleted.push(id);
            }
        }

        Ok(deleted)
    }

    /// `COMPLETE -> CLEAN -> DELETED` for a single file.
    fn collect_one(&mut self, id: FileId) -> Result<bool> {
        let dag = self.sched.dag();
        let file = dag.file(id);
        if let Err(e) = self.hooks.file_clean(dag, file) {
            debug!(error = %e, "file retained");
            self.sched.set_retained(id);
            return Ok(false);
        }
        self.sched.apply_file(id, FileEvent::Clean)?;
        self.record_file(id);

        let path = self.sched.dag().file(id).path.clone();
        if let Err(e) = self.fs.remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to delete intermediate file");
            self.sched.set_retained(id);
            return Ok(false);
        }

        self.sched.apply_file(id, FileEvent::Delete)?;
        self.record_file(id);
        info!(path = %path.display(), "intermediate file deleted");

        let dag = self.sched.dag();
        if let Err(e) = self.hooks.file_deleted(dag, dag.file(id)) {
            debug!(error = %e, "file_deleted veto ignored");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::dag::NodeId;

    fn intermediate(path: &str) -> DagFile {
        let mut f = DagFile::new(FileId(0), PathBuf::from(path));
        f.producer = Some(NodeId(0));
        f.consumers.push(NodeId(1));
        f
    }

    #[test]
    fn deletes_only_intermediate_files() {
        let policy = GcPolicy::new(GcMode::RefCount, &[]).unwrap();
        assert!(policy.should_delete(&intermediate("tmp/f1")));

        let mut source = intermediate("in");
        source.producer = None;
        assert!(!policy.should_delete(&source));

        let mut last = intermediate("out");
        last.consumers.clear();
        assert!(!policy.should_delete(&last));
    }

    #[test]
    fn keep_globs_and_mode_none_protect_files() {
        let policy = GcPolicy::new(GcMode::RefCount, &["results/**".to_string()]).unwrap();
        assert!(!policy.should_delete(&intermediate("results/a/f1")));
        assert!(policy.should_delete(&intermediate("scratch/f1")));

        let off = GcPolicy::new(GcMode::None, &[]).unwrap();
        assert!(!off.should_delete(&intermediate("scratch/f1")));
    }

    #[test]
    fn bad_keep_glob_is_config_error() {
        let err = GcPolicy::new(GcMode::RefCount, &["a/[".to_string()]).unwrap_err();
        assert!(matches!(err, BatchdagError::ConfigError(_)));
    }
}
