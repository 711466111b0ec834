// src/hooks/archive.rs

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use super::{Hook, HookResult};
use crate::dag::{Dag, DagFile};
use crate::fs::FileSystem;

/// Copies intermediate files into an archive directory before they are
/// collected. A failed copy vetoes the clean, so the file is kept.
#[derive(Debug, Clone)]
pub struct ArchiveHook {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl ArchiveHook {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: dir.into(),
            fs,
        }
    }

    /// Where `path` lands inside the archive. Root and `..` components are
    /// dropped so nothing escapes the archive directory.
    pub fn destination(&self, path: &Path) -> PathBuf {
        let relative: PathBuf = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        self.dir.join(relative)
    }
}

impl Hook for ArchiveHook {
    fn name(&self) -> &str {
        "archive"
    }

    fn file_clean(&mut self, _dag: &Dag, file: &DagFile) -> HookResult {
        let dest = self.destination(&file.path);

        let mut contents = Vec::new();
        self.fs
            .open_read(&file.path)?
            .read_to_end(&mut contents)
            .with_context(|| format!("reading {:?} for archiving", file.path))?;
        self.fs.write(&dest, &contents)?;

        info!(path = %file.path.display(), archive = %dest.display(), "file archived");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn destination_stays_inside_archive() {
        let hook = ArchiveHook::new("arch", Arc::new(MockFileSystem::new()));
        assert_eq!(hook.destination(Path::new("/tmp/x/f1")), PathBuf::from("arch/tmp/x/f1"));
        assert_eq!(hook.destination(Path::new("../f2")), PathBuf::from("arch/f2"));
        assert_eq!(hook.destination(Path::new("./sub/f3")), PathBuf::from("arch/sub/f3"));
    }
}
