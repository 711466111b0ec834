use std::str::FromStr;
use serde::Deserialize;

/// Garbage-collection policy for intermediate files.
///
/// - `RefCount`: delete an intermediate file as soon as nothing needs it any
///   more (default behaviour).
/// - `None`: never delete anything; files still reach `COMPLETE` so hooks can
///   observe that they are no longer needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcMode {
    None,
    RefCount,
}

impl Default for GcMode {
    fn default() -> Self {
        GcMode::RefCount
    }
}

impl FromStr for GcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(GcMode::None),
            "ref_count" | "refcount" => Ok(GcMode::RefCount),
            other => Err(format!(
                "invalid gc mode: {other} (expected \"ref_count\" or \"none\")"
            )),
        }
    }
}

/// Resource requests attached to a node.
///
/// These are hints for the executor; the core never enforces them itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cores: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub disk_mb: Option<u64>,
}
