//! Debug dumper settings.

use std::path::PathBuf;

use serde::Deserialize;

fn default_dir() -> PathBuf {
    PathBuf::from("./dumps")
}

/// Settings for the debug dumper which persists raw request and response
/// bodies plus JSONL stream events to disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct DumpConfig {
    /// Whether dumping is enabled. Off by default.
    #[serde(default)]
    pub enabled: bool,

    /// Directory the dump files are written to.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_dir(),
        }
    }
}
