//! Workspace-level cache.
//!
//! Small keyed store persisted per project: which strategy and working
//! directory the last build used, plus identity hashes that gate build-dir
//! reuse. Data keys are fixed two-character tags so the file stays stable
//! across renames of internal enums.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::fs::{read_to_string, write_atomic};

/// Data keys. Two characters, never reused.
pub mod keys {
    /// Hash of the parsed build description.
    pub const WORKSPACE_HASH: &str = "01";
    /// Toolchain identity hash of the last build.
    pub const TOOLCHAIN_HASH: &str = "02";
    /// Version of this tool that produced the build directory.
    pub const APP_VERSION: &str = "03";
    /// Build-path style of the last build.
    pub const BUILD_PATH_STYLE: &str = "04";
    /// Configuration name of the last build.
    pub const LAST_CONFIGURATION: &str = "05";
    /// Target architecture triple of the last build.
    pub const TARGET_TRIPLE: &str = "06";
}

/// Sticky user settings persisted alongside the hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
    #[serde(default, rename = "workingDirectory", skip_serializing_if = "String::is_empty")]
    pub working_directory: String,
}

/// The per-project cache file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkspaceCache {
    #[serde(default)]
    pub settings: WorkspaceSettings,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl WorkspaceCache {
    pub fn load(path: &Path) -> WorkspaceCache {
        if !path.exists() {
            return WorkspaceCache::default();
        }
        match read_to_string(path).and_then(|text| Ok(serde_json::from_str(&text)?)) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(
                    "discarding corrupt workspace cache {}: {}",
                    path.display(),
                    e
                );
                WorkspaceCache::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, &json)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Store a value, reporting whether it changed.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        let changed = self.data.get(key) != Some(&value);
        self.data.insert(key.to_string(), value);
        changed
    }

    /// Whether any identity key differs from the given current values.
    ///
    /// When true, the per-configuration build directory cannot be trusted
    /// and targets rebuild from scratch.
    pub fn identity_changed(&self, pairs: &[(&str, &str)]) -> bool {
        pairs.iter().any(|(key, current)| {
            self.get(key).map(|stored| stored != *current).unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_reports_change() {
        let mut cache = WorkspaceCache::default();
        assert!(cache.set(keys::WORKSPACE_HASH, "abc"));
        assert!(!cache.set(keys::WORKSPACE_HASH, "abc"));
        assert!(cache.set(keys::WORKSPACE_HASH, "def"));
    }

    #[test]
    fn test_identity_changed() {
        let mut cache = WorkspaceCache::default();
        // Nothing stored yet: not a change, just a first build.
        assert!(!cache.identity_changed(&[(keys::TOOLCHAIN_HASH, "t1")]));

        cache.set(keys::TOOLCHAIN_HASH, "t1");
        assert!(!cache.identity_changed(&[(keys::TOOLCHAIN_HASH, "t1")]));
        assert!(cache.identity_changed(&[(keys::TOOLCHAIN_HASH, "t2")]));
    }

    #[test]
    fn test_round_trip_stable() {
        let tmp = TempDir::new().unwrap();
        let path1 = tmp.path().join("c1.json");
        let path2 = tmp.path().join("c2.json");

        let mut cache = WorkspaceCache::default();
        cache.settings.strategy = "native".into();
        cache.set(keys::WORKSPACE_HASH, "ws");
        cache.set(keys::TOOLCHAIN_HASH, "tc");
        cache.save(&path1).unwrap();

        let reloaded = WorkspaceCache::load(&path1);
        assert_eq!(reloaded.settings.strategy, "native");
        assert_eq!(reloaded.get(keys::WORKSPACE_HASH), Some("ws"));

        reloaded.save(&path2).unwrap();
        assert_eq!(
            std::fs::read(&path1).unwrap(),
            std::fs::read(&path2).unwrap()
        );
    }
}
