//! Per-source incremental state.
//!
//! For every translation unit the cache remembers the source mtime, the
//! hash of the command that produced the object, the header list from the
//! compiler's dependency output, and whether the compile succeeded. The
//! staleness check combines those with the toolchain and workspace
//! identity.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::fs::{mtime_seconds, read_to_string, write_atomic};

/// Cached facts about one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub source_mtime: u64,
    pub command_hash: String,
    #[serde(default)]
    pub dep_list: Vec<PathBuf>,
    pub last_result: bool,
}

/// Why a TU must be recompiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    NeverBuilt,
    ObjectMissing,
    SourceChanged,
    CommandChanged,
    DependencyChanged,
    LastBuildFailed,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

/// The persistent per-workspace source cache.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SourceCache {
    /// Identity of the toolchain the entries were built with.
    toolchain_hash: String,
    /// Hash of the parsed build description.
    workspace_hash: String,
    /// Entries keyed by source path. BTreeMap keeps serialization stable.
    entries: BTreeMap<PathBuf, SourceEntry>,
}

impl SourceCache {
    /// Load the cache, discarding it with a warning when unreadable.
    ///
    /// A corrupt cache is never fatal; the build falls back to a full
    /// recompile.
    pub fn load(path: &Path) -> SourceCache {
        if !path.exists() {
            return SourceCache::default();
        }
        match read_to_string(path).and_then(|text| Ok(serde_json::from_str(&text)?)) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!("discarding corrupt source cache {}: {}", path.display(), e);
                SourceCache::default()
            }
        }
    }

    /// Persist the cache atomically.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, &json)
    }

    /// Install the current toolchain and workspace identity.
    ///
    /// A change to either discards every entry: a different compiler or an
    /// edited build description invalidates all previous results.
    pub fn set_identity(&mut self, toolchain_hash: &str, workspace_hash: &str) -> bool {
        let changed = self.toolchain_hash != toolchain_hash || self.workspace_hash != workspace_hash;
        if changed {
            if !self.entries.is_empty() {
                tracing::info!("toolchain or workspace changed; full rebuild");
            }
            self.entries.clear();
            self.toolchain_hash = toolchain_hash.to_string();
            self.workspace_hash = workspace_hash.to_string();
        }
        changed
    }

    /// Decide whether a TU must be recompiled.
    pub fn staleness(&self, source: &Path, object: &Path, command_hash: &str) -> Staleness {
        let Some(entry) = self.entries.get(source) else {
            return Staleness::NeverBuilt;
        };

        if !entry.last_result {
            return Staleness::LastBuildFailed;
        }
        if !object.exists() {
            return Staleness::ObjectMissing;
        }
        if mtime_seconds(source) > entry.source_mtime {
            return Staleness::SourceChanged;
        }
        if entry.command_hash != command_hash {
            return Staleness::CommandChanged;
        }

        let object_mtime = mtime_seconds(object);
        for dep in &entry.dep_list {
            if mtime_seconds(dep) > object_mtime {
                return Staleness::DependencyChanged;
            }
        }

        Staleness::Fresh
    }

    /// Record the outcome of a compile.
    pub fn record(
        &mut self,
        source: &Path,
        command_hash: &str,
        dep_list: Vec<PathBuf>,
        succeeded: bool,
    ) {
        self.entries.insert(
            source.to_path_buf(),
            SourceEntry {
                source_mtime: mtime_seconds(source),
                command_hash: command_hash.to_string(),
                dep_list,
                last_result: succeeded,
            },
        );
    }

    /// Forget one source (used when its file disappears).
    pub fn remove(&mut self, source: &Path) {
        self.entries.remove(source);
    }

    pub fn entry(&self, source: &Path) -> Option<&SourceEntry> {
        self.entries.get(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch_with_mtime(path: &Path, seconds_ago: u64) {
        fs::write(path, "x").unwrap();
        let mtime = std::time::SystemTime::now() - std::time::Duration::from_secs(seconds_ago);
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    #[test]
    fn test_never_built_is_stale() {
        let cache = SourceCache::default();
        let staleness = cache.staleness(Path::new("a.cpp"), Path::new("a.o"), "h");
        assert_eq!(staleness, Staleness::NeverBuilt);
        assert!(staleness.is_stale());
    }

    #[test]
    fn test_fresh_after_record() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.cpp");
        let object = tmp.path().join("a.o");
        touch_with_mtime(&source, 60);
        touch_with_mtime(&object, 0);

        let mut cache = SourceCache::default();
        cache.record(&source, "cmd", Vec::new(), true);

        assert_eq!(cache.staleness(&source, &object, "cmd"), Staleness::Fresh);
    }

    #[test]
    fn test_object_missing_is_stale() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.cpp");
        touch_with_mtime(&source, 60);

        let mut cache = SourceCache::default();
        cache.record(&source, "cmd", Vec::new(), true);

        assert_eq!(
            cache.staleness(&source, &tmp.path().join("a.o"), "cmd"),
            Staleness::ObjectMissing
        );
    }

    #[test]
    fn test_command_change_is_stale() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.cpp");
        let object = tmp.path().join("a.o");
        touch_with_mtime(&source, 60);
        touch_with_mtime(&object, 0);

        let mut cache = SourceCache::default();
        cache.record(&source, "cmd", Vec::new(), true);

        assert_eq!(
            cache.staleness(&source, &object, "other"),
            Staleness::CommandChanged
        );
    }

    #[test]
    fn test_newer_dependency_is_stale() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.cpp");
        let object = tmp.path().join("a.o");
        let header = tmp.path().join("a.hpp");
        touch_with_mtime(&source, 120);
        touch_with_mtime(&object, 60);
        touch_with_mtime(&header, 0); // newer than the object

        let mut cache = SourceCache::default();
        cache.record(&source, "cmd", vec![header], true);

        assert_eq!(
            cache.staleness(&source, &object, "cmd"),
            Staleness::DependencyChanged
        );
    }

    #[test]
    fn test_failed_build_stays_stale() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.cpp");
        let object = tmp.path().join("a.o");
        touch_with_mtime(&source, 60);
        touch_with_mtime(&object, 0);

        let mut cache = SourceCache::default();
        cache.record(&source, "cmd", Vec::new(), false);

        assert_eq!(
            cache.staleness(&source, &object, "cmd"),
            Staleness::LastBuildFailed
        );
    }

    #[test]
    fn test_identity_change_clears_entries() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.cpp");
        touch_with_mtime(&source, 0);

        let mut cache = SourceCache::default();
        assert!(cache.set_identity("tc1", "ws1"));
        cache.record(&source, "cmd", Vec::new(), true);

        // Same identity: entries survive.
        assert!(!cache.set_identity("tc1", "ws1"));
        assert_eq!(cache.len(), 1);

        // New toolchain: everything is invalidated.
        assert!(cache.set_identity("tc2", "ws1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.cpp");
        touch_with_mtime(&source, 0);

        let mut cache = SourceCache::default();
        cache.set_identity("tc", "ws");
        cache.record(&source, "cmd", vec![tmp.path().join("z.hpp")], true);
        cache.record(&tmp.path().join("b.cpp"), "cmd2", Vec::new(), true);

        let path1 = tmp.path().join("cache1.json");
        let path2 = tmp.path().join("cache2.json");
        cache.save(&path1).unwrap();

        let reloaded = SourceCache::load(&path1);
        reloaded.save(&path2).unwrap();

        assert_eq!(
            fs::read(&path1).unwrap(),
            fs::read(&path2).unwrap(),
            "write-read-write must be byte identical"
        );
    }

    #[test]
    fn test_corrupt_cache_discarded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();

        let cache = SourceCache::load(&path);
        assert!(cache.is_empty());
    }
}
