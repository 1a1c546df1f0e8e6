//! Implementation of `slipway get`, `set` and `unset`.
//!
//! Reads and writes the sticky per-project settings persisted in the
//! workspace cache.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::cache::WorkspaceCache;

/// Settings keys addressable from the command line.
const KNOWN_KEYS: &[&str] = &["strategy", "workingDirectory"];

fn cache_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".slipway/workspace_cache.json")
}

/// Print one setting.
pub fn get(workspace_root: &Path, key: &str) -> Result<()> {
    let cache = WorkspaceCache::load(&cache_path(workspace_root));
    let value = match key {
        "strategy" => cache.settings.strategy.clone(),
        "workingDirectory" => cache.settings.working_directory.clone(),
        _ => bail!("unknown settings key `{}` ({})", key, KNOWN_KEYS.join(", ")),
    };
    println!("{}", value);
    Ok(())
}

/// Store one setting.
pub fn set(workspace_root: &Path, key: &str, value: &str) -> Result<()> {
    let path = cache_path(workspace_root);
    let mut cache = WorkspaceCache::load(&path);
    match key {
        "strategy" => {
            if crate::strategy::StrategyKind::parse(value).is_none() {
                bail!("invalid strategy `{}` (native, makefile, ninja)", value);
            }
            cache.settings.strategy = value.to_string();
        }
        "workingDirectory" => cache.settings.working_directory = value.to_string(),
        _ => bail!("unknown settings key `{}` ({})", key, KNOWN_KEYS.join(", ")),
    }
    cache.save(&path)
}

/// Clear one setting.
pub fn unset(workspace_root: &Path, key: &str) -> Result<()> {
    let path = cache_path(workspace_root);
    let mut cache = WorkspaceCache::load(&path);
    match key {
        "strategy" => cache.settings.strategy.clear(),
        "workingDirectory" => cache.settings.working_directory.clear(),
        _ => bail!("unknown settings key `{}` ({})", key, KNOWN_KEYS.join(", ")),
    }
    cache.save(&path)
}
