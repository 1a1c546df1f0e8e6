//! Implementation of `slipway clean`.

use std::path::PathBuf;

use anyhow::Result;

use crate::core::{BuildFileLoader, DEFAULT_BUILD_FILE};
use crate::util::fs::remove_dir_all_if_exists;

#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    pub configuration: Option<String>,
    pub input_file: Option<PathBuf>,
    /// Remove every configuration's output, not just the selected one.
    pub all: bool,
}

/// Remove build artifacts. Caches under the state directory survive a
/// clean; only outputs go.
pub fn execute(options: &CleanOptions) -> Result<()> {
    let build_file = options
        .input_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_FILE));
    let configuration = options.configuration.as_deref().unwrap_or("Release");

    let workspace = BuildFileLoader::new(&build_file, configuration).load()?;

    if options.all {
        remove_dir_all_if_exists(&workspace.build_root())?;
        remove_dir_all_if_exists(&workspace.state_dir().join("cache"))?;
        tracing::info!("removed {}", workspace.build_root().display());
        return Ok(());
    }

    // Without an arch/toolchain override the default style keys the build
    // dir by configuration name alone.
    let build_dir = workspace.build_root().join(configuration);
    remove_dir_all_if_exists(&build_dir)?;

    let cache_file = workspace
        .state_dir()
        .join("cache")
        .join(format!("{}.json", configuration));
    if cache_file.exists() {
        std::fs::remove_file(&cache_file).ok();
    }
    tracing::info!("removed {}", build_dir.display());
    Ok(())
}
