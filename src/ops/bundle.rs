//! Implementation of `slipway bundle` (and `install`).
//!
//! The core's side of distribution: collect each bundle's build artifacts
//! and included files into `dist/<bundle>/`. Platform packaging (desktop
//! entries, DMGs, installers) is carried out by external packagers over
//! the collected tree.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};

use crate::core::bundle::BundleTarget;
use crate::core::{BuildFileLoader, DEFAULT_BUILD_FILE};
use crate::ops::build::{self, BuildOptions};
use crate::util::fs::{ensure_dir, glob_files, matches_any_glob, relative_path};

#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    pub build: BuildOptions,
    /// Bundles to produce; empty means all declared bundles.
    pub bundles: Vec<String>,
}

/// Build the needed targets, then collect every requested bundle.
pub fn execute(options: &BundleOptions) -> Result<()> {
    let build_file = options
        .build
        .input_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_FILE));
    let workspace = BuildFileLoader::new(&build_file, options.build.configuration_name())
        .target_arch(options.build.arch.as_deref())
        .load()?;

    if workspace.bundles.is_empty() {
        bail!("the build file declares no distribution bundles");
    }

    let selected: Vec<&BundleTarget> = if options.bundles.is_empty() {
        workspace.bundles.iter().collect()
    } else {
        options
            .bundles
            .iter()
            .map(|name| {
                workspace
                    .bundles
                    .iter()
                    .find(|b| &b.name == name)
                    .ok_or_else(|| anyhow!("unknown bundle `{}`", name))
            })
            .collect::<Result<_>>()?
    };

    for bundle in &selected {
        // Bundles may pin a configuration; build it first.
        let mut build_options = options.build.clone();
        if let Some(config) = &bundle.configuration {
            build_options.configuration = Some(config.clone());
        }
        build_options.targets = bundle.build_targets.clone();
        build::execute(&build_options)?;

        collect_bundle(&workspace.root, &build_options, bundle)?;
    }

    Ok(())
}

fn collect_bundle(
    workspace_root: &Path,
    build_options: &BuildOptions,
    bundle: &BundleTarget,
) -> Result<()> {
    let configuration = build_options.configuration_name();
    let build_dir = workspace_root.join("build").join(configuration);
    let dist_dir = workspace_root.join("dist").join(&bundle.name);
    ensure_dir(&dist_dir)?;

    // Target artifacts: everything at the build dir root whose stem
    // matches an included target.
    let mut copied = 0usize;
    for entry in std::fs::read_dir(&build_dir)
        .map_err(|e| anyhow!(crate::error::BuildError::io(&build_dir, "cannot read build dir", e)))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let matches_target = bundle
            .build_targets
            .iter()
            .any(|t| stem == *t || stem == format!("lib{}", t));
        if matches_target {
            std::fs::copy(&path, dist_dir.join(entry.file_name()))?;
            copied += 1;
        }
    }

    // Included files, filtered by the exclude globs.
    let included = glob_files(workspace_root, &bundle.include)?;
    for file in included {
        let rel = relative_path(workspace_root, &file);
        if matches_any_glob(&rel, &bundle.exclude) {
            continue;
        }
        let destination = dist_dir.join(&rel);
        if let Some(parent) = destination.parent() {
            ensure_dir(parent)?;
        }
        std::fs::copy(&file, &destination)?;
        copied += 1;
    }

    tracing::info!(
        "bundle `{}`: {} file(s) in {}",
        bundle.name,
        copied,
        dist_dir.display()
    );
    Ok(())
}
