//! Implementation of `slipway configure`.
//!
//! Resolves the toolchain for the workspace and persists it, without
//! building anything. Useful to prime caches and to inspect what a build
//! would use.

use std::path::PathBuf;

use anyhow::Result;

use crate::cache::{ToolchainCache, ToolchainEntry};
use crate::core::{BuildFileLoader, DEFAULT_BUILD_FILE};
use crate::ops::build::BuildOptions;
use crate::toolchain::{env_script, resolve_toolchain, ToolchainPreference};

/// Resolve and persist the toolchain; write the env-delta file.
pub fn execute(options: &BuildOptions) -> Result<()> {
    let build_file = options
        .input_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_FILE));
    let workspace = BuildFileLoader::new(&build_file, options.configuration_name())
        .target_arch(options.arch.as_deref())
        .load()?;

    let mut preference = ToolchainPreference::host_default();
    if let Some(name) = &options.toolchain {
        preference.name = name.clone();
    }

    let toolchain = resolve_toolchain(
        &preference,
        &workspace.target_arch.triple,
        &workspace.search_paths,
    )?;

    println!(
        "toolchain: {} ({} {})",
        toolchain.name, toolchain.family, toolchain.version
    );
    println!("  C++:      {}", toolchain.cpp.display());
    println!("  C:        {}", toolchain.cc.display());
    println!("  linker:   {}", toolchain.linker.display());
    println!("  archiver: {}", toolchain.archiver.display());
    if let Some(rc) = &toolchain.resource_compiler {
        println!("  rc:       {}", rc.display());
    }
    if let Some(cmake) = &toolchain.tools.cmake {
        println!(
            "  cmake:    {} ({})",
            cmake.display(),
            toolchain.tools.cmake_version.as_deref().unwrap_or("?")
        );
    }
    if let Some(ninja) = &toolchain.tools.ninja {
        println!(
            "  ninja:    {} ({})",
            ninja.display(),
            toolchain.tools.ninja_version.as_deref().unwrap_or("?")
        );
    }

    let state_dir = workspace.state_dir();
    let local_path = state_dir.join("toolchains.json");
    let mut cache = ToolchainCache::load(&local_path);
    cache.insert(
        &preference.name,
        ToolchainEntry::from_resolved(&toolchain, ""),
    );
    cache.save(&local_path)?;

    if !toolchain.env_delta.is_empty() {
        let env_file = state_dir.join("build.env");
        env_script::write_env_file(&env_file, &toolchain.env_delta)?;
        tracing::info!("wrote {}", env_file.display());
    }

    if options.save_user_toolchain_globally {
        if let Some(global_path) = ToolchainCache::global_path() {
            let mut global = ToolchainCache::load(&global_path);
            global.insert(
                &preference.name,
                ToolchainEntry::from_resolved(&toolchain, ""),
            );
            global.save(&global_path)?;
        }
    }

    Ok(())
}
