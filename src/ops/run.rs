//! Implementation of `slipway run` and `buildrun`.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};

use crate::core::target::{Target, TargetKind};
use crate::core::{BuildFileLoader, DEFAULT_BUILD_FILE};
use crate::ops::build::{self, BuildOptions};
use crate::plan::{BuildPathStyle, OutputsBuilder};
use crate::toolchain::{resolve_toolchain, ToolchainPreference};
use crate::util::process::ProcessBuilder;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub build: BuildOptions,
    /// Target to run; defaults to the first executable.
    pub target: Option<String>,
    pub arguments: Vec<String>,
    /// Build before running (`buildrun`).
    pub build_first: bool,
}

/// Build (optionally) and launch the run target with inherited stdio.
/// Returns the child's exit code.
pub fn execute(options: &RunOptions) -> Result<i32> {
    if options.build_first {
        let mut build_options = options.build.clone();
        if let Some(target) = &options.target {
            build_options.targets = vec![target.clone()];
        }
        build::execute(&build_options)?;
    }

    let build_file = options
        .build
        .input_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_FILE));
    let workspace = BuildFileLoader::new(&build_file, options.build.configuration_name())
        .target_arch(options.build.arch.as_deref())
        .load()?;
    let configuration = workspace
        .configuration(options.build.configuration_name())
        .expect("loader validated the configuration")
        .clone();

    // Pick the run target: explicit name, else the first executable.
    let target = match &options.target {
        Some(name) => workspace
            .target(name)
            .ok_or_else(|| anyhow!("unknown target `{}`", name))?,
        None => workspace
            .targets
            .iter()
            .find(|t| {
                t.as_source()
                    .map(|s| s.kind() == TargetKind::Executable)
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("workspace has no executable target to run"))?,
    };

    let artifact = match target {
        Target::Source(source) => {
            if source.kind() != TargetKind::Executable {
                bail!("target `{}` is not an executable", source.name);
            }
            let preference = ToolchainPreference::host_default();
            let toolchain = resolve_toolchain(
                &preference,
                &workspace.target_arch.triple,
                &workspace.search_paths,
            )?;
            OutputsBuilder::new(&workspace, &toolchain, &configuration, BuildPathStyle::default())
                .assemble(source)?
                .artifact
        }
        Target::CMake(cmake) => match &cmake.run_executable {
            Some(path) => workspace.build_root().join(path),
            None => bail!("cmake target `{}` declares no runExecutable", cmake.name),
        },
        other => bail!("target `{}` is not runnable", other.name()),
    };

    if !artifact.exists() {
        bail!(
            "{} does not exist; build it first (or use buildrun)",
            artifact.display()
        );
    }

    tracing::info!("running {}", artifact.display());
    let status = ProcessBuilder::new(&artifact)
        .args(&options.arguments)
        .cwd(&workspace.root)
        .status()?;

    Ok(status.code().unwrap_or_else(|| {
        crate::util::process::exit_signal(&status)
            .map(|s| -s)
            .unwrap_or(1)
    }))
}
