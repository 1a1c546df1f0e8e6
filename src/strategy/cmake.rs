//! CMake sub-project driver.
//!
//! A `cmakeProject` target is an atomic node: configure once (or again on
//! `recheck`), then drive the generator's build tool. Output streams
//! through the pool as a single child job so signal handling and output
//! framing match native compiles.

use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::core::target::CMakeTarget;
use crate::pool::{Job, PoolCommand, PoolSettings};
use crate::util::fs::{ensure_dir, remove_dir_all_if_exists};

use super::{pool_error_to_build_error, BuildSession, StrategyContext};

/// Drives one CMake target.
pub struct CMakeDriver<'a> {
    ctx: &'a StrategyContext<'a>,
    target: &'a CMakeTarget,
}

impl<'a> CMakeDriver<'a> {
    pub fn new(ctx: &'a StrategyContext<'a>, target: &'a CMakeTarget) -> Self {
        CMakeDriver { ctx, target }
    }

    /// Sub-build directory under the configuration build dir.
    pub fn build_dir(&self) -> PathBuf {
        let segment = self.ctx.style.segment(
            &self.ctx.configuration.name,
            self.ctx.workspace,
            self.ctx.toolchain,
        );
        self.ctx
            .workspace
            .build_root()
            .join(segment)
            .join("cmake")
            .join(&self.target.name)
    }

    fn cmake(&self) -> Result<PathBuf> {
        self.ctx
            .toolchain
            .tools
            .cmake
            .clone()
            .ok_or_else(|| anyhow!(crate::error::BuildError::ToolchainNotFound {
                tool: "cmake".into(),
            }))
    }

    fn generator(&self) -> &'static str {
        if self.ctx.toolchain.tools.ninja.is_some() {
            "Ninja"
        } else if self.ctx.toolchain.tools.make_is_nmake || self.ctx.toolchain.tools.make_is_jom {
            "NMake Makefiles"
        } else {
            "Unix Makefiles"
        }
    }

    /// Configure (when needed) and build.
    pub fn build(&self, session: &mut BuildSession) -> Result<()> {
        let cmake = self.cmake()?;
        let build_dir = self.build_dir();

        if self.target.rebuild {
            remove_dir_all_if_exists(&build_dir)?;
        }
        ensure_dir(&build_dir)?;

        let configured = build_dir.join("CMakeCache.txt").exists();
        if !configured || self.target.recheck {
            let source_dir = self.ctx.workspace.root.join(&self.target.location);
            let mut argv = vec![
                cmake.display().to_string(),
                "-S".into(),
                source_dir.display().to_string(),
                "-B".into(),
                build_dir.display().to_string(),
                "-G".into(),
                self.generator().to_string(),
                format!("-DCMAKE_BUILD_TYPE={}", self.ctx.configuration.name),
            ];
            if let Some(toolset) = &self.target.toolset {
                argv.push("-T".into());
                argv.push(toolset.clone());
            }
            if let Some(build_file) = &self.target.build_file {
                // Non-standard lists file name.
                argv.push(format!("-DCMAKE_PROJECT_INCLUDE={}", build_file));
            }
            for define in &self.target.defines {
                argv.push(format!("-D{}", define));
            }

            self.stream(session, argv, "configure")?;
        }

        let argv = vec![
            cmake.display().to_string(),
            "--build".into(),
            build_dir.display().to_string(),
            "--parallel".into(),
            self.ctx.max_jobs.to_string(),
        ];
        self.stream(session, argv, "build")
    }

    /// Remove the sub-build directory when the target opts in.
    pub fn clean(&self) -> Result<()> {
        if self.target.clean {
            remove_dir_all_if_exists(&self.build_dir())?;
        }
        Ok(())
    }

    fn stream(&self, session: &mut BuildSession, argv: Vec<String>, phase: &str) -> Result<()> {
        let mut command = PoolCommand::new(argv, PathBuf::from(&self.target.name));
        command.output = format!("cmake {} {}", phase, self.target.name);
        command.cwd = Some(self.ctx.workspace.root.clone());
        command.env = self.ctx.toolchain.env_delta.clone();

        let job = Job {
            name: self.target.name.clone(),
            list: vec![command],
        };
        let settings = PoolSettings {
            color: console::Style::new().green(),
            show_commands: self.ctx.show_commands,
            ..Default::default()
        };

        session
            .pool
            .run(&job, &settings)
            .map_err(|e| anyhow!(pool_error_to_build_error(e, false)))
    }
}
