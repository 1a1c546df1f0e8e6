//! Nested sub-project driver.
//!
//! A `subProject` target is built by re-invoking this same program against
//! the child's build file, with the parent's toolchain, architecture and
//! environment pinned so the whole tree builds consistently.

use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::core::target::SubProjectTarget;
use crate::pool::{Job, PoolCommand, PoolSettings};
use crate::toolchain::env_script;
use crate::util::fs::ensure_dir;

use super::{pool_error_to_build_error, BuildSession, StrategyContext};

/// Drives one nested sub-project.
pub struct SubProjectDriver<'a> {
    ctx: &'a StrategyContext<'a>,
    target: &'a SubProjectTarget,
}

impl<'a> SubProjectDriver<'a> {
    pub fn new(ctx: &'a StrategyContext<'a>, target: &'a SubProjectTarget) -> Self {
        SubProjectDriver { ctx, target }
    }

    fn child_build_file(&self) -> PathBuf {
        let location = self.ctx.workspace.root.join(&self.target.location);
        match &self.target.build_file {
            Some(name) => location.join(name),
            None => location.join(crate::core::DEFAULT_BUILD_FILE),
        }
    }

    /// The argv of the child invocation.
    pub fn child_command(&self, env_file: &PathBuf) -> Result<Vec<String>> {
        let program = std::env::current_exe()
            .map_err(|e| anyhow!("cannot locate own executable: {}", e))?;

        let verb = if self.target.rebuild { "rebuild" } else { "build" };

        let mut argv = vec![
            program.display().to_string(),
            "--input-file".into(),
            self.child_build_file().display().to_string(),
            "--only-required".into(),
            "--envfile".into(),
            env_file.display().to_string(),
            "--toolchain".into(),
            self.ctx.toolchain.name.clone(),
            "--arch".into(),
            self.ctx.toolchain.target_triple.clone(),
            "--jobs".into(),
            self.ctx.max_jobs.to_string(),
            verb.into(),
            self.ctx.configuration.name.clone(),
        ];
        argv.extend(self.target.targets.iter().cloned());
        Ok(argv)
    }

    /// Build the sub-project as one streamed child.
    pub fn build(&self, session: &mut BuildSession) -> Result<()> {
        let build_file = self.child_build_file();
        if !build_file.exists() {
            return Err(anyhow!(crate::error::BuildError::io(
                &build_file,
                "sub-project build file not found",
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            )));
        }

        // Pin the vendor environment for the child through a compact env
        // file.
        let segment = self.ctx.style.segment(
            &self.ctx.configuration.name,
            self.ctx.workspace,
            self.ctx.toolchain,
        );
        let env_dir = self.ctx.workspace.build_root().join(segment);
        ensure_dir(&env_dir)?;
        let env_file = env_dir.join(format!("{}.env", self.target.name));
        env_script::write_env_file(&env_file, &self.ctx.toolchain.env_delta)?;

        let argv = self.child_command(&env_file)?;
        let mut command = PoolCommand::new(argv, build_file);
        command.output = format!("subproject {}", self.target.name);
        command.cwd = Some(self.ctx.workspace.root.join(&self.target.location));

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::testing;
    use crate::plan::BuildPathStyle;
    use crate::toolchain::ToolchainFamily;
    use tempfile::TempDir;

    #[test]
    fn test_child_command_shape() {
        let tmp = TempDir::new().unwrap();
        let ws = testing::workspace(tmp.path());
        let tc = testing::toolchain(ToolchainFamily::Gcc);
        let config = testing::configuration("Debug");

        let ctx = StrategyContext {
            workspace: &ws,
            configuration: &config,
            toolchain: &tc,
            style: BuildPathStyle::Configuration,
            max_jobs: 8,
            show_commands: false,
            keep_going: false,
            generate_compile_commands: false,
        };

        let target = SubProjectTarget {
            name: "engine".into(),
            location: "libs/engine".into(),
            build_file: None,
            recheck: false,
            rebuild: false,
            clean: false,
            targets: vec!["core".into()],
        };

        let driver = SubProjectDriver::new(&ctx, &target);
        let argv = driver
            .child_command(&tmp.path().join("engine.env"))
            .unwrap();

        assert!(argv.contains(&"--only-required".to_string()));
        assert!(argv.contains(&"--envfile".to_string()));
        assert!(argv.contains(&"build".to_string()));
        assert!(argv.contains(&"Debug".to_string()));
        // Inner target restriction rides at the end.
        assert_eq!(argv.last().unwrap(), "core");

        let build_pos = argv.iter().position(|a| a == "build").unwrap();
        assert_eq!(argv[build_pos + 1], "Debug");
    }

    #[test]
    fn test_rebuild_uses_rebuild_verb() {
        let tmp = TempDir::new().unwrap();
        let ws = testing::workspace(tmp.path());
        let tc = testing::toolchain(ToolchainFamily::Gcc);
        let config = testing::configuration("Debug");

        let ctx = StrategyContext {
            workspace: &ws,
            configuration: &config,
            toolchain: &tc,
            style: BuildPathStyle::Configuration,
            max_jobs: 1,
            show_commands: false,
            keep_going: false,
            generate_compile_commands: false,
        };

        let target = SubProjectTarget {
            name: "engine".into(),
            location: "libs/engine".into(),
            build_file: None,
            recheck: false,
            rebuild: true,
            clean: false,
            targets: Vec::new(),
        };

        let driver = SubProjectDriver::new(&ctx, &target);
        let argv = driver
            .child_command(&tmp.path().join("engine.env"))
            .unwrap();
        assert!(argv.contains(&"rebuild".to_string()));
    }
}
