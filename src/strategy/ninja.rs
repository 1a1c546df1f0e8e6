//! Ninja emitter strategy.
//!
//! Generates a single `build.ninja` covering every added target, then
//! executes `ninja` as one streamed child per requested target. Dependency
//! tracking uses ninja's native support: `deps = gcc` with a depfile, or
//! `deps = msvc` with the `Note: including file:` prefix.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::compile::{depfile::MSVC_INCLUDE_NOTE, temp_dep_path};
use crate::plan::{SourceType, TargetBuildPlan};
use crate::pool::{Job, PoolCommand};
use crate::util::fs::{ensure_dir, write_string};

use super::{
    pool_error_to_build_error, BuildSession, BuildStrategy, PlannedTarget, StrategyContext,
};

#[derive(Default)]
pub struct NinjaStrategy {
    targets: Vec<PlannedTarget>,
    build_file: Option<PathBuf>,
}

impl NinjaStrategy {
    pub fn new() -> NinjaStrategy {
        NinjaStrategy::default()
    }

    fn emit(&self, ctx: &StrategyContext) -> String {
        let msvc = !ctx.toolchain.family.is_gnu_style();
        let mut text = String::new();
        let _ = writeln!(text, "# generated by slipway; do not edit");
        let _ = writeln!(text, "ninja_required_version = 1.3");
        let _ = writeln!(text);

        if msvc {
            let _ = writeln!(text, "msvc_deps_prefix = {}", MSVC_INCLUDE_NOTE);
            let _ = writeln!(text);
            let _ = writeln!(text, "rule compile");
            let _ = writeln!(text, "  command = $CMD");
            let _ = writeln!(text, "  deps = msvc");
            let _ = writeln!(text, "  description = $DESC");
        } else {
            let _ = writeln!(text, "rule compile");
            let _ = writeln!(text, "  command = $CMD");
            let _ = writeln!(text, "  deps = gcc");
            let _ = writeln!(text, "  depfile = $DEPFILE");
            let _ = writeln!(text, "  description = $DESC");
        }
        let _ = writeln!(text);
        let _ = writeln!(text, "rule link");
        let _ = writeln!(text, "  command = $CMD");
        let _ = writeln!(text, "  description = $DESC");
        let _ = writeln!(text);

        for planned in &self.targets {
            let plan = &planned.plan;

            if let Some(pch) = &plan.pch {
                let produced = pch
                    .group
                    .module_output
                    .as_deref()
                    .unwrap_or(&pch.group.object);
                let _ = writeln!(
                    text,
                    "build {}: compile {}",
                    escape(&produced.display().to_string()),
                    escape(&pch.group.source.display().to_string())
                );
                let _ = writeln!(text, "  CMD = {}", command_text(&pch.command.argv));
                if !msvc {
                    let _ = writeln!(
                        text,
                        "  DEPFILE = {}",
                        temp_dep_path(&pch.group.dependency).display()
                    );
                }
                let _ = writeln!(text, "  DESC = pch {}", plan.target);
            }

            for step in &plan.compiles {
                let pch_dep = plan
                    .pch
                    .as_ref()
                    .map(|p| {
                        let produced = p.group.module_output.as_deref().unwrap_or(&p.group.object);
                        format!(" | {}", escape(&produced.display().to_string()))
                    })
                    .unwrap_or_default();

                let _ = writeln!(
                    text,
                    "build {}: compile {}{}",
                    escape(&step.group.object.display().to_string()),
                    escape(&step.group.source.display().to_string()),
                    pch_dep
                );
                let _ = writeln!(text, "  CMD = {}", command_text(&step.command.argv));
                if !msvc && step.group.source_type != SourceType::WindowsResource {
                    let _ = writeln!(
                        text,
                        "  DEPFILE = {}",
                        temp_dep_path(&step.group.dependency).display()
                    );
                }
                let _ = writeln!(
                    text,
                    "  DESC = {}",
                    step.group.source.display()
                );
            }

            let objects: Vec<String> = plan
                .outputs
                .object_files()
                .iter()
                .map(|o| escape(&o.display().to_string()))
                .collect();
            let _ = writeln!(
                text,
                "build {}: link {}",
                escape(&plan.outputs.artifact.display().to_string()),
                objects.join(" ")
            );
            let _ = writeln!(text, "  CMD = {}", command_text(&plan.link.argv));
            let _ = writeln!(text, "  DESC = link {}", plan.target);

            let _ = writeln!(
                text,
                "build {}: phony {}",
                escape(&plan.target),
                escape(&plan.outputs.artifact.display().to_string())
            );
            let _ = writeln!(text);
        }

        text
    }
}

/// Join an argv into a ninja command string, quoting spaced arguments.
fn command_text(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.contains(' ') {
                format!("\"{}\"", a)
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape ninja-significant characters in a path.
fn escape(text: &str) -> String {
    text.replace('$', "$$").replace(' ', "$ ").replace(':', "$:")
}

impl BuildStrategy for NinjaStrategy {
    fn initialize(&mut self, ctx: &StrategyContext) -> Result<()> {
        ensure_dir(&ctx.workspace.build_root())
    }

    fn add_target(&mut self, planned: PlannedTarget) -> Result<()> {
        self.targets.push(planned);
        Ok(())
    }

    fn pre_build(&mut self, ctx: &StrategyContext) -> Result<()> {
        let Some(first) = self.targets.first() else {
            return Ok(());
        };
        let build_dir = first.plan.outputs.build_dir.clone();
        ensure_dir(&build_dir)?;

        let path = build_dir.join("build.ninja");
        write_string(&path, &self.emit(ctx))?;
        self.build_file = Some(path);
        Ok(())
    }

    fn build_target(
        &mut self,
        ctx: &StrategyContext,
        name: &str,
        session: &mut BuildSession,
    ) -> Result<()> {
        let build_file = self
            .build_file
            .as_ref()
            .ok_or_else(|| anyhow!("ninja build file was never emitted"))?;
        let ninja = ctx
            .toolchain
            .tools
            .ninja
            .as_ref()
            .ok_or_else(|| anyhow!("no ninja tool resolved"))?;

        let mut argv = vec![
            ninja.display().to_string(),
            "-f".into(),
            build_file.display().to_string(),
            format!("-j{}", ctx.max_jobs),
        ];
        if ctx.keep_going {
            argv.push("-k".into());
            argv.push("0".into());
        }
        argv.push(name.to_string());

        let mut command = PoolCommand::new(argv, build_file.clone());
        command.output = format!("ninja {}", name);
        command.cwd = Some(ctx.workspace.root.clone());
        command.env = ctx.toolchain.env_delta.clone();

        let job = Job {
            name: name.to_string(),
            list: vec![command],
        };
        let settings = crate::pool::PoolSettings {
            show_commands: ctx.show_commands,
            keep_going: ctx.keep_going,
            ..Default::default()
        };

        session
            .pool
            .run(&job, &settings)
            .map_err(|e| anyhow!(pool_error_to_build_error(e, false)))?;

        if ctx.generate_compile_commands {
            if let Some(planned) = self.targets.iter().find(|p| p.plan.target == name) {
                for step in &planned.plan.compiles {
                    if step.group.source_type == SourceType::WindowsResource {
                        continue;
                    }
                    session.compile_commands.add(
                        &ctx.workspace.root,
                        &step.group.source,
                        step.command.argv.clone(),
                    );
                }
            }
        }

        Ok(())
    }

    fn post_build(&mut self, _ctx: &StrategyContext, _session: &mut BuildSession) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::testing;
    use crate::plan::{BuildPathStyle, OutputsBuilder};
    use crate::toolchain::ToolchainFamily;
    use tempfile::TempDir;

    fn strategy_with_target(tmp: &TempDir, family: ToolchainFamily) -> (NinjaStrategy, StrategyContextOwned) {
        let ws = testing::workspace(tmp.path());
        let tc = testing::toolchain(family);
        let config = testing::configuration("Debug");
        let target = testing::hello_target(tmp);
        let outputs = OutputsBuilder::new(&ws, &tc, &config, BuildPathStyle::Configuration)
            .assemble(&target)
            .unwrap();
        let plan = TargetBuildPlan::new(&ws, &target, &config, &tc, outputs).unwrap();

        let mut strategy = NinjaStrategy::new();
        strategy
            .add_target(PlannedTarget { target, plan })
            .unwrap();
        (strategy, StrategyContextOwned { ws, tc, config })
    }

    struct StrategyContextOwned {
        ws: crate::core::Workspace,
        tc: crate::toolchain::ResolvedToolchain,
        config: crate::core::BuildConfiguration,
    }

    impl StrategyContextOwned {
        fn ctx(&self) -> StrategyContext<'_> {
            StrategyContext {
                workspace: &self.ws,
                configuration: &self.config,
                toolchain: &self.tc,
                style: BuildPathStyle::Configuration,
                max_jobs: 4,
                show_commands: false,
                keep_going: false,
                generate_compile_commands: false,
            }
        }
    }

    #[test]
    fn test_gnu_rules_use_gcc_deps() {
        let tmp = TempDir::new().unwrap();
        let (strategy, owned) = strategy_with_target(&tmp, ToolchainFamily::Gcc);
        let text = strategy.emit(&owned.ctx());

        assert!(text.contains("deps = gcc"));
        assert!(text.contains("depfile = $DEPFILE"));
        assert!(text.contains("rule link"));
        assert!(text.contains("build hello: phony"));
        assert!(!text.contains("msvc_deps_prefix"));
    }

    #[test]
    fn test_msvc_rules_use_msvc_deps() {
        let tmp = TempDir::new().unwrap();
        let (strategy, owned) = strategy_with_target(&tmp, ToolchainFamily::Msvc);
        let text = strategy.emit(&owned.ctx());

        assert!(text.contains("deps = msvc"));
        assert!(text.contains("msvc_deps_prefix = Note: including file:"));
        assert!(!text.contains("depfile ="));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a b"), "a$ b");
        assert_eq!(escape("c:d"), "c$:d");
        assert_eq!(escape("$x"), "$$x");
    }
}
