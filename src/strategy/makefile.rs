//! Makefile emitter strategy.
//!
//! Generates one makefile per target under the configuration build
//! directory, then drives `make` (or `nmake`/`jom` on MSVC) as a single
//! streamed child. Incremental state is make's problem: rules include the
//! compiler-emitted dependency files.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::plan::{SourceType, TargetBuildPlan};
use crate::pool::{Job, PoolCommand};
use crate::util::fs::{ensure_dir, write_string};

use super::{
    pool_error_to_build_error, BuildSession, BuildStrategy, PlannedTarget, StrategyContext,
};

/// Make dialect the emitter writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MakeDialect {
    Gnu,
    NMake,
}

#[derive(Default)]
pub struct MakefileStrategy {
    targets: Vec<PlannedTarget>,
    makefiles: Vec<(String, PathBuf)>,
}

impl MakefileStrategy {
    pub fn new() -> MakefileStrategy {
        MakefileStrategy::default()
    }

    fn dialect(ctx: &StrategyContext) -> MakeDialect {
        if ctx.toolchain.tools.make_is_nmake || ctx.toolchain.tools.make_is_jom {
            MakeDialect::NMake
        } else {
            MakeDialect::Gnu
        }
    }

    fn emit(plan: &TargetBuildPlan, dialect: MakeDialect) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "# generated by slipway; do not edit");
        let _ = writeln!(text, ".SUFFIXES:");
        let _ = writeln!(text);
        let _ = writeln!(text, "all: {}", quote(&plan.outputs.artifact.display().to_string()));
        let _ = writeln!(text);

        let mut dep_files = Vec::new();

        if let Some(pch) = &plan.pch {
            let produced = pch
                .group
                .module_output
                .as_deref()
                .unwrap_or(&pch.group.object);
            let _ = writeln!(
                text,
                "{}: {}",
                quote(&produced.display().to_string()),
                quote(&pch.group.source.display().to_string())
            );
            let _ = writeln!(text, "\t{}", recipe(&pch.command.argv, dialect));
            let _ = writeln!(text);
        }

        for step in &plan.compiles {
            let pch_prereq = plan
                .pch
                .as_ref()
                .map(|p| {
                    let produced = p.group.module_output.as_deref().unwrap_or(&p.group.object);
                    format!(" {}", quote(&produced.display().to_string()))
                })
                .unwrap_or_default();

            let _ = writeln!(
                text,
                "{}: {}{}",
                quote(&step.group.object.display().to_string()),
                quote(&step.group.source.display().to_string()),
                pch_prereq
            );
            let _ = writeln!(text, "\t{}", recipe(&step.command.argv, dialect));
            if dialect == MakeDialect::Gnu && step.group.source_type != SourceType::WindowsResource
            {
                // Promote the compiler's temp dependency file.
                let temp = crate::compile::temp_dep_path(&step.group.dependency);
                let _ = writeln!(
                    text,
                    "\t@mv -f {} {}",
                    quote(&temp.display().to_string()),
                    quote(&step.group.dependency.display().to_string())
                );
                dep_files.push(step.group.dependency.clone());
            }
            let _ = writeln!(text);
        }

        let objects: Vec<String> = plan
            .outputs
            .object_files()
            .iter()
            .map(|o| quote(&o.display().to_string()))
            .collect();
        let _ = writeln!(
            text,
            "{}: {}",
            quote(&plan.outputs.artifact.display().to_string()),
            objects.join(" ")
        );
        let _ = writeln!(text, "\t{}", recipe(&plan.link.argv, dialect));
        let _ = writeln!(text);

        match dialect {
            MakeDialect::Gnu => {
                for dep in &dep_files {
                    let _ = writeln!(text, "-include {}", quote(&dep.display().to_string()));
                }
            }
            MakeDialect::NMake => {
                // NMake has no include-if-exists; dependency tracking rests
                // on the explicit prerequisites above.
            }
        }

        text
    }

    fn makefile_path(plan: &TargetBuildPlan) -> PathBuf {
        plan.outputs.build_dir.join(format!("{}.mk", plan.target))
    }
}

/// One recipe line from a synthesized argv.
fn recipe(argv: &[String], dialect: MakeDialect) -> String {
    let filtered: Vec<String> = argv
        .iter()
        // /showIncludes is only useful under the native pool's filter.
        .filter(|a| dialect == MakeDialect::Gnu || a.as_str() != "/showIncludes")
        .map(|a| quote(a))
        .collect();
    filtered.join(" ")
}

/// Quote an argument for a makefile recipe when it contains spaces.
fn quote(arg: &str) -> String {
    if arg.contains(' ') {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

impl BuildStrategy for MakefileStrategy {
    fn initialize(&mut self, ctx: &StrategyContext) -> Result<()> {
        ensure_dir(&ctx.workspace.build_root())
    }

    fn add_target(&mut self, planned: PlannedTarget) -> Result<()> {
        self.targets.push(planned);
        Ok(())
    }

    fn pre_build(&mut self, ctx: &StrategyContext) -> Result<()> {
        let dialect = Self::dialect(ctx);
        for planned in &self.targets {
            let path = Self::makefile_path(&planned.plan);
            ensure_dir(&planned.plan.outputs.build_dir)?;
            for group in &planned.plan.outputs.groups {
                if let Some(parent) = group.object.parent() {
                    ensure_dir(parent)?;
                }
                if let Some(parent) = group.dependency.parent() {
                    ensure_dir(parent)?;
                }
            }
            if let Some(pch) = &planned.plan.outputs.pch {
                if let Some(produced) = &pch.module_output {
                    if let Some(parent) = produced.parent() {
                        ensure_dir(parent)?;
                    }
                }
            }
            write_string(&path, &Self::emit(&planned.plan, dialect))?;
            self.makefiles.push((planned.plan.target.clone(), path));
        }
        Ok(())
    }

    fn build_target(
        &mut self,
        ctx: &StrategyContext,
        name: &str,
        session: &mut BuildSession,
    ) -> Result<()> {
        let (_, makefile) = self
            .makefiles
            .iter()
            .find(|(target, _)| target == name)
            .ok_or_else(|| anyhow!("target `{}` was never planned", name))?;

        let make = ctx
            .toolchain
            .tools
            .make
            .as_ref()
            .ok_or_else(|| anyhow!("no make tool resolved"))?;

        let mut argv = vec![make.display().to_string()];
        if ctx.toolchain.tools.make_is_nmake {
            argv.push("/NOLOGO".into());
            argv.push(format!("/F{}", makefile.display()));
        } else {
            argv.push("-f".into());
            argv.push(makefile.display().to_string());
            argv.push(format!("-j{}", ctx.max_jobs));
            if ctx.keep_going {
                argv.push("-k".into());
            }
        }

        let mut command = PoolCommand::new(argv, makefile.clone());
        command.output = format!("make {}", name);
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
