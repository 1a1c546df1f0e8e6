//! Native build strategy.
//!
//! Plans directly against the command pool: no build files are emitted,
//! the staleness check runs in-process against the source cache, and
//! module-enabled targets go through scan -> DAG -> batched compilation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use rayon::prelude::*;

use crate::compile::{
    command_builder, depfile, pch_stub_source, temp_dep_path, CommandLine, CompileContext,
};
use crate::modules::{parse_scan_output, ModulePlan, ModuleScan};
use crate::plan::{CompileStep, SourceFileGroup, SourceType, TargetBuildPlan};
use crate::pool::{Job, PoolCommand, PoolError, PoolSettings};
use crate::toolchain::ToolchainFamily;
use crate::util::fs::{ensure_dir, mtime_seconds, read_to_string, relative_path, rename_replace, write_string};
use crate::util::hash::command_hash;

use super::{
    pool_error_to_build_error, BuildSession, BuildStrategy, PlannedTarget, StrategyContext,
};

/// The pool-driven backend.
#[derive(Default)]
pub struct NativeStrategy {
    targets: Vec<PlannedTarget>,
}

impl NativeStrategy {
    pub fn new() -> NativeStrategy {
        NativeStrategy::default()
    }

    fn pool_settings(&self, ctx: &StrategyContext, msvc: bool) -> PoolSettings {
        PoolSettings {
            color: console::Style::new().blue(),
            start_index: 1,
            total: 0,
            quiet: false,
            show_commands: ctx.show_commands,
            keep_going: ctx.keep_going,
            msvc_filter: msvc,
        }
    }

    fn pool_command(
        &self,
        ctx: &StrategyContext,
        command: &CommandLine,
        reference: &Path,
        dependency: Option<&Path>,
    ) -> PoolCommand {
        let display = relative_path(&ctx.workspace.root, &command.output);
        PoolCommand {
            output: display.display().to_string(),
            reference: reference.to_path_buf(),
            dependency_file: dependency.map(Path::to_path_buf),
            command: command.argv.clone(),
            cwd: Some(ctx.workspace.root.clone()),
            env: ctx.toolchain.env_delta.clone(),
            cleanup_on_failure: None,
        }
    }

    /// Create every output directory a plan writes into.
    fn ensure_output_dirs(plan: &TargetBuildPlan) -> Result<()> {
        let outputs = &plan.outputs;
        ensure_dir(&outputs.build_dir)?;
        for group in outputs.groups.iter().chain(outputs.pch.iter()) {
            for path in [&group.object, &group.dependency]
                .into_iter()
                .chain(group.assembly.iter())
                .chain(group.module_output.iter())
            {
                if let Some(parent) = path.parent() {
                    ensure_dir(parent)?;
                }
            }
        }
        ensure_dir(&outputs.bmi_dir)?;
        Ok(())
    }

    /// After a compile: land the dependency file and record the cache
    /// entry.
    fn finalize_compile(
        &self,
        session: &mut BuildSession,
        group: &SourceFileGroup,
        hash: &str,
        succeeded: bool,
    ) {
        if !succeeded {
            session
                .source_cache
                .record(&group.source, hash, Vec::new(), false);
            return;
        }

        // GNU compilers write `<dep>.Td`; promote it only on success so a
        // truncated file never shadows a good one.
        let temp = temp_dep_path(&group.dependency);
        if temp.exists() {
            let _ = rename_replace(&temp, &group.dependency);
        }

        let deps = if group.dependency.exists() {
            depfile::parse_dep_file(&group.dependency).unwrap_or_default()
        } else {
            Vec::new()
        };

        session.source_cache.record(&group.source, hash, deps, true);
    }

    fn run_job(
        &self,
        session: &mut BuildSession,
        job: &Job,
        settings: &mut PoolSettings,
    ) -> std::result::Result<(), PoolError> {
        if job.list.is_empty() {
            return Ok(());
        }
        session.pool.run(job, settings)?;
        settings.start_index += job.list.len() as u32;
        Ok(())
    }

    fn job_error(&self, error: PoolError, linking: bool) -> anyhow::Error {
        anyhow!(pool_error_to_build_error(error, linking))
    }

    /// Dispatch a set of compile steps as one parallel job, recording the
    /// outcome of each in the cache.
    fn run_compile_steps(
        &self,
        ctx: &StrategyContext,
        session: &mut BuildSession,
        work: &[(&CompileStep, String)],
        extra: &[CommandLine],
        settings: &mut PoolSettings,
    ) -> Result<()> {
        if work.is_empty() && extra.is_empty() {
            return Ok(());
        }
        let msvc = !ctx.toolchain.family.is_gnu_style();

        let mut job = Job {
            name: "compile".into(),
            list: Vec::new(),
        };
        for (step, _) in work {
            job.list.push(self.pool_command(
                ctx,
                &step.command,
                &step.group.source,
                msvc.then_some(step.group.dependency.as_path()),
            ));
        }
        for dump in extra {
            job.list.push(self.pool_command(ctx, dump, &dump.output, None));
        }

        let result = self.run_job(session, &job, settings);
        let failed: BTreeSet<PathBuf> = match &result {
            Err(PoolError::BuildFailure { failures }) => failures.iter().cloned().collect(),
            _ => BTreeSet::new(),
        };
        for (step, hash) in work {
            let succeeded =
                !failed.contains(&step.group.source) && (result.is_ok() || step.group.object.exists());
            self.finalize_compile(session, &step.group, hash, succeeded);
        }

        result.map_err(|e| self.job_error(e, false))
    }

    /// Run the PCH generation job when the PCH is stale. Returns whether
    /// anything was built.
    fn run_pch(
        &self,
        ctx: &StrategyContext,
        session: &mut BuildSession,
        plan: &TargetBuildPlan,
        settings: &mut PoolSettings,
    ) -> Result<bool> {
        let Some(step) = &plan.pch else {
            return Ok(false);
        };
        let msvc = !ctx.toolchain.family.is_gnu_style();

        let produced = step
            .group
            .module_output
            .as_deref()
            .unwrap_or(&step.group.object);
        let hash = command_hash(&step.command.argv);
        if !session
            .source_cache
            .staleness(&step.group.source, produced, &hash)
            .is_stale()
        {
            return Ok(false);
        }

        if msvc {
            // The /Yc step compiles a synthesized source including the
            // header.
            let stub = step.group.object.with_extension("cpp");
            let header = step
                .group
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            write_string(&stub, &pch_stub_source(&header))?;
        }

        let mut command = self.pool_command(
            ctx,
            &step.command,
            &step.group.source,
            msvc.then_some(step.group.dependency.as_path()),
        );
        // A signal mid-generation must not leave a half-written PCH.
        command.cleanup_on_failure = Some(step.command.output.clone());

        let job = Job {
            name: "pch".into(),
            list: vec![command],
        };
        let result = self.run_job(session, &job, settings);
        self.finalize_compile(session, &step.group, &hash, result.is_ok());
        result.map_err(|e| self.job_error(e, false))?;
        Ok(true)
    }

    /// Link or archive when needed. `work_done` forces the link.
    fn run_link(
        &self,
        ctx: &StrategyContext,
        session: &mut BuildSession,
        plan: &TargetBuildPlan,
        work_done: bool,
        settings: &mut PoolSettings,
    ) -> Result<()> {
        let link_hash = command_hash(&plan.link.argv);
        let needed = work_done
            || session
                .source_cache
                .staleness(&plan.outputs.artifact, &plan.outputs.artifact, &link_hash)
                .is_stale();
        if !needed {
            tracing::info!("{}: up to date", plan.target);
            return Ok(());
        }

        let mut link_settings = settings.clone();
        link_settings.color = console::Style::new().magenta();
        link_settings.msvc_filter = false;

        let command = self.pool_command(ctx, &plan.link, &plan.outputs.artifact, None);
        let job = Job {
            name: "link".into(),
            list: vec![command],
        };

        let result = self.run_job(session, &job, &mut link_settings);
        settings.start_index = link_settings.start_index;

        match result {
            Ok(()) => {
                session.source_cache.record(
                    &plan.outputs.artifact,
                    &link_hash,
                    plan.outputs.object_files(),
                    true,
                );
                Ok(())
            }
            Err(error) => {
                session
                    .source_cache
                    .record(&plan.outputs.artifact, &link_hash, Vec::new(), false);
                Err(self.job_error(error, true))
            }
        }
    }

    /// Record compile-commands entries for every compiled C-family TU.
    fn add_compile_commands(
        &self,
        ctx: &StrategyContext,
        session: &mut BuildSession,
        plan: &TargetBuildPlan,
    ) {
        if !ctx.generate_compile_commands {
            return;
        }
        for step in &plan.compiles {
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

    fn build_plain(
        &self,
        ctx: &StrategyContext,
        session: &mut BuildSession,
        planned: &PlannedTarget,
    ) -> Result<()> {
        let plan = &planned.plan;

        // Hashing the argv of every TU is pure work; fan it out.
        let hashes: Vec<String> = plan
            .compiles
            .par_iter()
            .map(|step| command_hash(&step.command.argv))
            .collect();

        let mut compile_work: Vec<(&CompileStep, String)> = Vec::new();
        for (step, hash) in plan.compiles.iter().zip(hashes) {
            if session
                .source_cache
                .staleness(&step.group.source, &step.group.object, &hash)
                .is_stale()
            {
                compile_work.push((step, hash));
            }
        }

        self.add_compile_commands(ctx, session, plan);

        let msvc = !ctx.toolchain.family.is_gnu_style();
        let mut settings = self.pool_settings(ctx, msvc);
        settings.total = plan.pch.is_some() as u32
            + compile_work.len() as u32
            + plan.assembly.len() as u32
            + 1; // link

        let pch_built = self.run_pch(ctx, session, plan, &mut settings)?;
        self.run_compile_steps(ctx, session, &compile_work, &plan.assembly, &mut settings)?;

        let work_done = pch_built || !compile_work.is_empty();
        self.run_link(ctx, session, plan, work_done, &mut settings)
    }

    /// Modules pipeline: scan -> plan -> header units -> batches -> plain
    /// TUs -> link.
    fn build_modules(
        &self,
        ctx: &StrategyContext,
        session: &mut BuildSession,
        planned: &PlannedTarget,
    ) -> Result<()> {
        let plan = &planned.plan;
        let target = &planned.target;
        let msvc = !ctx.toolchain.family.is_gnu_style();
        let compile_ctx = CompileContext {
            workspace: ctx.workspace,
            target,
            configuration: ctx.configuration,
            toolchain: ctx.toolchain,
            outputs: &plan.outputs,
        };
        let builder = command_builder(compile_ctx);

        let module_groups: Vec<&SourceFileGroup> = plan
            .outputs
            .groups
            .iter()
            .filter(|g| g.source_type == SourceType::CxxModule)
            .collect();

        // Scan every module TU; scans are preprocessor-only and cheap next
        // to compilation.
        let mut settings = self.pool_settings(ctx, false);
        settings.color = console::Style::new().cyan();
        let scan_commands: Vec<CommandLine> = module_groups
            .iter()
            .map(|group| builder.module_scan(group))
            .collect();
        let scan_job = Job {
            name: "scan".into(),
            list: scan_commands
                .iter()
                .zip(&module_groups)
                .map(|(cmd, group)| self.pool_command(ctx, cmd, &group.source, None))
                .collect(),
        };
        self.run_job(session, &scan_job, &mut settings)
            .map_err(|e| self.job_error(e, false))?;

        let mut scans: Vec<ModuleScan> = Vec::with_capacity(module_groups.len());
        for (command, group) in scan_commands.iter().zip(&module_groups) {
            let text = read_to_string(&command.output)?;
            scans.push(parse_scan_output(&group.source, &text)?);
        }

        let module_plan = ModulePlan::new(
            scans,
            &plan.outputs.bmi_dir,
            bmi_extension(ctx.toolchain.family),
            &ctx.workspace.root,
        )?;

        // Header-unit BMIs precede every importer.
        let mut settings = self.pool_settings(ctx, msvc);
        let header_job = Job {
            name: "header units".into(),
            list: module_plan
                .header_units
                .iter()
                .filter(|unit| {
                    !unit.bmi.exists()
                        || mtime_seconds(&unit.header) > mtime_seconds(&unit.bmi)
                })
                .map(|unit| {
                    let command = builder.header_unit_compile(&unit.header, &unit.bmi);
                    let mut pool_command = self.pool_command(ctx, &command, &unit.header, None);
                    pool_command.cleanup_on_failure = Some(unit.bmi.clone());
                    pool_command
                })
                .collect(),
        };
        let header_units_built = !header_job.list.is_empty();
        self.run_job(session, &header_job, &mut settings)
            .map_err(|e| self.job_error(e, false))?;

        // Synthesize per-TU commands with resolved BMI references, then
        // compute staleness and its transitive closure over the DAG.
        let mut commands: Vec<(CommandLine, String)> = Vec::with_capacity(module_groups.len());
        for (i, group) in module_groups.iter().enumerate() {
            let refs = module_plan.references_for(i)?;
            let mut adjusted = (*group).clone();
            if let Some(bmi) = module_plan.bmi_for_tu(i) {
                adjusted.module_output = Some(bmi.clone());
            }
            let command = builder.module_compile(&adjusted, &refs);
            let hash = command_hash(&command.argv);
            commands.push((command, hash));
        }

        let stale: Vec<usize> = module_groups
            .iter()
            .enumerate()
            .filter(|(i, group)| {
                session
                    .source_cache
                    .staleness(&group.source, &group.object, &commands[*i].1)
                    .is_stale()
            })
            .map(|(i, _)| i)
            .collect();
        let need_build = module_plan.invalidated_by(&stale);

        if ctx.generate_compile_commands {
            for (i, group) in module_groups.iter().enumerate() {
                session.compile_commands.add(
                    &ctx.workspace.root,
                    &group.source,
                    commands[i].0.argv.clone(),
                );
            }
        }

        // Issue batches in topological order; inside a batch everything
        // runs in parallel.
        let mut modules_built = false;
        for batch in &module_plan.batches {
            let indices: Vec<usize> = batch
                .iter()
                .copied()
                .filter(|i| need_build.contains(i))
                .collect();
            if indices.is_empty() {
                continue;
            }
            modules_built = true;

            let job = Job {
                name: "modules".into(),
                list: indices
                    .iter()
                    .map(|&i| {
                        let group = module_groups[i];
                        let mut command = self.pool_command(
                            ctx,
                            &commands[i].0,
                            &group.source,
                            msvc.then_some(group.dependency.as_path()),
                        );
                        command.cleanup_on_failure = module_plan.bmi_for_tu(i).cloned();
                        command
                    })
                    .collect(),
            };

            let result = self.run_job(session, &job, &mut settings);
            let failed: BTreeSet<PathBuf> = match &result {
                Err(PoolError::BuildFailure { failures }) => failures.iter().cloned().collect(),
                _ => BTreeSet::new(),
            };
            for &i in &indices {
                let group = module_groups[i];
                let succeeded =
                    !failed.contains(&group.source) && (result.is_ok() || group.object.exists());
                self.finalize_compile(session, group, &commands[i].1, succeeded);
            }
            result.map_err(|e| self.job_error(e, false))?;
        }

        // Plain TUs of a modules target (C sources, resources) compile
        // after the module batches.
        let mut compile_work: Vec<(&CompileStep, String)> = Vec::new();
        for step in &plan.compiles {
            let hash = command_hash(&step.command.argv);
            if session
                .source_cache
                .staleness(&step.group.source, &step.group.object, &hash)
                .is_stale()
            {
                compile_work.push((step, hash));
            }
        }
        self.add_compile_commands(ctx, session, plan);
        self.run_compile_steps(ctx, session, &compile_work, &plan.assembly, &mut settings)?;

        let work_done = header_units_built || modules_built || !compile_work.is_empty();
        self.run_link(ctx, session, plan, work_done, &mut settings)
    }
}

fn bmi_extension(family: ToolchainFamily) -> &'static str {
    match family {
        ToolchainFamily::Msvc => "ifc",
        ToolchainFamily::Gcc | ToolchainFamily::MingwGcc => "gcm",
        _ => "pcm",
    }
}

impl BuildStrategy for NativeStrategy {
    fn initialize(&mut self, ctx: &StrategyContext) -> Result<()> {
        ensure_dir(&ctx.workspace.build_root())
    }

    fn add_target(&mut self, planned: PlannedTarget) -> Result<()> {
        Self::ensure_output_dirs(&planned.plan)?;
        self.targets.push(planned);
        Ok(())
    }

    fn pre_build(&mut self, _ctx: &StrategyContext) -> Result<()> {
        Ok(())
    }

    fn build_target(
        &mut self,
        ctx: &StrategyContext,
        name: &str,
        session: &mut BuildSession,
    ) -> Result<()> {
        let planned = self
            .targets
            .iter()
            .find(|p| p.plan.target == name)
            .ok_or_else(|| anyhow!("target `{}` was never planned", name))?;

        if planned.target.uses_cpp_modules() {
            self.build_modules(ctx, session, planned)
        } else {
            self.build_plain(ctx, session, planned)
        }
    }

    fn post_build(&mut self, _ctx: &StrategyContext, _session: &mut BuildSession) -> Result<()> {
        Ok(())
    }
}
