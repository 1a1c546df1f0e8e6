//! Per-target build planning.
//!
//! A [`TargetBuildPlan`] is the fully synthesized set of command lines for
//! one source target: PCH first, then per-TU compiles (and resource and
//! assembly-dump commands), then the archive or link. Strategies consume
//! the plan either by dispatching it into the command pool (native) or by
//! emitting it into a build file (make, ninja).

use anyhow::Result;

use crate::compile::{command_builder, CommandLine, CompileContext};
use crate::core::configuration::BuildConfiguration;
use crate::core::target::{SourceTarget, TargetKind};
use crate::core::workspace::Workspace;
use crate::toolchain::ResolvedToolchain;

pub mod compile_commands;
pub mod outputs;

pub use compile_commands::CompileCommandsGenerator;
pub use outputs::{BuildPathStyle, OutputsBuilder, SourceFileGroup, SourceOutputs, SourceType};

/// One TU's compile step: the file group and its synthesized command.
#[derive(Debug, Clone)]
pub struct CompileStep {
    pub group: SourceFileGroup,
    pub command: CommandLine,
}

/// The complete non-module command set for one target.
#[derive(Debug, Clone)]
pub struct TargetBuildPlan {
    pub target: String,
    pub kind: TargetKind,
    pub outputs: SourceOutputs,

    /// PCH generation, ordered before every compile step.
    pub pch: Option<CompileStep>,

    /// Per-TU compiles, including Windows resources.
    pub compiles: Vec<CompileStep>,

    /// Assembly dumps; same inputs as `compiles`, never block the link.
    pub assembly: Vec<CommandLine>,

    /// Archive or link, ordered after every compile step.
    pub link: CommandLine,
}

impl TargetBuildPlan {
    /// Synthesize the plan for a target.
    ///
    /// Module-enabled targets are planned by the module engine instead;
    /// their TU commands depend on scan results that only exist at build
    /// time.
    pub fn new(
        workspace: &Workspace,
        target: &SourceTarget,
        configuration: &BuildConfiguration,
        toolchain: &ResolvedToolchain,
        outputs: SourceOutputs,
    ) -> Result<TargetBuildPlan> {
        let ctx = CompileContext {
            workspace,
            target,
            configuration,
            toolchain,
            outputs: &outputs,
        };
        let builder = command_builder(ctx);

        let pch = outputs.pch.as_ref().map(|group| CompileStep {
            group: group.clone(),
            command: builder.precompiled_header(group),
        });

        let mut compiles = Vec::new();
        let mut assembly = Vec::new();
        for group in &outputs.groups {
            if !group.source_type.is_compiled() || group.source_type.is_module() {
                // Module TUs are planned by the module engine at build
                // time, once scan results exist.
                continue;
            }
            let command = match group.source_type {
                SourceType::WindowsResource => builder.windows_resource(group),
                _ => builder.compile(group),
            };
            compiles.push(CompileStep {
                group: group.clone(),
                command,
            });

            if let Some(dump) = builder.assembly_dump(group) {
                assembly.push(dump);
            }
        }

        let objects = {
            let mut objects = outputs.object_files();
            if let Some(pch_step) = &pch {
                // The MSVC /Yc step produces a linkable object alongside
                // the .pch.
                if pch_step.group.object.extension().and_then(|e| e.to_str()) == Some("obj") {
                    objects.push(pch_step.group.object.clone());
                }
            }
            objects
        };

        let link = if target.kind() == TargetKind::StaticLibrary
            || target.kind() == TargetKind::ObjectLibrary
        {
            builder.archive(&objects, &outputs.artifact)
        } else {
            builder.link(&objects, &outputs.artifact)
        };
        drop(builder);

        Ok(TargetBuildPlan {
            target: target.name.clone(),
            kind: target.kind(),
            outputs,
            pch,
            compiles,
            assembly,
            link,
        })
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.len() + self.pch.is_some() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::testing;
    use crate::plan::outputs::OutputsBuilder;
    use crate::toolchain::ToolchainFamily;
    use tempfile::TempDir;

    fn plan_for(
        tmp: &TempDir,
        family: ToolchainFamily,
        prepare: impl FnOnce(&mut SourceTarget),
    ) -> TargetBuildPlan {
        let ws = testing::workspace(tmp.path());
        let tc = testing::toolchain(family);
        let config = testing::configuration("Debug");
        let mut target = testing::hello_target(tmp);
        prepare(&mut target);

        let outputs =
            OutputsBuilder::new(&ws, &tc, &config, BuildPathStyle::Configuration)
                .assemble(&target)
                .unwrap();
        TargetBuildPlan::new(&ws, &target, &config, &tc, outputs).unwrap()
    }

    #[test]
    fn test_executable_plan_shape() {
        let tmp = TempDir::new().unwrap();
        let plan = plan_for(&tmp, ToolchainFamily::Gcc, |_| {});

        assert!(plan.pch.is_none());
        assert_eq!(plan.compiles.len(), 1);
        assert!(plan.assembly.is_empty());
        assert_eq!(plan.link.output, plan.outputs.artifact);
        assert_eq!(plan.compile_count(), 1);
    }

    #[test]
    fn test_static_library_plans_archive() {
        let tmp = TempDir::new().unwrap();
        let plan = plan_for(&tmp, ToolchainFamily::Gcc, |t| {
            t.kind = Some(TargetKind::StaticLibrary);
        });

        assert_eq!(plan.link.argv[0], "ar");
        assert!(plan
            .outputs
            .artifact
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("lib"));
    }

    #[test]
    fn test_pch_is_planned_first() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("src/pch.hpp"), "#pragma once").ok();
        let plan = plan_for(&tmp, ToolchainFamily::Gcc, |t| {
            t.pch = Some("src/pch.hpp".into());
        });

        assert!(plan.pch.is_some());
        assert_eq!(plan.compile_count(), 2);
    }

    #[test]
    fn test_assembly_dump_steps() {
        let tmp = TempDir::new().unwrap();
        let plan = plan_for(&tmp, ToolchainFamily::Gcc, |t| {
            t.dump_assembly = true;
        });

        assert_eq!(plan.assembly.len(), 1);
        assert!(plan.assembly[0]
            .output
            .to_string_lossy()
            .ends_with(".s"));
    }
}
