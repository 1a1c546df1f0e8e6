//! Command synthesis for `cl`-style drivers (MSVC, Intel Classic on
//! Windows).

use std::path::{Path, PathBuf};

use crate::core::configuration::OptimizationLevel;
use crate::core::target::{TargetKind, WindowsSubsystem};
use crate::plan::outputs::SourceFileGroup;

use super::{msvc_warning_flag, CommandBuilder, CommandLine, CompileContext, ModuleReferences};

/// Builder for the MSVC toolchain family.
pub struct MsvcCommandBuilder<'a> {
    ctx: CompileContext<'a>,
}

impl<'a> MsvcCommandBuilder<'a> {
    pub fn new(ctx: CompileContext<'a>) -> Self {
        MsvcCommandBuilder { ctx }
    }

    fn compiler(&self) -> String {
        self.ctx
            .toolchain
            .compiler_for(self.ctx.target.language().is_cxx())
            .display()
            .to_string()
    }

    fn add_language_standard(&self, argv: &mut Vec<String>) {
        if let Some(std) = &self.ctx.target.language_standard {
            // `c++17` -> `/std:c++17`; `c17` -> `/std:c17`.
            argv.push(format!("/std:{}", std));
        }
    }

    fn add_optimization(&self, argv: &mut Vec<String>) {
        let config = self.ctx.configuration;
        argv.push(
            match config.optimization_level {
                OptimizationLevel::None | OptimizationLevel::Debug => "/Od",
                OptimizationLevel::L1 | OptimizationLevel::Size => "/O1",
                OptimizationLevel::L2 | OptimizationLevel::Fast => "/O2",
                OptimizationLevel::L3 => "/Ox",
            }
            .to_string(),
        );

        if config.debug_symbols {
            // Embedded debug info; no .pdb to collide on in parallel builds.
            argv.push("/Z7".into());
        }
        if config.link_time_optimization || config.interprocedural_optimization {
            argv.push("/GL".into());
        }
    }

    fn add_warnings(&self, argv: &mut Vec<String>) {
        argv.push(msvc_warning_flag(self.ctx.target.warnings).to_string());
        if self.ctx.target.warnings_as_errors {
            argv.push("/WX".into());
        }
    }

    fn add_defines_and_includes(&self, argv: &mut Vec<String>) {
        for define in &self.ctx.target.defines {
            argv.push(format!("/D{}", define));
        }
        for dir in &self.ctx.target.include_dirs {
            argv.push(format!("/I{}", dir));
        }
    }

    fn add_code_generation(&self, argv: &mut Vec<String>) {
        let target = self.ctx.target;
        let config = self.ctx.configuration;

        if target.language().is_cxx() {
            if target.exceptions {
                argv.push("/EHsc".into());
            } else {
                argv.push("/EHs-c-".into());
            }
            if !target.rtti {
                argv.push("/GR-".into());
            }
        }

        // Runtime selection: static/dynamic crossed with debug/release.
        let runtime = match (target.static_runtime, config.debug_symbols) {
            (true, true) => "/MTd",
            (true, false) => "/MT",
            (false, true) => "/MDd",
            (false, false) => "/MD",
        };
        argv.push(runtime.into());

        argv.extend(target.compile_options.iter().cloned());
    }

    fn add_pch_use(&self, argv: &mut Vec<String>) {
        let Some(pch) = &self.ctx.outputs.pch else {
            return;
        };
        let Some(compiled) = &pch.module_output else {
            return;
        };
        let header = pch
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        argv.push(format!("/Yu{}", header));
        argv.push(format!("/Fp{}", compiled.display()));
        // The PCH header must be reachable as `#include <name>`.
        if let Some(dir) = pch.source.parent() {
            argv.push(format!("/I{}", dir.display()));
        }
    }

    fn common_compile_front(&self) -> Vec<String> {
        let mut argv = vec![self.compiler(), "/nologo".into()];
        self.add_language_standard(&mut argv);
        self.add_optimization(&mut argv);
        self.add_warnings(&mut argv);
        self.add_defines_and_includes(&mut argv);
        self.add_code_generation(&mut argv);
        argv
    }
}

impl CommandBuilder for MsvcCommandBuilder<'_> {
    fn compile(&self, group: &SourceFileGroup) -> CommandLine {
        let mut argv = self.common_compile_front();
        self.add_pch_use(&mut argv);
        // Dependency output is line-filtered out of the compiler's stdout
        // by the command pool.
        argv.push("/showIncludes".into());
        argv.push("/c".into());
        argv.push(group.source.display().to_string());
        argv.push(format!("/Fo{}", group.object.display()));
        CommandLine::new(argv, group.object.clone())
    }

    fn precompiled_header(&self, group: &SourceFileGroup) -> CommandLine {
        let compiled = group
            .module_output
            .clone()
            .unwrap_or_else(|| group.object.clone());
        let header = group
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Two-step scheme: /Yc over a synthesized `#include "pch.hpp"`
        // source produces the .pch plus a regular object file that is
        // linked like any other.
        let stub = group.object.with_extension("cpp");

        let mut argv = self.common_compile_front();
        argv.push("/showIncludes".into());
        argv.push(format!("/Yc{}", header));
        argv.push(format!("/Fp{}", compiled.display()));
        if let Some(dir) = group.source.parent() {
            argv.push(format!("/I{}", dir.display()));
        }
        argv.push("/c".into());
        argv.push(stub.display().to_string());
        argv.push(format!("/Fo{}", group.object.display()));
        CommandLine::new(argv, compiled)
    }

    fn windows_resource(&self, group: &SourceFileGroup) -> CommandLine {
        let rc = self
            .ctx
            .toolchain
            .resource_compiler
            .as_deref()
            .unwrap_or_else(|| Path::new("rc"));

        let mut argv = vec![rc.display().to_string(), "/nologo".into()];
        for define in &self.ctx.target.defines {
            argv.push(format!("/D{}", define));
        }
        for dir in &self.ctx.target.include_dirs {
            argv.push(format!("/I{}", dir));
        }
        argv.push(format!("/Fo{}", group.object.display()));
        argv.push(group.source.display().to_string());
        CommandLine::new(argv, group.object.clone())
    }

    fn assembly_dump(&self, group: &SourceFileGroup) -> Option<CommandLine> {
        let assembly = group.assembly.clone()?;
        let mut argv = self.common_compile_front();
        argv.push("/c".into());
        argv.push("/FAs".into());
        argv.push(format!("/Fa{}", assembly.display()));
        argv.push(group.source.display().to_string());
        argv.push(format!("/Fo{}", group.object.display()));
        Some(CommandLine::new(argv, assembly))
    }

    fn module_scan(&self, group: &SourceFileGroup) -> CommandLine {
        let scan_output = group.dependency.with_extension("ddi");

        let mut argv = vec![self.compiler(), "/nologo".into()];
        self.add_language_standard(&mut argv);
        self.add_defines_and_includes(&mut argv);
        argv.push("/scanDependencies".into());
        argv.push(scan_output.display().to_string());
        argv.push("/c".into());
        argv.push(group.source.display().to_string());
        CommandLine::new(argv, scan_output)
    }

    fn module_compile(&self, group: &SourceFileGroup, refs: &ModuleReferences) -> CommandLine {
        let mut argv = self.common_compile_front();

        argv.push("/interface".into());
        if let Some(bmi) = &group.module_output {
            argv.push("/ifcOutput".into());
            argv.push(bmi.display().to_string());
        }
        for (name, bmi) in &refs.modules {
            argv.push("/reference".into());
            argv.push(format!("{}={}", name, bmi.display()));
        }
        for bmi in &refs.header_units {
            argv.push("/headerUnit".into());
            argv.push(bmi.display().to_string());
        }

        argv.push("/showIncludes".into());
        argv.push("/c".into());
        argv.push(group.source.display().to_string());
        argv.push(format!("/Fo{}", group.object.display()));
        CommandLine::new(argv, group.object.clone())
    }

    fn header_unit_compile(&self, header: &Path, bmi: &Path) -> CommandLine {
        let mut argv = vec![self.compiler(), "/nologo".into()];
        self.add_language_standard(&mut argv);
        self.add_defines_and_includes(&mut argv);
        argv.push("/exportHeader".into());
        argv.push("/ifcOutput".into());
        argv.push(bmi.display().to_string());
        argv.push("/c".into());
        argv.push(header.display().to_string());
        CommandLine::new(argv, bmi.to_path_buf())
    }

    fn archive(&self, objects: &[PathBuf], output: &Path) -> CommandLine {
        let mut argv = vec![
            self.ctx.toolchain.archiver.display().to_string(),
            "/nologo".into(),
            format!("/OUT:{}", output.display()),
        ];
        for object in objects {
            argv.push(object.display().to_string());
        }
        CommandLine::new(argv, output.to_path_buf())
    }

    fn link(&self, objects: &[PathBuf], output: &Path) -> CommandLine {
        let config = self.ctx.configuration;
        let target = self.ctx.target;

        let mut argv = vec![
            self.ctx.toolchain.linker.display().to_string(),
            "/nologo".into(),
            format!("/OUT:{}", output.display()),
        ];

        if target.kind() == TargetKind::SharedLibrary {
            argv.push("/DLL".into());
        }

        for object in objects {
            argv.push(object.display().to_string());
        }

        argv.push(format!("/LIBPATH:{}", self.ctx.outputs.build_dir.display()));
        for dir in &target.lib_dirs {
            argv.push(format!("/LIBPATH:{}", dir));
        }
        for link in target.static_links.iter().chain(target.links.iter()) {
            argv.push(format!("{}.lib", link));
        }

        if config.debug_symbols {
            argv.push("/DEBUG".into());
        }
        if config.link_time_optimization || config.interprocedural_optimization {
            argv.push("/LTCG".into());
        }

        match target.windows_subsystem {
            WindowsSubsystem::Console => argv.push("/SUBSYSTEM:CONSOLE".into()),
            WindowsSubsystem::Windows => argv.push("/SUBSYSTEM:WINDOWS".into()),
        }
        if let Some(entry) = &target.windows_entry_point {
            argv.push(format!("/ENTRY:{}", entry));
        }
        if let Some(manifest) = &target.windows_application_manifest {
            argv.push(format!("/MANIFESTINPUT:{}", manifest.display()));
            argv.push("/MANIFEST:EMBED".into());
        }
        if let Some(script) = &target.linker_script {
            argv.push(format!("/DEF:{}", script.display()));
        }

        argv.extend(target.linker_options.iter().cloned());

        CommandLine::new(argv, output.to_path_buf())
    }
}

/// The synthesized source a `/Yc` PCH build compiles.
pub fn pch_stub_source(header_name: &str) -> String {
    format!("#include \"{}\"\n", header_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::testing;
    use crate::compile::CompileContext;
    use crate::toolchain::ToolchainFamily;
    use tempfile::TempDir;

    fn contains(argv: &[String], flag: &str) -> bool {
        argv.iter().any(|a| a == flag)
    }

    fn builder_fixture(
        tmp: &TempDir,
        config_name: &str,
        prepare: impl FnOnce(&mut crate::core::SourceTarget),
    ) -> (
        crate::core::Workspace,
        crate::toolchain::ResolvedToolchain,
        crate::core::BuildConfiguration,
        crate::core::SourceTarget,
        crate::plan::outputs::SourceOutputs,
    ) {
        let ws = testing::workspace(tmp.path());
        let tc = testing::toolchain(ToolchainFamily::Msvc);
        let config = testing::configuration(config_name);
        let mut target = testing::hello_target(tmp);
        prepare(&mut target);
        let outputs = testing::outputs_for(&ws, &tc, &config, &target);
        (ws, tc, config, target, outputs)
    }

    #[test]
    fn test_compile_command_shape() {
        let tmp = TempDir::new().unwrap();
        let (ws, tc, config, target, outputs) = builder_fixture(&tmp, "Debug", |_| {});

        let builder = MsvcCommandBuilder::new(CompileContext {
            workspace: &ws,
            target: &target,
            configuration: &config,
            toolchain: &tc,
            outputs: &outputs,
        });

        let cmd = builder.compile(&outputs.groups[0]);
        assert_eq!(cmd.argv[0], "cl");
        assert!(contains(&cmd.argv, "/nologo"));
        assert!(contains(&cmd.argv, "/std:c++17"));
        assert!(contains(&cmd.argv, "/Od"));
        assert!(contains(&cmd.argv, "/Z7"));
        assert!(contains(&cmd.argv, "/EHsc"));
        assert!(contains(&cmd.argv, "/MDd"));
        assert!(contains(&cmd.argv, "/showIncludes"));
        assert!(contains(&cmd.argv, "/c"));
        assert!(cmd.argv.iter().any(|a| a.starts_with("/Fo")));
        assert!(cmd.argv.iter().any(|a| a.ends_with(".obj")));
    }

    #[test]
    fn test_static_runtime_release() {
        let tmp = TempDir::new().unwrap();
        let (ws, tc, config, target, outputs) = builder_fixture(&tmp, "Release", |t| {
            t.static_runtime = true;
        });

        let builder = MsvcCommandBuilder::new(CompileContext {
            workspace: &ws,
            target: &target,
            configuration: &config,
            toolchain: &tc,
            outputs: &outputs,
        });

        let cmd = builder.compile(&outputs.groups[0]);
        assert!(contains(&cmd.argv, "/MT"));
        assert!(contains(&cmd.argv, "/O2"));
    }

    #[test]
    fn test_pch_two_step() {
        let tmp = TempDir::new().unwrap();
        let (ws, tc, config, target, _) = builder_fixture(&tmp, "Debug", |t| {
            t.pch = Some("src/pch.hpp".into());
        });
        std::fs::write(tmp.path().join("src/pch.hpp"), "#pragma once").unwrap();
        let outputs = testing::outputs_for(&ws, &tc, &config, &target);

        let builder = MsvcCommandBuilder::new(CompileContext {
            workspace: &ws,
            target: &target,
            configuration: &config,
            toolchain: &tc,
            outputs: &outputs,
        });

        let pch_group = outputs.pch.as_ref().unwrap();
        let generate = builder.precompiled_header(pch_group);
        assert!(generate.argv.iter().any(|a| a.starts_with("/Ycpch.hpp")));
        assert!(generate.argv.iter().any(|a| a.starts_with("/Fp")));

        let compile = builder.compile(&outputs.groups[0]);
        assert!(compile.argv.iter().any(|a| a.starts_with("/Yupch.hpp")));
        assert!(compile.argv.iter().any(|a| a.starts_with("/Fp")));
    }

    #[test]
    fn test_link_subsystem_and_libs() {
        let tmp = TempDir::new().unwrap();
        let (ws, tc, config, target, outputs) = builder_fixture(&tmp, "Debug", |t| {
            t.links = vec!["user32".into()];
            t.windows_subsystem = WindowsSubsystem::Windows;
        });

        let builder = MsvcCommandBuilder::new(CompileContext {
            workspace: &ws,
            target: &target,
            configuration: &config,
            toolchain: &tc,
            outputs: &outputs,
        });

        let link = builder.link(&outputs.object_files(), &outputs.artifact);
        assert_eq!(link.argv[0], "link");
        assert!(contains(&link.argv, "user32.lib"));
        assert!(contains(&link.argv, "/SUBSYSTEM:WINDOWS"));
        assert!(contains(&link.argv, "/DEBUG"));
    }

    #[test]
    fn test_archive_command() {
        let tmp = TempDir::new().unwrap();
        let (ws, tc, config, target, outputs) = builder_fixture(&tmp, "Debug", |t| {
            t.kind = Some(crate::core::TargetKind::StaticLibrary);
        });

        let builder = MsvcCommandBuilder::new(CompileContext {
            workspace: &ws,
            target: &target,
            configuration: &config,
            toolchain: &tc,
            outputs: &outputs,
        });

        let archive = builder.archive(&outputs.object_files(), &outputs.artifact);
        assert_eq!(archive.argv[0], "lib");
        assert!(archive.argv.iter().any(|a| a.starts_with("/OUT:")));
    }

    #[test]
    fn test_pch_stub_source() {
        assert_eq!(pch_stub_source("pch.hpp"), "#include \"pch.hpp\"\n");
    }
}
