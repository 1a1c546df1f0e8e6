//! Command synthesis for GNU-style drivers.
//!
//! Covers GCC, Clang, Apple Clang, both MinGW flavors, Intel LLVM and
//! Emscripten. The families agree on the argument superset; the handful of
//! places they differ (PCH consumption, module outputs, strip behavior)
//! branch on the family tag.

use std::path::{Path, PathBuf};

use crate::core::configuration::OptimizationLevel;
use crate::core::target::{Language, TargetKind, ThreadModel, WindowsSubsystem};
use crate::core::workspace::Platform;
use crate::plan::outputs::{SourceFileGroup, SourceType};
use crate::toolchain::ToolchainFamily;

use super::{
    gnu_warning_flags, temp_dep_path, CommandBuilder, CommandLine, CompileContext,
    ModuleReferences,
};

/// Builder for GNU-style compiler drivers.
pub struct GnuCommandBuilder<'a> {
    ctx: CompileContext<'a>,
}

impl<'a> GnuCommandBuilder<'a> {
    pub fn new(ctx: CompileContext<'a>) -> Self {
        GnuCommandBuilder { ctx }
    }

    fn family(&self) -> ToolchainFamily {
        self.ctx.toolchain.family
    }

    fn is_clang_lineage(&self) -> bool {
        matches!(
            self.family(),
            ToolchainFamily::Clang
                | ToolchainFamily::AppleClang
                | ToolchainFamily::MingwClang
                | ToolchainFamily::IntelLlvm
                | ToolchainFamily::Emscripten
        )
    }

    fn driver(&self) -> String {
        let cxx = self.ctx.target.language().is_cxx();
        self.ctx
            .toolchain
            .compiler_for(cxx)
            .display()
            .to_string()
    }

    fn language_flag(&self, source_type: SourceType) -> Option<&'static str> {
        match source_type {
            SourceType::ObjC => Some("objective-c"),
            SourceType::ObjCxx => Some("objective-c++"),
            _ => None,
        }
    }

    fn add_language_standard(&self, argv: &mut Vec<String>) {
        if let Some(std) = &self.ctx.target.language_standard {
            argv.push(format!("-std={}", std));
        }
    }

    fn add_optimization(&self, argv: &mut Vec<String>) {
        let config = self.ctx.configuration;
        argv.push(
            match config.optimization_level {
                OptimizationLevel::None => "-O0",
                OptimizationLevel::L1 => "-O1",
                OptimizationLevel::L2 => "-O2",
                OptimizationLevel::L3 => "-O3",
                OptimizationLevel::Size => "-Os",
                OptimizationLevel::Fast => "-Ofast",
                OptimizationLevel::Debug => "-Og",
            }
            .to_string(),
        );

        if config.debug_symbols {
            argv.push("-g".into());
        }
        if config.enable_profiling {
            argv.push("-pg".into());
        }
        if config.link_time_optimization {
            argv.push("-flto".into());
        }
        if config.interprocedural_optimization && self.family() == ToolchainFamily::IntelLlvm {
            argv.push("-ipo".into());
        }
    }

    fn add_warnings(&self, argv: &mut Vec<String>) {
        for flag in gnu_warning_flags(self.ctx.target.warnings) {
            argv.push(flag.into());
        }
        if self.ctx.target.warnings_as_errors {
            argv.push("-Werror".into());
        }
    }

    fn add_defines_and_includes(&self, argv: &mut Vec<String>) {
        for define in &self.ctx.target.defines {
            argv.push(format!("-D{}", define));
        }
        for dir in &self.ctx.target.include_dirs {
            argv.push(format!("-I{}", dir));
        }
    }

    fn add_code_generation(&self, argv: &mut Vec<String>) {
        let target = self.ctx.target;

        if !target.exceptions {
            argv.push("-fno-exceptions".into());
        }
        if !target.rtti && target.language().is_cxx() {
            argv.push("-fno-rtti".into());
        }
        if target.position_independent || target.kind() == TargetKind::SharedLibrary {
            argv.push("-fPIC".into());
        }
        if matches!(target.thread_model, ThreadModel::Auto | ThreadModel::Posix) {
            argv.push("-pthread".into());
        }

        argv.extend(target.compile_options.iter().cloned());
    }

    fn add_pch_use(&self, argv: &mut Vec<String>) {
        let Some(pch) = &self.ctx.outputs.pch else {
            return;
        };
        let Some(compiled) = &pch.module_output else {
            return;
        };

        if self.is_clang_lineage() {
            argv.push("-include-pch".into());
            argv.push(compiled.display().to_string());
        } else {
            // GCC picks up `<path>.gch` for `-include <path>` even when the
            // bare header does not exist there.
            let header = compiled.with_extension("");
            argv.push("-include".into());
            argv.push(header.display().to_string());
            argv.push("-Winvalid-pch".into());
        }
    }

    fn add_dependency_emission(&self, argv: &mut Vec<String>, group: &SourceFileGroup) {
        argv.push("-MD".into());
        argv.push("-MT".into());
        argv.push(group.object.display().to_string());
        argv.push("-MF".into());
        argv.push(temp_dep_path(&group.dependency).display().to_string());
    }

    fn common_compile_front(&self, group: &SourceFileGroup) -> Vec<String> {
        let mut argv = vec![self.driver()];
        if let Some(lang) = self.language_flag(group.source_type) {
            argv.push("-x".into());
            argv.push(lang.into());
        }
        self.add_language_standard(&mut argv);
        self.add_optimization(&mut argv);
        self.add_warnings(&mut argv);
        self.add_defines_and_includes(&mut argv);
        self.add_code_generation(&mut argv);
        argv
    }

    fn add_link_inputs(&self, argv: &mut Vec<String>, objects: &[PathBuf]) {
        let target = self.ctx.target;
        let workspace = self.ctx.workspace;

        for object in objects {
            argv.push(object.display().to_string());
        }

        // The configuration build dir comes first so sibling targets'
        // archives win over stale system copies.
        argv.push(format!("-L{}", self.ctx.outputs.build_dir.display()));
        for dir in &target.lib_dirs {
            argv.push(format!("-L{}", dir));
        }

        for link in target.static_links.iter().chain(target.links.iter()) {
            argv.push(format!("-l{}", link));
        }

        if workspace.platform == Platform::MacOS {
            for path in &target.macos_framework_paths {
                argv.push(format!("-F{}", path));
            }
            for framework in &target.macos_frameworks {
                argv.push("-framework".into());
                argv.push(framework.clone());
            }
        }

        argv.extend(target.linker_options.iter().cloned());
    }

    fn add_link_flags(&self, argv: &mut Vec<String>) {
        let config = self.ctx.configuration;
        let target = self.ctx.target;
        let platform = self.ctx.workspace.platform;

        if config.debug_symbols {
            argv.push("-g".into());
        }
        if config.enable_profiling {
            argv.push("-pg".into());
        }
        if config.link_time_optimization {
            argv.push("-flto".into());
        }
        if config.strip_symbols && platform != Platform::MacOS {
            argv.push("-s".into());
        }
        if matches!(target.thread_model, ThreadModel::Auto | ThreadModel::Posix) {
            argv.push("-pthread".into());
        }

        if target.static_runtime {
            argv.push("-static-libgcc".into());
            if target.language().is_cxx() {
                argv.push("-static-libstdc++".into());
            }
        }

        if platform == Platform::Windows {
            match target.windows_subsystem {
                WindowsSubsystem::Windows => argv.push("-mwindows".into()),
                WindowsSubsystem::Console => argv.push("-mconsole".into()),
            }
            if let Some(entry) = &target.windows_entry_point {
                argv.push(format!("-Wl,-e,{}", entry));
            }
        }

        if let Some(script) = &target.linker_script {
            argv.push("-T".into());
            argv.push(script.display().to_string());
        }
    }
}

impl CommandBuilder for GnuCommandBuilder<'_> {
    fn compile(&self, group: &SourceFileGroup) -> CommandLine {
        let mut argv = self.common_compile_front(group);
        self.add_pch_use(&mut argv);
        self.add_dependency_emission(&mut argv, group);
        argv.push("-c".into());
        argv.push(group.source.display().to_string());
        argv.push("-o".into());
        argv.push(group.object.display().to_string());
        CommandLine::new(argv, group.object.clone())
    }

    fn precompiled_header(&self, group: &SourceFileGroup) -> CommandLine {
        let output = group
            .module_output
            .clone()
            .unwrap_or_else(|| group.object.clone());

        let mut argv = self.common_compile_front(group);
        self.add_dependency_emission(&mut argv, group);
        argv.push("-x".into());
        argv.push(
            if self.ctx.target.language() == Language::C {
                "c-header"
            } else {
                "c++-header"
            }
            .into(),
        );
        argv.push(group.source.display().to_string());
        argv.push("-o".into());
        argv.push(output.display().to_string());
        CommandLine::new(argv, output)
    }

    fn windows_resource(&self, group: &SourceFileGroup) -> CommandLine {
        let rc = self
            .ctx
            .toolchain
            .resource_compiler
            .as_deref()
            .unwrap_or_else(|| Path::new("windres"));

        let mut argv = vec![rc.display().to_string()];
        if self.ctx.toolchain.rc_is_llvm {
            for define in &self.ctx.target.defines {
                argv.push(format!("-D{}", define));
            }
            argv.push("/FO".into());
            argv.push(group.object.display().to_string());
            argv.push(group.source.display().to_string());
        } else {
            for define in &self.ctx.target.defines {
                argv.push(format!("-D{}", define));
            }
            for dir in &self.ctx.target.include_dirs {
                argv.push(format!("--include-dir={}", dir));
            }
            argv.push("-i".into());
            argv.push(group.source.display().to_string());
            argv.push("-o".into());
            argv.push(group.object.display().to_string());
        }
        CommandLine::new(argv, group.object.clone())
    }

    fn assembly_dump(&self, group: &SourceFileGroup) -> Option<CommandLine> {
        let assembly = group.assembly.clone()?;
        let mut argv = self.common_compile_front(group);
        argv.push("-S".into());
        argv.push(group.source.display().to_string());
        argv.push("-o".into());
        argv.push(assembly.display().to_string());
        Some(CommandLine::new(argv, assembly))
    }

    fn module_scan(&self, group: &SourceFileGroup) -> CommandLine {
        let scan_output = group.dependency.with_extension("ddi");

        let mut argv = vec![self.driver()];
        self.add_language_standard(&mut argv);
        self.add_defines_and_includes(&mut argv);
        argv.push("-x".into());
        argv.push("c++".into());
        argv.push("-E".into());
        argv.push("-fdeps-format=p1689r5".into());
        argv.push(format!("-fdeps-file={}", scan_output.display()));
        argv.push(format!("-fdeps-target={}", group.object.display()));
        argv.push(group.source.display().to_string());
        argv.push("-o".into());
        argv.push(null_device().into());
        CommandLine::new(argv, scan_output)
    }

    fn module_compile(&self, group: &SourceFileGroup, refs: &ModuleReferences) -> CommandLine {
        let mut argv = self.common_compile_front(group);

        if self.is_clang_lineage() {
            if let Some(bmi) = &group.module_output {
                argv.push(format!("-fmodule-output={}", bmi.display()));
            }
            argv.push(format!(
                "-fprebuilt-module-path={}",
                self.ctx.outputs.bmi_dir.display()
            ));
            for (name, bmi) in &refs.modules {
                argv.push(format!("-fmodule-file={}={}", name, bmi.display()));
            }
            for bmi in &refs.header_units {
                argv.push(format!("-fmodule-file={}", bmi.display()));
            }
        } else {
            // GCC keeps its CMIs in gcm.cache below the working directory.
            argv.push("-fmodules-ts".into());
        }

        self.add_dependency_emission(&mut argv, group);
        argv.push("-c".into());
        argv.push(group.source.display().to_string());
        argv.push("-o".into());
        argv.push(group.object.display().to_string());
        CommandLine::new(argv, group.object.clone())
    }

    fn header_unit_compile(&self, header: &Path, bmi: &Path) -> CommandLine {
        let mut argv = vec![self.driver()];
        self.add_language_standard(&mut argv);
        self.add_defines_and_includes(&mut argv);

        if self.is_clang_lineage() {
            argv.push("-xc++-user-header".into());
            argv.push("--precompile".into());
            argv.push(header.display().to_string());
            argv.push("-o".into());
            argv.push(bmi.display().to_string());
        } else {
            argv.push("-fmodules-ts".into());
            argv.push("-fmodule-header".into());
            argv.push(header.display().to_string());
        }
        CommandLine::new(argv, bmi.to_path_buf())
    }

    fn archive(&self, objects: &[PathBuf], output: &Path) -> CommandLine {
        let mut argv = vec![
            self.ctx.toolchain.archiver.display().to_string(),
            "rcs".into(),
            output.display().to_string(),
        ];
        for object in objects {
            argv.push(object.display().to_string());
        }
        CommandLine::new(argv, output.to_path_buf())
    }

    fn link(&self, objects: &[PathBuf], output: &Path) -> CommandLine {
        let linker = self.ctx.toolchain.linker.display().to_string();
        let mut argv = vec![linker];

        if self.ctx.target.kind() == TargetKind::SharedLibrary {
            argv.push("-shared".into());
            argv.push("-fPIC".into());
        }

        argv.push("-o".into());
        argv.push(output.display().to_string());
        self.add_link_inputs(&mut argv, objects);
        self.add_link_flags(&mut argv);

        CommandLine::new(argv, output.to_path_buf())
    }
}

fn null_device() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}
