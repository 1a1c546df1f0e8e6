//! Compile command synthesis.
//!
//! Each compiler family has its own [`CommandBuilder`]; all builders answer
//! the same set of abstract intents (include dirs, optimization, warnings,
//! language standard, ...) with the family's native flags, so that one
//! abstract target description produces semantically equivalent commands on
//! every toolchain.

use std::path::{Path, PathBuf};

use crate::core::configuration::BuildConfiguration;
use crate::core::target::{SourceTarget, WarningsPreset};
use crate::core::workspace::Workspace;
use crate::plan::outputs::{SourceFileGroup, SourceOutputs};
use crate::toolchain::{ResolvedToolchain, ToolchainFamily};

pub mod depfile;
mod gnu;
mod msvc;

pub use gnu::GnuCommandBuilder;
pub use msvc::{pch_stub_source, MsvcCommandBuilder};

/// Everything command synthesis reads; owned by the strategy for the
/// duration of one target build.
#[derive(Clone, Copy)]
pub struct CompileContext<'a> {
    pub workspace: &'a Workspace,
    pub target: &'a SourceTarget,
    pub configuration: &'a BuildConfiguration,
    pub toolchain: &'a ResolvedToolchain,
    pub outputs: &'a SourceOutputs,
}

/// A synthesized command: the argv (program first) and the file it
/// produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub argv: Vec<String>,
    pub output: PathBuf,
}

impl CommandLine {
    pub fn new(argv: Vec<String>, output: impl Into<PathBuf>) -> Self {
        CommandLine {
            argv,
            output: output.into(),
        }
    }
}

/// BMI references an importing TU compiles against.
#[derive(Debug, Clone, Default)]
pub struct ModuleReferences {
    /// `(module name, BMI path)` for each imported named module.
    pub modules: Vec<(String, PathBuf)>,
    /// BMI paths of imported header units.
    pub header_units: Vec<PathBuf>,
}

/// Family-specific command synthesis.
pub trait CommandBuilder: Send + Sync {
    /// Compile one translation unit to an object file.
    fn compile(&self, group: &SourceFileGroup) -> CommandLine;

    /// Generate the precompiled header.
    fn precompiled_header(&self, group: &SourceFileGroup) -> CommandLine;

    /// Compile a Windows resource script.
    fn windows_resource(&self, group: &SourceFileGroup) -> CommandLine;

    /// Dump annotated assembly for one TU, when the target asks for it.
    fn assembly_dump(&self, group: &SourceFileGroup) -> Option<CommandLine>;

    /// Scan one TU for module provides/imports (structured output).
    fn module_scan(&self, group: &SourceFileGroup) -> CommandLine;

    /// Compile a module TU, with the BMIs of everything it imports.
    fn module_compile(&self, group: &SourceFileGroup, refs: &ModuleReferences) -> CommandLine;

    /// Compile a header unit to its BMI.
    fn header_unit_compile(&self, header: &Path, bmi: &Path) -> CommandLine;

    /// Create a static archive from objects.
    fn archive(&self, objects: &[PathBuf], output: &Path) -> CommandLine;

    /// Link objects into the target's executable or shared library.
    fn link(&self, objects: &[PathBuf], output: &Path) -> CommandLine;
}

/// Pick the command builder for the resolved toolchain's family.
pub fn command_builder<'a>(ctx: CompileContext<'a>) -> Box<dyn CommandBuilder + 'a> {
    match ctx.toolchain.family {
        ToolchainFamily::Msvc | ToolchainFamily::IntelClassic => {
            Box::new(MsvcCommandBuilder::new(ctx))
        }
        _ => Box::new(GnuCommandBuilder::new(ctx)),
    }
}

/// The temporary dependency-file path a compile writes to.
///
/// The compiler emits into `<dep>.Td`; on success the strategy renames it
/// to `.d` so an interrupted compile never leaves a truncated dependency
/// file that looks valid.
pub fn temp_dep_path(dependency: &Path) -> PathBuf {
    dependency.with_extension("Td")
}

/// GNU-superset warning flags for an abstract preset.
pub fn gnu_warning_flags(preset: WarningsPreset) -> Vec<&'static str> {
    let mut flags: Vec<&'static str> = Vec::new();
    if preset >= WarningsPreset::Minimal {
        flags.push("-Wall");
    }
    if preset >= WarningsPreset::Extra {
        flags.push("-Wextra");
    }
    if preset >= WarningsPreset::Pedantic {
        flags.push("-Wpedantic");
    }
    if preset >= WarningsPreset::Strict {
        flags.extend([
            "-Wunused",
            "-Wcast-align",
            "-Wdouble-promotion",
            "-Wformat=2",
            "-Wmissing-declarations",
            "-Wmissing-include-dirs",
            "-Wnon-virtual-dtor",
            "-Wredundant-decls",
            "-Wodr",
        ]);
    }
    if preset >= WarningsPreset::StrictPedantic {
        flags.extend(["-Wunreachable-code", "-Wshadow"]);
    }
    if preset >= WarningsPreset::VeryStrict {
        flags.extend([
            "-Wnoexcept",
            "-Wundef",
            "-Wconversion",
            "-Wcast-qual",
            "-Wfloat-equal",
            "-Winline",
            "-Wold-style-cast",
            "-Woverloaded-virtual",
            "-Wsign-conversion",
            "-Wsign-promo",
        ]);
    }
    flags
}

/// MSVC warning level for an abstract preset.
pub fn msvc_warning_flag(preset: WarningsPreset) -> &'static str {
    match preset {
        WarningsPreset::None => "/W0",
        WarningsPreset::Minimal => "/W1",
        WarningsPreset::Extra => "/W2",
        WarningsPreset::Pedantic | WarningsPreset::Strict => "/W3",
        WarningsPreset::StrictPedantic => "/W4",
        WarningsPreset::VeryStrict => "/Wall",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for command-synthesis tests.

    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use crate::core::configuration::BuildConfiguration;
    use crate::core::target::SourceTarget;
    use crate::core::workspace::{Arch, Platform, Workspace};
    use crate::plan::outputs::{BuildPathStyle, OutputsBuilder, SourceOutputs};
    use crate::toolchain::{CompanionTools, ResolvedToolchain, ToolchainFamily, Version};
    use tempfile::TempDir;

    pub fn toolchain(family: ToolchainFamily) -> ResolvedToolchain {
        let (cpp, cc, linker, archiver) = match family {
            ToolchainFamily::Msvc => ("cl", "cl", "link", "lib"),
            _ => ("g++", "gcc", "g++", "ar"),
        };
        ResolvedToolchain {
            name: family.as_str().into(),
            family,
            version: Version::new(12, 0, 0),
            cpp: PathBuf::from(cpp),
            cc: PathBuf::from(cc),
            linker: PathBuf::from(linker),
            archiver: PathBuf::from(archiver),
            resource_compiler: Some(PathBuf::from(if family == ToolchainFamily::Msvc {
                "rc"
            } else {
                "windres"
            })),
            rc_is_llvm: false,
            tools: CompanionTools::default(),
            target_triple: "x86_64-unknown-linux-gnu".into(),
            env_delta: BTreeMap::new(),
        }
    }

    pub fn workspace(root: &std::path::Path) -> Workspace {
        Workspace {
            name: "test".into(),
            version: "1.0.0".into(),
            root: root.to_path_buf(),
            platform: Platform::host(),
            host_arch: Arch::host(),
            target_arch: Arch::host(),
            search_paths: Vec::new(),
            configurations: BuildConfiguration::default_set(),
            targets: Vec::new(),
            bundles: Vec::new(),
        }
    }

    pub fn configuration(name: &str) -> BuildConfiguration {
        BuildConfiguration::default_set()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    pub fn hello_target(tmp: &TempDir) -> SourceTarget {
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("main.cpp"), "int main() {}").unwrap();

        let mut target = SourceTarget::new("hello");
        target.files = vec!["src/**/*.cpp".into()];
        target.language_standard = Some("c++17".into());
        target
    }

    pub fn outputs_for(
        workspace: &Workspace,
        toolchain: &ResolvedToolchain,
        configuration: &BuildConfiguration,
        target: &SourceTarget,
    ) -> SourceOutputs {
        OutputsBuilder::new(workspace, toolchain, configuration, BuildPathStyle::Configuration)
            .assemble(target)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gnu_warning_presets_accumulate() {
        assert!(gnu_warning_flags(WarningsPreset::None).is_empty());
        assert_eq!(gnu_warning_flags(WarningsPreset::Minimal), ["-Wall"]);
        assert_eq!(
            gnu_warning_flags(WarningsPreset::Extra),
            ["-Wall", "-Wextra"]
        );

        let strict = gnu_warning_flags(WarningsPreset::Strict);
        assert!(strict.contains(&"-Wnon-virtual-dtor"));
        assert!(!strict.contains(&"-Wshadow"));

        let very_strict = gnu_warning_flags(WarningsPreset::VeryStrict);
        assert!(very_strict.contains(&"-Wshadow"));
        assert!(very_strict.contains(&"-Wsign-promo"));
    }

    #[test]
    fn test_msvc_warning_levels() {
        assert_eq!(msvc_warning_flag(WarningsPreset::None), "/W0");
        assert_eq!(msvc_warning_flag(WarningsPreset::Pedantic), "/W3");
        assert_eq!(msvc_warning_flag(WarningsPreset::Strict), "/W3");
        assert_eq!(msvc_warning_flag(WarningsPreset::StrictPedantic), "/W4");
        assert_eq!(msvc_warning_flag(WarningsPreset::VeryStrict), "/Wall");
    }

    #[test]
    fn test_temp_dep_path() {
        assert_eq!(
            temp_dep_path(Path::new("dep/hello/src/main.cpp.d")),
            Path::new("dep/hello/src/main.cpp.Td")
        );
    }
}
