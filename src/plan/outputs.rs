//! Derived build paths and per-file output naming.
//!
//! Every input file of a source target maps to a [`SourceFileGroup`]:
//! its object, dependency-file, assembly-dump and module-output paths under
//! the configuration's build directory. The scheme guarantees that no two
//! `(target, file)` pairs share an object path.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::core::configuration::BuildConfiguration;
use crate::core::target::{Language, SourceTarget, TargetKind};
use crate::core::workspace::{Platform, Workspace};
use crate::error::BuildError;
use crate::toolchain::{ResolvedToolchain, ToolchainFamily};
use crate::util::fs::{glob_files, relative_path};

/// How the `<configuration>-...` build directory segment is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildPathStyle {
    #[default]
    Configuration,
    ArchConfiguration,
    TargetTriple,
    ToolchainName,
}

impl BuildPathStyle {
    /// The directory segment for a configuration under the build root.
    pub fn segment(
        &self,
        configuration: &str,
        workspace: &Workspace,
        toolchain: &ResolvedToolchain,
    ) -> String {
        match self {
            BuildPathStyle::Configuration => configuration.to_string(),
            BuildPathStyle::ArchConfiguration => {
                format!("{}-{}", configuration, workspace.target_arch.cpu)
            }
            BuildPathStyle::TargetTriple => {
                format!("{}-{}", configuration, workspace.target_arch.triple)
            }
            BuildPathStyle::ToolchainName => {
                format!("{}-{}", configuration, toolchain.name)
            }
        }
    }
}

/// Classification of one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    C,
    Cxx,
    ObjC,
    ObjCxx,
    WindowsResource,
    PrecompiledHeader,
    CxxModule,
    CxxHeaderUnit,
}

impl SourceType {
    pub fn is_compiled(&self) -> bool {
        !matches!(self, SourceType::PrecompiledHeader)
    }

    pub fn is_module(&self) -> bool {
        matches!(self, SourceType::CxxModule | SourceType::CxxHeaderUnit)
    }
}

/// One input file and all paths derived from it.
///
/// Created during plan construction, immutable during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFileGroup {
    pub source: PathBuf,
    pub source_type: SourceType,
    pub object: PathBuf,
    pub dependency: PathBuf,
    /// Only set when the target dumps assembly.
    pub assembly: Option<PathBuf>,
    /// BMI output, for module interfaces and header units.
    pub module_output: Option<PathBuf>,
}

/// All derived paths for one `(target, configuration, toolchain)` build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutputs {
    /// `<buildRoot>/<segment>`
    pub build_dir: PathBuf,
    pub obj_dir: PathBuf,
    pub dep_dir: PathBuf,
    pub asm_dir: PathBuf,
    pub pch_dir: PathBuf,
    pub bmi_dir: PathBuf,

    pub groups: Vec<SourceFileGroup>,

    /// The precompiled-header group, when the target declares one.
    pub pch: Option<SourceFileGroup>,

    /// Final artifact path (`lib<name>.a`, `<name>.exe`, ...).
    pub artifact: PathBuf,
}

impl SourceOutputs {
    /// Object files in group order, header units and PCH excluded.
    pub fn object_files(&self) -> Vec<PathBuf> {
        self.groups
            .iter()
            .filter(|g| g.source_type.is_compiled())
            .map(|g| g.object.clone())
            .collect()
    }
}

/// Derives [`SourceOutputs`] for a target.
pub struct OutputsBuilder<'a> {
    workspace: &'a Workspace,
    toolchain: &'a ResolvedToolchain,
    configuration: &'a BuildConfiguration,
    style: BuildPathStyle,
}

impl<'a> OutputsBuilder<'a> {
    pub fn new(
        workspace: &'a Workspace,
        toolchain: &'a ResolvedToolchain,
        configuration: &'a BuildConfiguration,
        style: BuildPathStyle,
    ) -> Self {
        OutputsBuilder {
            workspace,
            toolchain,
            configuration,
            style,
        }
    }

    /// The configuration build directory, shared by all targets.
    pub fn build_dir(&self) -> PathBuf {
        let segment =
            self.style
                .segment(&self.configuration.name, self.workspace, self.toolchain);
        self.workspace.build_root().join(segment)
    }

    /// Resolve the target's file globs and derive every output path.
    pub fn assemble(&self, target: &SourceTarget) -> Result<SourceOutputs> {
        let build_dir = self.build_dir();
        let obj_dir = build_dir.join("obj").join(&target.name);
        let dep_dir = build_dir.join("dep").join(&target.name);
        let asm_dir = build_dir.join("asm").join(&target.name);
        let pch_dir = build_dir.join("pch").join(&target.name);
        let bmi_dir = build_dir.join("bmi").join(&target.name);

        let sources = glob_files(&self.workspace.root, &target.files)?;
        if sources.is_empty() {
            return Err(anyhow!(BuildError::Parse {
                file: self.workspace.root.join(crate::core::DEFAULT_BUILD_FILE),
                line: 0,
                key: target.name.clone(),
                message: "target has no input files".into(),
            }));
        }

        let mut groups = Vec::with_capacity(sources.len());
        for source in sources {
            let Some(source_type) = self.classify(target, &source) else {
                tracing::debug!("ignoring {} (unrecognized extension)", source.display());
                continue;
            };
            groups.push(self.group_for(target, &obj_dir, &dep_dir, &asm_dir, &bmi_dir, source, source_type));
        }

        let pch = target.pch.as_ref().map(|pch| {
            let source = self.workspace.root.join(pch);
            let base = pch
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "pch".into());
            let extension = match self.toolchain.family {
                ToolchainFamily::Gcc | ToolchainFamily::MingwGcc => "gch",
                _ => "pch",
            };
            SourceFileGroup {
                object: obj_dir.join(format!("{}.{}", base, self.object_extension())),
                dependency: dep_dir.join(format!("{}.d", base)),
                assembly: None,
                module_output: Some(pch_dir.join(format!("{}.{}", base, extension))),
                source,
                source_type: SourceType::PrecompiledHeader,
            }
        });

        let artifact = build_dir.join(self.artifact_file_name(target));

        Ok(SourceOutputs {
            build_dir,
            obj_dir,
            dep_dir,
            asm_dir,
            pch_dir,
            bmi_dir,
            groups,
            pch,
            artifact,
        })
    }

    fn group_for(
        &self,
        target: &SourceTarget,
        obj_dir: &Path,
        dep_dir: &Path,
        asm_dir: &Path,
        bmi_dir: &Path,
        source: PathBuf,
        source_type: SourceType,
    ) -> SourceFileGroup {
        // Keep the source's directory structure under obj/ so same-named
        // files in different directories cannot collide.
        let rel = relative_path(&self.workspace.root, &source);
        let stem = rel.to_string_lossy().replace('\\', "/");

        let object = obj_dir.join(format!("{}.{}", stem, self.object_extension()));
        let dependency = dep_dir.join(format!("{}.d", stem));
        let assembly = target
            .dump_assembly
            .then(|| asm_dir.join(format!("{}.{}", stem, self.assembly_extension())));

        let module_output = source_type.is_module().then(|| {
            let file_stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "module".into());
            bmi_dir.join(format!("{}.{}", file_stem, self.bmi_extension()))
        });

        SourceFileGroup {
            source,
            source_type,
            object,
            dependency,
            assembly,
            module_output,
        }
    }

    fn classify(&self, target: &SourceTarget, source: &Path) -> Option<SourceType> {
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        // Explicitly-declared extra extensions compile as the target
        // language.
        if target.file_extensions.iter().any(|e| *e == extension) {
            return Some(match target.language() {
                Language::C => SourceType::C,
                Language::Cxx => SourceType::Cxx,
                Language::ObjC => SourceType::ObjC,
                Language::ObjCxx => SourceType::ObjCxx,
            });
        }

        let source_type = match extension.as_str() {
            "c" => SourceType::C,
            "cpp" | "cc" | "cxx" | "c++" => SourceType::Cxx,
            "ixx" | "cppm" | "mxx" => SourceType::CxxModule,
            "m" => SourceType::ObjC,
            "mm" => SourceType::ObjCxx,
            "rc" => SourceType::WindowsResource,
            _ => return None,
        };

        // In a modules build, every C++ TU may import or export; they all
        // go through the module pipeline.
        if target.uses_cpp_modules() && source_type == SourceType::Cxx {
            return Some(SourceType::CxxModule);
        }

        Some(source_type)
    }

    fn object_extension(&self) -> &'static str {
        if self.toolchain.family == ToolchainFamily::Msvc
            || self.toolchain.family == ToolchainFamily::IntelClassic
        {
            "obj"
        } else {
            "o"
        }
    }

    fn assembly_extension(&self) -> &'static str {
        if self.toolchain.family == ToolchainFamily::Msvc {
            "asm"
        } else {
            "s"
        }
    }

    fn bmi_extension(&self) -> &'static str {
        match self.toolchain.family {
            ToolchainFamily::Msvc => "ifc",
            ToolchainFamily::Gcc | ToolchainFamily::MingwGcc => "gcm",
            _ => "pcm",
        }
    }

    /// Artifact file name with platform prefix and extension.
    fn artifact_file_name(&self, target: &SourceTarget) -> String {
        let base = target.output_base_name();
        let windows = self.workspace.platform == Platform::Windows;
        let macos = self.workspace.platform == Platform::MacOS;

        match target.kind() {
            TargetKind::Executable => {
                if windows {
                    format!("{}.exe", base)
                } else {
                    base.to_string()
                }
            }
            TargetKind::StaticLibrary | TargetKind::ObjectLibrary => {
                if windows && !self.toolchain.family.is_gnu_style() {
                    format!("{}.lib", base)
                } else {
                    format!("lib{}.a", base)
                }
            }
            TargetKind::SharedLibrary => {
                if windows {
                    format!("{}.dll", base)
                } else if macos {
                    format!("lib{}.dylib", base)
                } else {
                    format!("lib{}.so", base)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::configuration::BuildConfiguration;
    use crate::core::workspace::Arch;
    use crate::toolchain::{CompanionTools, Version};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn toolchain(family: ToolchainFamily) -> ResolvedToolchain {
        ResolvedToolchain {
            name: "gcc".into(),
            family,
            version: Version::new(12, 0, 0),
            cpp: PathBuf::from("g++"),
            cc: PathBuf::from("gcc"),
            linker: PathBuf::from("g++"),
            archiver: PathBuf::from("ar"),
            resource_compiler: None,
            rc_is_llvm: false,
            tools: CompanionTools::default(),
            target_triple: "x86_64-unknown-linux-gnu".into(),
            env_delta: BTreeMap::new(),
        }
    }

    fn debug_config() -> BuildConfiguration {
        BuildConfiguration::default_set()
            .into_iter()
            .find(|c| c.name == "Debug")
            .unwrap()
    }

    fn workspace_at(root: &Path, targets: Vec<crate::core::Target>) -> Workspace {
        Workspace {
            name: "test".into(),
            version: "1.0.0".into(),
            root: root.to_path_buf(),
            platform: Platform::host(),
            host_arch: Arch::host(),
            target_arch: Arch::host(),
            search_paths: Vec::new(),
            configurations: BuildConfiguration::default_set(),
            targets,
            bundles: Vec::new(),
        }
    }

    fn target_with_sources(tmp: &TempDir, files: &[&str]) -> SourceTarget {
        for file in files {
            let path = tmp.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "int x;").unwrap();
        }
        let mut target = SourceTarget::new("hello");
        target.files = vec!["src/**/*.cpp".into(), "src/**/*.c".into()];
        target
    }

    #[test]
    fn test_build_path_styles() {
        let tmp = TempDir::new().unwrap();
        let ws = workspace_at(tmp.path(), Vec::new());
        let tc = toolchain(ToolchainFamily::Gcc);
        let config = debug_config();

        assert_eq!(
            BuildPathStyle::Configuration.segment("Debug", &ws, &tc),
            "Debug"
        );
        assert_eq!(
            BuildPathStyle::ArchConfiguration.segment("Debug", &ws, &tc),
            format!("Debug-{}", ws.target_arch.cpu)
        );
        assert_eq!(
            BuildPathStyle::ToolchainName.segment("Debug", &ws, &tc),
            "Debug-gcc"
        );
        let _ = config;
    }

    #[test]
    fn test_object_paths_distinct_for_same_basename() {
        let tmp = TempDir::new().unwrap();
        let target = target_with_sources(&tmp, &["src/a/util.cpp", "src/b/util.cpp"]);
        let ws = workspace_at(tmp.path(), Vec::new());
        let tc = toolchain(ToolchainFamily::Gcc);
        let config = debug_config();

        let outputs = OutputsBuilder::new(&ws, &tc, &config, BuildPathStyle::Configuration)
            .assemble(&target)
            .unwrap();

        assert_eq!(outputs.groups.len(), 2);
        assert_ne!(outputs.groups[0].object, outputs.groups[1].object);
        for group in &outputs.groups {
            assert!(group.object.starts_with(outputs.obj_dir.join("src")));
            assert!(group.object.to_string_lossy().ends_with(".o"));
            assert!(group.dependency.to_string_lossy().ends_with(".d"));
        }
    }

    #[test]
    fn test_object_paths_distinct_across_targets() {
        let tmp = TempDir::new().unwrap();
        let target_a = target_with_sources(&tmp, &["src/main.cpp"]);
        let mut target_b = target_a.clone();
        target_b.name = "other".into();

        let ws = workspace_at(tmp.path(), Vec::new());
        let tc = toolchain(ToolchainFamily::Gcc);
        let config = debug_config();
        let builder = OutputsBuilder::new(&ws, &tc, &config, BuildPathStyle::Configuration);

        let a = builder.assemble(&target_a).unwrap();
        let b = builder.assemble(&target_b).unwrap();
        assert_ne!(a.groups[0].object, b.groups[0].object);
    }

    #[test]
    fn test_zero_sources_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut target = SourceTarget::new("empty");
        target.files = vec!["src/**/*.cpp".into()];

        let ws = workspace_at(tmp.path(), Vec::new());
        let tc = toolchain(ToolchainFamily::Gcc);
        let config = debug_config();

        let result = OutputsBuilder::new(&ws, &tc, &config, BuildPathStyle::Configuration)
            .assemble(&target);
        assert!(result.is_err());
    }

    #[test]
    fn test_modules_classification() {
        let tmp = TempDir::new().unwrap();
        let mut target = target_with_sources(&tmp, &["src/main.cpp"]);
        target.cpp_modules = true;

        let ws = workspace_at(tmp.path(), Vec::new());
        let tc = toolchain(ToolchainFamily::Clang);
        let config = debug_config();

        let outputs = OutputsBuilder::new(&ws, &tc, &config, BuildPathStyle::Configuration)
            .assemble(&target)
            .unwrap();

        assert_eq!(outputs.groups[0].source_type, SourceType::CxxModule);
        let bmi = outputs.groups[0].module_output.as_ref().unwrap();
        assert!(bmi.to_string_lossy().ends_with(".pcm"));
    }

    #[test]
    fn test_pch_outputs() {
        let tmp = TempDir::new().unwrap();
        let mut target = target_with_sources(&tmp, &["src/main.cpp"]);
        std::fs::write(tmp.path().join("src/pch.hpp"), "#pragma once").unwrap();
        target.pch = Some(PathBuf::from("src/pch.hpp"));

        let ws = workspace_at(tmp.path(), Vec::new());
        let tc = toolchain(ToolchainFamily::Gcc);
        let config = debug_config();

        let outputs = OutputsBuilder::new(&ws, &tc, &config, BuildPathStyle::Configuration)
            .assemble(&target)
            .unwrap();

        let pch = outputs.pch.unwrap();
        assert_eq!(pch.source_type, SourceType::PrecompiledHeader);
        assert!(pch
            .module_output
            .unwrap()
            .to_string_lossy()
            .ends_with("pch.hpp.gch"));
    }
}
