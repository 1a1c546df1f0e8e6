//! Build target definitions.
//!
//! A target is a named buildable node of the workspace: a native source
//! target, a CMake sub-project, a nested slipway sub-project, or a script.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The kind of artifact a source target produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Executable,
    StaticLibrary,
    SharedLibrary,
    /// Compiled objects only, consumed by another target's link.
    ObjectLibrary,
}

impl TargetKind {
    pub fn is_library(&self) -> bool {
        !matches!(self, TargetKind::Executable)
    }

    pub fn produces_link_step(&self) -> bool {
        !matches!(self, TargetKind::ObjectLibrary)
    }
}

/// Source language of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    C,
    #[serde(rename = "C++")]
    Cxx,
    #[serde(rename = "Objective-C")]
    ObjC,
    #[serde(rename = "Objective-C++")]
    ObjCxx,
}

impl Language {
    /// Whether the C++ driver is required.
    pub fn is_cxx(&self) -> bool {
        matches!(self, Language::Cxx | Language::ObjCxx)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cxx => "C++",
            Language::ObjC => "Objective-C",
            Language::ObjCxx => "Objective-C++",
        }
    }
}

/// Threading model requested for compile and link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadModel {
    #[default]
    Auto,
    Posix,
    None,
}

/// Windows linker subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowsSubsystem {
    #[default]
    Console,
    Windows,
}

/// Abstract warning presets, mapped per compiler family during command
/// synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningsPreset {
    #[default]
    None,
    Minimal,
    Extra,
    Pedantic,
    Strict,
    StrictPedantic,
    VeryStrict,
}

/// A native compile-and-link target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceTarget {
    pub name: String,
    pub kind: Option<TargetKind>,
    pub language: Option<Language>,

    /// Glob patterns for input files.
    pub files: Vec<String>,

    // Ordered unique sets; order is meaningful for include and lib search.
    pub include_dirs: Vec<String>,
    pub lib_dirs: Vec<String>,
    pub defines: Vec<String>,
    pub links: Vec<String>,
    pub static_links: Vec<String>,
    pub compile_options: Vec<String>,
    pub linker_options: Vec<String>,
    pub macos_framework_paths: Vec<String>,
    pub macos_frameworks: Vec<String>,
    pub file_extensions: Vec<String>,

    pub warnings: WarningsPreset,
    pub warnings_as_errors: bool,

    /// Language standard spelling, e.g. `c++17`, `c11`, `c++20`.
    pub language_standard: Option<String>,

    /// Precompiled header path, relative to the workspace root.
    pub pch: Option<PathBuf>,

    /// Base name of the output artifact; defaults to the target name.
    pub output_name: Option<String>,

    pub rtti: bool,
    pub exceptions: bool,
    pub thread_model: ThreadModel,
    pub static_runtime: bool,
    pub position_independent: bool,

    /// Compile C++20 module units found in `files`.
    pub cpp_modules: bool,

    pub dump_assembly: bool,
    pub unity_build: bool,

    pub windows_subsystem: WindowsSubsystem,
    pub windows_entry_point: Option<String>,
    pub windows_application_manifest: Option<PathBuf>,
    pub windows_application_icon: Option<PathBuf>,

    pub linker_script: Option<PathBuf>,
}

impl SourceTarget {
    pub fn new(name: impl Into<String>) -> Self {
        SourceTarget {
            name: name.into(),
            rtti: true,
            exceptions: true,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind.unwrap_or(TargetKind::Executable)
    }

    pub fn language(&self) -> Language {
        self.language.unwrap_or(Language::Cxx)
    }

    /// Base name of the produced artifact.
    pub fn output_base_name(&self) -> &str {
        self.output_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether C++20 module semantics apply to this target.
    pub fn uses_cpp_modules(&self) -> bool {
        self.cpp_modules && self.language().is_cxx()
    }
}

/// A CMake sub-project driven as one atomic node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CMakeTarget {
    pub name: String,
    /// Source directory containing the CMake lists file.
    pub location: PathBuf,
    /// Alternate lists file name, when not `CMakeLists.txt`.
    pub build_file: Option<String>,
    pub toolset: Option<String>,
    pub defines: Vec<String>,
    /// Executable produced by the sub-build that `run` may launch.
    pub run_executable: Option<PathBuf>,
    /// Re-run the configure step on the next build.
    pub recheck: bool,
    /// Rebuild from scratch on the next build.
    pub rebuild: bool,
    /// Remove the sub-build directory on `clean`.
    pub clean: bool,
}

/// A nested slipway project driven through a child invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubProjectTarget {
    pub name: String,
    pub location: PathBuf,
    /// Alternate build file inside `location`.
    pub build_file: Option<String>,
    pub recheck: bool,
    pub rebuild: bool,
    pub clean: bool,
    /// Restrict the child build to these inner targets.
    pub targets: Vec<String>,
}

/// A script run as a build step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptTarget {
    pub name: String,
    pub file: PathBuf,
    pub arguments: Vec<String>,
    /// Working directory for the script; defaults to the workspace root.
    pub working_directory: Option<PathBuf>,
}

/// A named buildable node of the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Target {
    Source(SourceTarget),
    CMake(CMakeTarget),
    SubProject(SubProjectTarget),
    Script(ScriptTarget),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Source(t) => &t.name,
            Target::CMake(t) => &t.name,
            Target::SubProject(t) => &t.name,
            Target::Script(t) => &t.name,
        }
    }

    pub fn as_source(&self) -> Option<&SourceTarget> {
        match self {
            Target::Source(t) => Some(t),
            _ => None,
        }
    }
}

/// Append `items` to `set`, skipping entries already present.
///
/// Build-file lists are ordered and duplicate-free; later conditional
/// variants may only add, never reorder.
pub fn merge_unique(set: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !set.contains(&item) {
            set.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unique_keeps_order() {
        let mut set = vec!["a".to_string(), "b".to_string()];
        merge_unique(&mut set, ["b".to_string(), "c".to_string(), "a".to_string()]);
        assert_eq!(set, ["a", "b", "c"]);
    }

    #[test]
    fn test_source_target_defaults() {
        let t = SourceTarget::new("hello");
        assert_eq!(t.kind(), TargetKind::Executable);
        assert_eq!(t.language(), Language::Cxx);
        assert!(t.rtti);
        assert!(t.exceptions);
        assert_eq!(t.output_base_name(), "hello");
    }

    #[test]
    fn test_modules_require_cxx() {
        let mut t = SourceTarget::new("m");
        t.cpp_modules = true;
        t.language = Some(Language::C);
        assert!(!t.uses_cpp_modules());

        t.language = Some(Language::Cxx);
        assert!(t.uses_cpp_modules());
    }

    #[test]
    fn test_warning_preset_ordering() {
        assert!(WarningsPreset::Minimal < WarningsPreset::Strict);
        assert!(WarningsPreset::Strict < WarningsPreset::VeryStrict);
    }
}
