//! Build-file loading.
//!
//! The build description is a single JSON file. Most keys accept
//! *conditional suffixes*: `defines.windows`, `links.!debug`,
//! `compileOptions.macos.debug` and so on. All variants whose conditions
//! hold for the active platform and configuration are merged into one
//! effective value: lists append (unique, in declaration order), scalars
//! override.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};

use crate::core::bundle::{BundleTarget, LinuxBundle, MacosBundle, WindowsBundle};
use crate::core::configuration::{BuildConfiguration, OptimizationLevel};
use crate::core::target::{
    merge_unique, CMakeTarget, Language, ScriptTarget, SourceTarget, SubProjectTarget, Target,
    TargetKind, ThreadModel, WarningsPreset, WindowsSubsystem,
};
use crate::core::workspace::{Arch, Platform, Workspace};
use crate::error::BuildError;

/// Default build file name, looked up in the working directory.
pub const DEFAULT_BUILD_FILE: &str = "slipway.json";

/// Context a build file is resolved against.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub platform: Platform,
    /// Whether the active configuration is a debug configuration.
    pub is_debug: bool,
}

impl ResolveContext {
    /// Evaluate one condition segment (`windows`, `!macos`, `debug`, ...).
    fn holds(&self, condition: &str) -> bool {
        let (negated, name) = match condition.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, condition),
        };

        let value = match name {
            "windows" => self.platform == Platform::Windows,
            "macos" => self.platform == Platform::MacOS,
            "linux" => self.platform == Platform::Linux,
            "debug" => self.is_debug,
            // Unknown conditions never match; a typo'd platform should not
            // silently apply everywhere.
            _ => return false,
        };

        value != negated
    }

    /// Whether `key` is `base` or a conditional variant of it whose
    /// conditions all hold.
    fn key_matches(&self, key: &str, base: &str) -> bool {
        if key == base {
            return true;
        }
        let Some(rest) = key.strip_prefix(base) else {
            return false;
        };
        let Some(conditions) = rest.strip_prefix('.') else {
            return false;
        };
        !conditions.is_empty() && conditions.split('.').all(|c| self.holds(c))
    }
}

/// Loader for the JSON build description.
pub struct BuildFileLoader<'a> {
    path: &'a Path,
    configuration: &'a str,
    target_arch: Option<&'a str>,
}

impl<'a> BuildFileLoader<'a> {
    pub fn new(path: &'a Path, configuration: &'a str) -> Self {
        BuildFileLoader {
            path,
            configuration,
            target_arch: None,
        }
    }

    /// Override the target architecture triple (`-a` on the command line).
    pub fn target_arch(mut self, arch: Option<&'a str>) -> Self {
        self.target_arch = arch;
        self
    }

    /// Parse and resolve the build file into a workspace.
    pub fn load(self) -> Result<Workspace> {
        let text = crate::util::fs::read_to_string(self.path)?;
        let root: Value = serde_json::from_str(&text).map_err(|e| {
            anyhow!(BuildError::Parse {
                file: self.path.to_path_buf(),
                line: e.line(),
                key: String::new(),
                message: e.to_string(),
            })
        })?;

        let Some(root) = root.as_object() else {
            bail!(self.parse_error("", "the build file root must be an object"));
        };

        let name = root
            .get("workspace")
            .and_then(Value::as_str)
            .ok_or_else(|| self.parse_error("workspace", "missing workspace name"))?
            .to_string();
        let version = root
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("0.1.0")
            .to_string();

        let configurations = self.parse_configurations(root)?;
        let active = configurations
            .iter()
            .find(|c| c.name == self.configuration)
            .ok_or_else(|| {
                self.parse_error(
                    "configurations",
                    format!("unknown configuration `{}`", self.configuration),
                )
            })?;

        let ctx = ResolveContext {
            platform: Platform::host(),
            is_debug: active.is_debuggable(),
        };

        let host_arch = Arch::host();
        let target_arch = match self.target_arch {
            Some(triple) => Arch::from_triple(triple)?,
            None => host_arch.clone(),
        };

        let workspace_root = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        let search_paths = merged_strings(root, "searchPaths", &ctx)
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let abstracts = root
            .get("abstracts")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut targets = Vec::new();
        if let Some(raw_targets) = root.get("targets").and_then(Value::as_object) {
            for (target_name, raw) in raw_targets {
                let Some(raw) = raw.as_object() else {
                    bail!(self.parse_error(target_name, "target must be an object"));
                };
                targets.push(self.parse_target(target_name, raw, &abstracts, &ctx)?);
            }
        }

        let mut bundles = Vec::new();
        if let Some(raw_bundles) = root.get("distribution").and_then(Value::as_object) {
            for (bundle_name, raw) in raw_bundles {
                let Some(raw) = raw.as_object() else {
                    bail!(self.parse_error(bundle_name, "distribution entry must be an object"));
                };
                bundles.push(self.parse_bundle(bundle_name, raw, &ctx));
            }
        }

        if root.contains_key("externalDependencies") {
            tracing::debug!("external dependencies are fetched before planning; skipping here");
        }

        Ok(Workspace {
            name,
            version,
            root: workspace_root,
            platform: ctx.platform,
            host_arch,
            target_arch,
            search_paths,
            configurations,
            targets,
            bundles,
        })
    }

    fn parse_configurations(&self, root: &Map<String, Value>) -> Result<Vec<BuildConfiguration>> {
        let Some(raw) = root.get("configurations").and_then(Value::as_object) else {
            return Ok(BuildConfiguration::default_set());
        };

        let mut configurations = Vec::new();
        for (name, value) in raw {
            let Some(obj) = value.as_object() else {
                bail!(self.parse_error(name, "configuration must be an object"));
            };

            let optimization_level = match obj.get("optimizationLevel").and_then(Value::as_str) {
                Some(spelling) => OptimizationLevel::parse(spelling).ok_or_else(|| {
                    self.parse_error(
                        name,
                        format!("unknown optimization level `{}`", spelling),
                    )
                })?,
                None => OptimizationLevel::None,
            };

            let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);

            let configuration = BuildConfiguration {
                name: name.clone(),
                optimization_level,
                link_time_optimization: flag("linkTimeOptimization"),
                strip_symbols: flag("stripSymbols"),
                debug_symbols: flag("debugSymbols"),
                enable_profiling: flag("enableProfiling"),
                interprocedural_optimization: flag("interproceduralOptimization"),
            };
            configuration
                .validate()
                .map_err(|e| self.parse_error(name, e.to_string()))?;
            configurations.push(configuration);
        }

        Ok(configurations)
    }

    fn parse_target(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        abstracts: &Map<String, Value>,
        ctx: &ResolveContext,
    ) -> Result<Target> {
        let kind = merged_string(raw, "kind", ctx).unwrap_or_else(|| "executable".to_string());

        match kind.as_str() {
            "executable" | "staticLibrary" | "sharedLibrary" | "objectLibrary" => {
                // Apply the extended abstract first, then the target's own
                // keys on top.
                let extends = merged_string(raw, "extends", ctx).unwrap_or_else(|| "*".to_string());
                let mut effective = Map::new();
                if let Some(base) = abstracts.get(&extends).and_then(Value::as_object) {
                    merge_objects(&mut effective, base);
                }
                merge_objects(&mut effective, raw);

                self.parse_source_target(name, &kind, &effective, ctx)
                    .map(Target::Source)
            }
            "cmakeProject" => self.parse_cmake_target(name, raw, ctx).map(Target::CMake),
            "subProject" => self
                .parse_subproject_target(name, raw, ctx)
                .map(Target::SubProject),
            "script" => self.parse_script_target(name, raw, ctx).map(Target::Script),
            other => bail!(self.parse_error(name, format!("unknown target kind `{}`", other))),
        }
    }

    fn parse_source_target(
        &self,
        name: &str,
        kind: &str,
        raw: &Map<String, Value>,
        ctx: &ResolveContext,
    ) -> Result<SourceTarget> {
        let mut target = SourceTarget::new(name);

        target.kind = Some(match kind {
            "executable" => TargetKind::Executable,
            "staticLibrary" => TargetKind::StaticLibrary,
            "sharedLibrary" => TargetKind::SharedLibrary,
            _ => TargetKind::ObjectLibrary,
        });

        target.language = match merged_string(raw, "language", ctx).as_deref() {
            None => None,
            Some("C") => Some(Language::C),
            Some("C++") => Some(Language::Cxx),
            Some("Objective-C") => Some(Language::ObjC),
            Some("Objective-C++") => Some(Language::ObjCxx),
            Some(other) => {
                bail!(self.parse_error(name, format!("unknown language `{}`", other)))
            }
        };

        target.files = merged_strings(raw, "files", ctx);
        if target.files.is_empty() {
            bail!(self.parse_error(name, "a source target must declare input files"));
        }

        target.include_dirs = merged_strings(raw, "includeDirs", ctx);
        target.lib_dirs = merged_strings(raw, "libDirs", ctx);
        target.defines = merged_strings(raw, "defines", ctx);
        target.links = merged_strings(raw, "links", ctx);
        target.static_links = merged_strings(raw, "staticLinks", ctx);
        target.compile_options = merged_strings(raw, "compileOptions", ctx);
        target.linker_options = merged_strings(raw, "linkerOptions", ctx);
        target.macos_framework_paths = merged_strings(raw, "macosFrameworkPaths", ctx);
        target.macos_frameworks = merged_strings(raw, "macosFrameworks", ctx);
        target.file_extensions = merged_strings(raw, "fileExtensions", ctx);

        if let Some(preset) = merged_string(raw, "warnings", ctx) {
            target.warnings = match preset.as_str() {
                "none" => WarningsPreset::None,
                "minimal" => WarningsPreset::Minimal,
                "extra" => WarningsPreset::Extra,
                "pedantic" => WarningsPreset::Pedantic,
                "strict" => WarningsPreset::Strict,
                "strictPedantic" => WarningsPreset::StrictPedantic,
                "veryStrict" => WarningsPreset::VeryStrict,
                "error" => {
                    target.warnings_as_errors = true;
                    WarningsPreset::Pedantic
                }
                other => {
                    bail!(self.parse_error(name, format!("unknown warnings preset `{}`", other)))
                }
            };
        }
        if let Some(as_errors) = merged_bool(raw, "treatWarningsAsErrors", ctx) {
            target.warnings_as_errors = as_errors;
        }

        target.language_standard = merged_string(raw, "languageStandard", ctx);
        target.pch = merged_string(raw, "pch", ctx).map(PathBuf::from);
        target.output_name = merged_string(raw, "outputName", ctx);

        target.rtti = merged_bool(raw, "rtti", ctx).unwrap_or(true);
        target.exceptions = merged_bool(raw, "exceptions", ctx).unwrap_or(true);
        target.static_runtime = merged_bool(raw, "staticRuntime", ctx).unwrap_or(false);
        target.position_independent =
            merged_bool(raw, "positionIndependent", ctx).unwrap_or(false);
        target.cpp_modules = merged_bool(raw, "cppModules", ctx).unwrap_or(false);
        target.dump_assembly = merged_bool(raw, "dumpAssembly", ctx).unwrap_or(false);
        target.unity_build = merged_bool(raw, "unityBuild", ctx).unwrap_or(false);

        target.thread_model = match merged_string(raw, "threads", ctx).as_deref() {
            None | Some("auto") => ThreadModel::Auto,
            Some("posix") => ThreadModel::Posix,
            Some("none") => ThreadModel::None,
            Some(other) => {
                bail!(self.parse_error(name, format!("unknown thread model `{}`", other)))
            }
        };

        target.windows_subsystem = match merged_string(raw, "windowsSubsystem", ctx).as_deref() {
            None | Some("console") => WindowsSubsystem::Console,
            Some("windows") => WindowsSubsystem::Windows,
            Some(other) => {
                bail!(self.parse_error(name, format!("unknown windows subsystem `{}`", other)))
            }
        };
        target.windows_entry_point = merged_string(raw, "windowsEntryPoint", ctx);
        target.windows_application_manifest =
            merged_string(raw, "windowsApplicationManifest", ctx).map(PathBuf::from);
        target.windows_application_icon =
            merged_string(raw, "windowsApplicationIcon", ctx).map(PathBuf::from);
        target.linker_script = merged_string(raw, "linkerScript", ctx).map(PathBuf::from);

        Ok(target)
    }

    fn parse_cmake_target(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        ctx: &ResolveContext,
    ) -> Result<CMakeTarget> {
        let location = merged_string(raw, "location", ctx)
            .ok_or_else(|| self.parse_error(name, "cmakeProject requires `location`"))?;

        Ok(CMakeTarget {
            name: name.to_string(),
            location: PathBuf::from(location),
            build_file: merged_string(raw, "buildFile", ctx),
            toolset: merged_string(raw, "toolset", ctx),
            defines: merged_strings(raw, "defines", ctx),
            run_executable: merged_string(raw, "runExecutable", ctx).map(PathBuf::from),
            recheck: merged_bool(raw, "recheck", ctx).unwrap_or(false),
            rebuild: merged_bool(raw, "rebuild", ctx).unwrap_or(false),
            clean: merged_bool(raw, "clean", ctx).unwrap_or(false),
        })
    }

    fn parse_subproject_target(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        ctx: &ResolveContext,
    ) -> Result<SubProjectTarget> {
        let location = merged_string(raw, "location", ctx)
            .ok_or_else(|| self.parse_error(name, "subProject requires `location`"))?;

        Ok(SubProjectTarget {
            name: name.to_string(),
            location: PathBuf::from(location),
            build_file: merged_string(raw, "buildFile", ctx),
            recheck: merged_bool(raw, "recheck", ctx).unwrap_or(false),
            rebuild: merged_bool(raw, "rebuild", ctx).unwrap_or(false),
            clean: merged_bool(raw, "clean", ctx).unwrap_or(false),
            targets: merged_strings(raw, "targets", ctx),
        })
    }

    fn parse_script_target(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        ctx: &ResolveContext,
    ) -> Result<ScriptTarget> {
        let file = merged_string(raw, "file", ctx)
            .ok_or_else(|| self.parse_error(name, "script requires `file`"))?;

        Ok(ScriptTarget {
            name: name.to_string(),
            file: PathBuf::from(file),
            arguments: merged_strings(raw, "arguments", ctx),
            working_directory: merged_string(raw, "workingDirectory", ctx).map(PathBuf::from),
        })
    }

    fn parse_bundle(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        ctx: &ResolveContext,
    ) -> BundleTarget {
        BundleTarget {
            name: name.to_string(),
            configuration: merged_string(raw, "configuration", ctx),
            build_targets: merged_strings(raw, "buildTargets", ctx),
            include: merged_strings(raw, "include", ctx),
            exclude: merged_strings(raw, "exclude", ctx),
            main_executable: merged_string(raw, "mainExecutable", ctx),
            linux: LinuxBundle {
                desktop_entry: merged_string(raw, "linuxDesktopEntry", ctx).map(PathBuf::from),
                icon: merged_string(raw, "linuxIcon", ctx).map(PathBuf::from),
            },
            macos: MacosBundle {
                info_plist: merged_string(raw, "macosInfoPropertyList", ctx).map(PathBuf::from),
                universal_binary: merged_bool(raw, "macosUniversalBinary", ctx).unwrap_or(false),
                make_dmg: merged_bool(raw, "macosMakeDmg", ctx).unwrap_or(false),
                icon: merged_string(raw, "macosIcon", ctx).map(PathBuf::from),
            },
            windows: WindowsBundle {
                nsis_script: merged_string(raw, "windowsNsisScript", ctx).map(PathBuf::from),
                icon: merged_string(raw, "windowsIcon", ctx).map(PathBuf::from),
            },
        }
    }

    fn parse_error(&self, key: &str, message: impl Into<String>) -> anyhow::Error {
        anyhow!(BuildError::Parse {
            file: self.path.to_path_buf(),
            line: 0,
            key: key.to_string(),
            message: message.into(),
        })
    }
}

/// Collect the effective string list for `base` across all matching
/// conditional variants.
fn merged_strings(obj: &Map<String, Value>, base: &str, ctx: &ResolveContext) -> Vec<String> {
    let mut result = Vec::new();
    for (key, value) in obj {
        if !ctx.key_matches(key, base) {
            continue;
        }
        match value {
            Value::Array(items) => {
                merge_unique(
                    &mut result,
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| s.to_string()),
                );
            }
            Value::String(s) => merge_unique(&mut result, [s.clone()]),
            _ => {}
        }
    }
    result
}

/// The effective scalar string for `base`; a later matching variant
/// overrides an earlier one.
fn merged_string(obj: &Map<String, Value>, base: &str, ctx: &ResolveContext) -> Option<String> {
    let mut result = None;
    for (key, value) in obj {
        if ctx.key_matches(key, base) {
            if let Some(s) = value.as_str() {
                result = Some(s.to_string());
            }
        }
    }
    result
}

/// The effective boolean for `base`.
fn merged_bool(obj: &Map<String, Value>, base: &str, ctx: &ResolveContext) -> Option<bool> {
    let mut result = None;
    for (key, value) in obj {
        if ctx.key_matches(key, base) {
            if let Some(b) = value.as_bool() {
                result = Some(b);
            }
        }
    }
    result
}

/// Overlay `addition` onto `base`: arrays concatenate, everything else
/// overrides. Conditional suffixes survive untouched and are resolved later.
fn merge_objects(base: &mut Map<String, Value>, addition: &Map<String, Value>) {
    for (key, value) in addition {
        match (base.get_mut(key), value) {
            (Some(Value::Array(existing)), Value::Array(incoming)) => {
                existing.extend(incoming.iter().cloned());
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(platform: Platform, is_debug: bool) -> ResolveContext {
        ResolveContext { platform, is_debug }
    }

    fn obj(json: &str) -> Map<String, Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_condition_evaluation() {
        let linux_debug = ctx(Platform::Linux, true);
        assert!(linux_debug.key_matches("defines.linux", "defines"));
        assert!(linux_debug.key_matches("defines.!windows", "defines"));
        assert!(linux_debug.key_matches("defines.debug", "defines"));
        assert!(linux_debug.key_matches("defines.linux.debug", "defines"));
        assert!(!linux_debug.key_matches("defines.windows", "defines"));
        assert!(!linux_debug.key_matches("defines.!debug", "defines"));
        assert!(!linux_debug.key_matches("defines.linux.!debug", "defines"));
        // A different base key never matches, even with a shared prefix.
        assert!(!linux_debug.key_matches("definesExtra", "defines"));
        assert!(!linux_debug.key_matches("defines.", "defines"));
    }

    #[test]
    fn test_unknown_condition_never_matches() {
        let c = ctx(Platform::Linux, false);
        assert!(!c.key_matches("defines.freebsd", "defines"));
    }

    #[test]
    fn test_merged_strings_appends_variants() {
        let raw = obj(
            r#"{
                "defines": ["BASE"],
                "defines.linux": ["ON_LINUX"],
                "defines.windows": ["ON_WINDOWS"],
                "defines.debug": ["DEBUGGING", "BASE"]
            }"#,
        );

        let c = ctx(Platform::Linux, true);
        assert_eq!(
            merged_strings(&raw, "defines", &c),
            ["BASE", "ON_LINUX", "DEBUGGING"]
        );

        let c = ctx(Platform::Windows, false);
        assert_eq!(merged_strings(&raw, "defines", &c), ["BASE", "ON_WINDOWS"]);
    }

    #[test]
    fn test_merged_scalar_overrides() {
        let raw = obj(
            r#"{
                "outputName": "app",
                "outputName.windows": "app-win"
            }"#,
        );

        let c = ctx(Platform::Windows, false);
        assert_eq!(merged_string(&raw, "outputName", &c).unwrap(), "app-win");

        let c = ctx(Platform::MacOS, false);
        assert_eq!(merged_string(&raw, "outputName", &c).unwrap(), "app");
    }

    fn write_build_file(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join(DEFAULT_BUILD_FILE);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_workspace() {
        let tmp = TempDir::new().unwrap();
        let path = write_build_file(
            tmp.path(),
            r#"{
                "workspace": "hello",
                "version": "1.2.0",
                "targets": {
                    "hello": {
                        "kind": "executable",
                        "language": "C++",
                        "languageStandard": "c++17",
                        "files": ["src/**/*.cpp"]
                    }
                }
            }"#,
        );

        let ws = BuildFileLoader::new(&path, "Debug").load().unwrap();
        assert_eq!(ws.name, "hello");
        assert_eq!(ws.version, "1.2.0");
        // No configurations key: the stock set applies.
        assert!(ws.configuration("Release").is_some());
        assert!(ws.configuration("Debug").is_some());

        let target = ws.target("hello").unwrap().as_source().unwrap();
        assert_eq!(target.language_standard.as_deref(), Some("c++17"));
        assert_eq!(target.kind(), TargetKind::Executable);
    }

    #[test]
    fn test_load_rejects_unknown_configuration() {
        let tmp = TempDir::new().unwrap();
        let path = write_build_file(
            tmp.path(),
            r#"{ "workspace": "w", "targets": {} }"#,
        );

        assert!(BuildFileLoader::new(&path, "Bogus").load().is_err());
    }

    #[test]
    fn test_load_rejects_lto_debug_configuration() {
        let tmp = TempDir::new().unwrap();
        let path = write_build_file(
            tmp.path(),
            r#"{
                "workspace": "w",
                "configurations": {
                    "Broken": {
                        "optimizationLevel": "2",
                        "linkTimeOptimization": true,
                        "debugSymbols": true
                    }
                },
                "targets": {}
            }"#,
        );

        assert!(BuildFileLoader::new(&path, "Broken").load().is_err());
    }

    #[test]
    fn test_load_rejects_source_target_without_files() {
        let tmp = TempDir::new().unwrap();
        let path = write_build_file(
            tmp.path(),
            r#"{
                "workspace": "w",
                "targets": { "empty": { "kind": "executable" } }
            }"#,
        );

        assert!(BuildFileLoader::new(&path, "Debug").load().is_err());
    }

    #[test]
    fn test_abstract_extension() {
        let tmp = TempDir::new().unwrap();
        let path = write_build_file(
            tmp.path(),
            r#"{
                "workspace": "w",
                "abstracts": {
                    "*": {
                        "language": "C++",
                        "warnings": "pedantic",
                        "defines": ["COMMON"]
                    }
                },
                "targets": {
                    "app": {
                        "kind": "executable",
                        "files": ["src/*.cpp"],
                        "defines": ["APP"]
                    }
                }
            }"#,
        );

        let ws = BuildFileLoader::new(&path, "Debug").load().unwrap();
        let target = ws.target("app").unwrap().as_source().unwrap();
        assert_eq!(target.warnings, WarningsPreset::Pedantic);
        assert_eq!(target.defines, ["COMMON", "APP"]);
    }

    #[test]
    fn test_script_and_cmake_targets() {
        let tmp = TempDir::new().unwrap();
        let path = write_build_file(
            tmp.path(),
            r#"{
                "workspace": "w",
                "targets": {
                    "deps": { "kind": "cmakeProject", "location": "vendor/zlib" },
                    "gen": { "kind": "script", "file": "scripts/gen.py" }
                }
            }"#,
        );

        let ws = BuildFileLoader::new(&path, "Debug").load().unwrap();
        assert!(matches!(ws.target("deps"), Some(Target::CMake(_))));
        assert!(matches!(ws.target("gen"), Some(Target::Script(_))));
    }
}
