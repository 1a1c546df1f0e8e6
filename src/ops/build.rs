//! Implementation of `slipway build` (and `rebuild`).
//!
//! The orchestrator linearizes targets along their static-link edges and
//! drives the selected strategy over them, one foreground thread doing all
//! planning and cache I/O. The command pool is the only place children are
//! created.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use crate::cache::{keys, SourceCache, ToolchainCache, ToolchainEntry, WorkspaceCache};
use crate::core::target::Target;
use crate::core::workspace::Workspace;
use crate::core::{BuildFileLoader, DEFAULT_BUILD_FILE};
use crate::plan::{BuildPathStyle, CompileCommandsGenerator, OutputsBuilder, TargetBuildPlan};
use crate::pool::{default_max_jobs, CommandPool};
use crate::strategy::{
    make_strategy, BuildSession, CMakeDriver, PlannedTarget, ScriptRunner, StrategyContext,
    StrategyKind, SubProjectDriver,
};
use crate::toolchain::{
    discovery, env_script, resolve_toolchain, ResolvedToolchain, ToolchainPreference,
};
use crate::util::fs::remove_dir_all_if_exists;

/// Options consumed by the build orchestrator.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub configuration: Option<String>,
    pub arch: Option<String>,
    pub toolchain: Option<String>,
    pub jobs: Option<usize>,
    pub input_file: Option<PathBuf>,
    pub envfile: Option<PathBuf>,
    /// Restrict the build to these targets plus their link dependencies.
    pub targets: Vec<String>,
    pub only_required: bool,
    pub generate_compile_commands: bool,
    pub show_commands: bool,
    pub keep_going: bool,
    pub save_user_toolchain_globally: bool,
    pub strategy: Option<String>,
    /// Wipe the configuration build directory first (`rebuild`).
    pub from_scratch: bool,
}

impl BuildOptions {
    pub fn configuration_name(&self) -> &str {
        self.configuration.as_deref().unwrap_or("Release")
    }
}

/// Run a full build. Returns when every requested target is up to date or
/// an error surfaced.
pub fn execute(options: &BuildOptions) -> Result<()> {
    // The env file must land before toolchain resolution; vendor paths may
    // come from it.
    if let Some(envfile) = &options.envfile {
        let delta = env_script::read_env_file(envfile)?;
        env_script::apply_to_process(&delta);
    }

    let build_file = options
        .input_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_FILE));

    let workspace = BuildFileLoader::new(&build_file, options.configuration_name())
        .target_arch(options.arch.as_deref())
        .load()?;
    let configuration = workspace
        .configuration(options.configuration_name())
        .expect("loader validated the configuration")
        .clone();

    // Dependency order, optionally restricted to the requested targets
    // plus everything they link. Validated before any tool probing so a
    // typo'd target name fails fast.
    let ordered = workspace.targets_in_build_order()?;
    let selected = select_targets(&workspace, &ordered, &options.targets)?;

    let state_dir = workspace.state_dir();
    let mut workspace_cache = WorkspaceCache::load(&state_dir.join("workspace_cache.json"));

    let toolchain = resolve_cached_toolchain(options, &workspace, &mut workspace_cache)?;

    let strategy_kind = select_strategy(options, &workspace_cache)?;
    strategy_kind.validate(&toolchain)?;

    let style = BuildPathStyle::default();
    let outputs_builder = OutputsBuilder::new(&workspace, &toolchain, &configuration, style);
    let build_dir = outputs_builder.build_dir();

    // A strategy switch means generated build files and pool-tracked state
    // can disagree; the build directory starts over.
    let strategy_changed = !workspace_cache.settings.strategy.is_empty()
        && workspace_cache.settings.strategy != strategy_kind.as_str();
    if options.from_scratch || strategy_changed {
        remove_dir_all_if_exists(&build_dir)?;
    }
    workspace_cache.settings.strategy = strategy_kind.as_str().to_string();
    workspace_cache.set(keys::BUILD_PATH_STYLE, "configuration");
    workspace_cache.set(keys::LAST_CONFIGURATION, &configuration.name);
    workspace_cache.set(keys::TARGET_TRIPLE, &workspace.target_arch.triple);
    workspace_cache.set(keys::APP_VERSION, env!("CARGO_PKG_VERSION"));

    // Source cache is per build-dir segment; a different configuration or
    // arch gets its own.
    let segment = style.segment(&configuration.name, &workspace, &toolchain);
    let source_cache_path = state_dir.join("cache").join(format!("{}.json", segment));
    let mut source_cache = if options.from_scratch {
        SourceCache::default()
    } else {
        SourceCache::load(&source_cache_path)
    };
    source_cache.set_identity(&toolchain.identity_hash(), &workspace.workspace_hash());
    workspace_cache.set(keys::WORKSPACE_HASH, workspace.workspace_hash());
    workspace_cache.set(keys::TOOLCHAIN_HASH, toolchain.identity_hash());

    let max_jobs = options.jobs.unwrap_or_else(default_max_jobs).max(1);
    let ctx = StrategyContext {
        workspace: &workspace,
        configuration: &configuration,
        toolchain: &toolchain,
        style,
        max_jobs,
        show_commands: options.show_commands,
        keep_going: options.keep_going,
        generate_compile_commands: options.generate_compile_commands,
    };

    let mut session = BuildSession {
        source_cache,
        compile_commands: CompileCommandsGenerator::new(),
        pool: CommandPool::new(max_jobs),
    };

    let mut strategy = make_strategy(strategy_kind);
    strategy.initialize(&ctx)?;

    for target in &selected {
        if let Target::Source(source) = target {
            let outputs = outputs_builder.assemble(source)?;
            let plan =
                TargetBuildPlan::new(&workspace, source, &configuration, &toolchain, outputs)?;
            strategy.add_target(PlannedTarget {
                target: source.clone(),
                plan,
            })?;
        }
    }
    strategy.pre_build(&ctx)?;

    let result = drive_targets(&ctx, &mut strategy, &selected, &mut session, &source_cache_path);

    strategy.post_build(&ctx, &mut session)?;
    session.source_cache.save(&source_cache_path)?;
    if options.generate_compile_commands && !session.compile_commands.is_empty() {
        session.compile_commands.save(&build_dir)?;
    }
    workspace_cache.save(&state_dir.join("workspace_cache.json"))?;

    result
}

/// Build every selected target in order, flushing the source cache after
/// each one so an interrupt never leaves stale success records.
fn drive_targets(
    ctx: &StrategyContext,
    strategy: &mut Box<dyn crate::strategy::BuildStrategy>,
    selected: &[&Target],
    session: &mut BuildSession,
    source_cache_path: &std::path::Path,
) -> Result<()> {
    for target in selected {
        let outcome = match target {
            Target::Source(source) => strategy.build_target(ctx, &source.name, session),
            Target::CMake(cmake) => CMakeDriver::new(ctx, cmake).build(session),
            Target::SubProject(sub) => SubProjectDriver::new(ctx, sub).build(session),
            Target::Script(script) => ScriptRunner::new(ctx, script).run(session),
        };

        session.source_cache.save(source_cache_path)?;
        outcome.with_context(|| format!("target `{}` failed", target.name()))?;
        tracing::debug!("target `{}` complete", target.name());
    }
    Ok(())
}

/// Restrict the ordered target list to the requested names plus their
/// transitive link dependencies.
fn select_targets<'a>(
    workspace: &Workspace,
    ordered: &[&'a Target],
    requested: &[String],
) -> Result<Vec<&'a Target>> {
    if requested.is_empty() {
        return Ok(ordered.to_vec());
    }

    let mut wanted: BTreeSet<String> = BTreeSet::new();
    let mut stack: Vec<String> = Vec::new();
    for name in requested {
        if workspace.target(name).is_none() {
            bail!(
                "unknown target `{}`\navailable targets: {}",
                name,
                workspace
                    .targets
                    .iter()
                    .map(|t| t.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        stack.push(name.clone());
    }
    while let Some(name) = stack.pop() {
        if !wanted.insert(name.clone()) {
            continue;
        }
        for dep in workspace.link_dependencies(&name) {
            stack.push(dep.to_string());
        }
    }

    Ok(ordered
        .iter()
        .copied()
        .filter(|t| wanted.contains(t.name()))
        .collect())
}

/// Pick the strategy: CLI flag, then sticky setting, then native.
fn select_strategy(options: &BuildOptions, cache: &WorkspaceCache) -> Result<StrategyKind> {
    let spelled = options
        .strategy
        .as_deref()
        .or(if cache.settings.strategy.is_empty() {
            None
        } else {
            Some(cache.settings.strategy.as_str())
        });

    match spelled {
        None => Ok(StrategyKind::Native),
        Some(text) => StrategyKind::parse(text)
            .ok_or_else(|| anyhow!("unknown strategy `{}` (native, makefile, ninja)", text)),
    }
}

/// Resolve the toolchain, going through the per-project cache (and the
/// per-user global cache) before probing compilers.
fn resolve_cached_toolchain(
    options: &BuildOptions,
    workspace: &Workspace,
    _workspace_cache: &mut WorkspaceCache,
) -> Result<ResolvedToolchain> {
    let mut preference = ToolchainPreference::host_default();
    if let Some(name) = &options.toolchain {
        preference.name = name.clone();
        // A named toolchain that looks like a compiler is used directly.
        match name.as_str() {
            "gcc" => {
                preference.cpp = Some("g++".into());
                preference.cc = Some("gcc".into());
            }
            "llvm" | "clang" => {
                preference.cpp = Some("clang++".into());
                preference.cc = Some("clang".into());
                preference.archiver = Some("llvm-ar".into());
            }
            "emscripten" => {
                preference.cpp = Some("em++".into());
                preference.cc = Some("emcc".into());
                preference.archiver = Some("emar".into());
            }
            _ => {}
        }
    }

    let triple = &workspace.target_arch.triple;
    let state_dir = workspace.state_dir();
    let local_path = state_dir.join("toolchains.json");
    let mut local_cache = ToolchainCache::load(&local_path);

    // Local, then global, then probe.
    if let Some(entry) = local_cache.get(&preference.name, triple) {
        if let Some(mut resolved) = entry.to_resolved(&preference.name) {
            resolved.tools =
                discovery::find_companion_tools(resolved.family, &workspace.search_paths);
            return Ok(resolved);
        }
    }
    if let Some(global_path) = ToolchainCache::global_path() {
        let global_cache = ToolchainCache::load(&global_path);
        if let Some(entry) = global_cache.get(&preference.name, triple) {
            if let Some(mut resolved) = entry.to_resolved(&preference.name) {
                resolved.tools =
                    discovery::find_companion_tools(resolved.family, &workspace.search_paths);
                return Ok(resolved);
            }
        }
    }

    let resolved = resolve_toolchain(&preference, triple, &workspace.search_paths)?;
    tracing::info!(
        "resolved toolchain `{}`: {} {} for {}",
        preference.name,
        resolved.family,
        resolved.version,
        triple
    );

    let entry = ToolchainEntry::from_resolved(&resolved, "");
    local_cache.insert(&preference.name, entry.clone());
    local_cache.save(&local_path)?;

    if options.save_user_toolchain_globally {
        if let Some(global_path) = ToolchainCache::global_path() {
            let mut global_cache = ToolchainCache::load(&global_path);
            global_cache.insert(&preference.name, entry);
            global_cache.save(&global_path)?;
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::SourceTarget;
    use crate::core::workspace::{Arch, Platform};
    use crate::core::BuildConfiguration;

    fn workspace_with(targets: Vec<Target>) -> Workspace {
        Workspace {
            name: "test".into(),
            version: "1.0.0".into(),
            root: PathBuf::from("."),
            platform: Platform::host(),
            host_arch: Arch::host(),
            target_arch: Arch::host(),
            search_paths: Vec::new(),
            configurations: BuildConfiguration::default_set(),
            targets,
            bundles: Vec::new(),
        }
    }

    fn source(name: &str, static_links: &[&str]) -> Target {
        let mut t = SourceTarget::new(name);
        t.files = vec!["src/*.cpp".into()];
        t.static_links = static_links.iter().map(|s| s.to_string()).collect();
        Target::Source(t)
    }

    #[test]
    fn test_select_targets_pulls_link_dependencies() {
        let ws = workspace_with(vec![
            source("util", &[]),
            source("core", &["util"]),
            source("app", &["core"]),
            source("tool", &[]),
        ]);
        let ordered = ws.targets_in_build_order().unwrap();

        let selected = select_targets(&ws, &ordered, &["app".to_string()]).unwrap();
        let names: Vec<&str> = selected.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["util", "core", "app"]);
    }

    #[test]
    fn test_select_targets_rejects_unknown() {
        let ws = workspace_with(vec![source("app", &[])]);
        let ordered = ws.targets_in_build_order().unwrap();
        assert!(select_targets(&ws, &ordered, &["nope".to_string()]).is_err());
    }

    #[test]
    fn test_select_strategy_prefers_cli() {
        let mut cache = WorkspaceCache::default();
        cache.settings.strategy = "ninja".into();

        let mut options = BuildOptions::default();
        assert_eq!(
            select_strategy(&options, &cache).unwrap(),
            StrategyKind::Ninja
        );

        options.strategy = Some("native".into());
        assert_eq!(
            select_strategy(&options, &cache).unwrap(),
            StrategyKind::Native
        );

        options.strategy = Some("msbuild".into());
        assert!(select_strategy(&options, &cache).is_err());
    }

    #[test]
    fn test_default_configuration_is_release() {
        let options = BuildOptions::default();
        assert_eq!(options.configuration_name(), "Release");
    }
}
