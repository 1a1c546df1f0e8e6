//! Build execution strategies.
//!
//! Three backends realize a target plan: the native pool (plans directly
//! against the command pool), a makefile emitter (GNU make, NMake or jom),
//! and a ninja emitter. All implement [`BuildStrategy`] and are driven the
//! same way: `initialize`, `add_target` per target, `pre_build`, then
//! `build_target` per target in dependency order, then `post_build`.

use anyhow::{bail, Result};

use crate::cache::SourceCache;
use crate::core::configuration::BuildConfiguration;
use crate::core::target::SourceTarget;
use crate::core::workspace::Workspace;
use crate::plan::{BuildPathStyle, CompileCommandsGenerator, TargetBuildPlan};
use crate::pool::{CommandPool, PoolError};
use crate::toolchain::{ResolvedToolchain, ToolchainFamily};

pub mod cmake;
pub mod makefile;
pub mod native;
pub mod ninja;
pub mod script;
pub mod subproject;

pub use cmake::CMakeDriver;
pub use makefile::MakefileStrategy;
pub use native::NativeStrategy;
pub use ninja::NinjaStrategy;
pub use script::ScriptRunner;
pub use subproject::SubProjectDriver;

/// Which execution backend realizes the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    #[default]
    Native,
    Makefile,
    Ninja,
}

impl StrategyKind {
    pub fn parse(value: &str) -> Option<StrategyKind> {
        match value {
            "native" => Some(StrategyKind::Native),
            "makefile" => Some(StrategyKind::Makefile),
            "ninja" => Some(StrategyKind::Ninja),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Native => "native",
            StrategyKind::Makefile => "makefile",
            StrategyKind::Ninja => "ninja",
        }
    }

    /// Check the toolchain actually carries the tools this strategy needs.
    pub fn validate(&self, toolchain: &ResolvedToolchain) -> Result<()> {
        match self {
            StrategyKind::Native => Ok(()),
            StrategyKind::Makefile => {
                if toolchain.tools.make.is_none() {
                    bail!(
                        "the makefile strategy needs {} on the path",
                        if toolchain.family == ToolchainFamily::Msvc {
                            "nmake or jom"
                        } else {
                            "make"
                        }
                    );
                }
                Ok(())
            }
            StrategyKind::Ninja => {
                if toolchain.tools.ninja.is_none() {
                    bail!("the ninja strategy needs ninja on the path");
                }
                Ok(())
            }
        }
    }
}

/// Immutable inputs shared by every strategy for one build.
pub struct StrategyContext<'a> {
    pub workspace: &'a Workspace,
    pub configuration: &'a BuildConfiguration,
    pub toolchain: &'a ResolvedToolchain,
    pub style: BuildPathStyle,
    pub max_jobs: usize,
    pub show_commands: bool,
    pub keep_going: bool,
    pub generate_compile_commands: bool,
}

/// Mutable build-wide state owned by the orchestrator.
///
/// The cache is single-writer: strategies record results here and the
/// orchestrator flushes after each target.
pub struct BuildSession {
    pub source_cache: SourceCache,
    pub compile_commands: CompileCommandsGenerator,
    pub pool: CommandPool,
}

/// A target together with its synthesized plan.
pub struct PlannedTarget {
    pub target: SourceTarget,
    pub plan: TargetBuildPlan,
}

/// One execution backend.
pub trait BuildStrategy {
    /// Prepare build directories and any generated build files' homes.
    fn initialize(&mut self, ctx: &StrategyContext) -> Result<()>;

    /// Register a target's plan. Called once per source target before
    /// `pre_build`.
    fn add_target(&mut self, planned: PlannedTarget) -> Result<()>;

    /// Emit build files (make/ninja) or finish planning (native).
    fn pre_build(&mut self, ctx: &StrategyContext) -> Result<()>;

    /// Build one previously added target.
    fn build_target(
        &mut self,
        ctx: &StrategyContext,
        name: &str,
        session: &mut BuildSession,
    ) -> Result<()>;

    /// Final work after every target built.
    fn post_build(&mut self, ctx: &StrategyContext, session: &mut BuildSession) -> Result<()>;
}

/// Instantiate the selected backend.
pub fn make_strategy(kind: StrategyKind) -> Box<dyn BuildStrategy> {
    match kind {
        StrategyKind::Native => Box::new(NativeStrategy::new()),
        StrategyKind::Makefile => Box::new(MakefileStrategy::new()),
        StrategyKind::Ninja => Box::new(NinjaStrategy::new()),
    }
}

/// Convert a pool failure into the build error taxonomy.
pub fn pool_error_to_build_error(error: PoolError, linking: bool) -> crate::error::BuildError {
    match error {
        PoolError::Aborted { signal } => crate::error::BuildError::Aborted {
            signal: crate::pool::signal::signal_name(signal).to_string(),
        },
        PoolError::BuildFailure { mut failures } => {
            let file = failures.drain(..).next().unwrap_or_default();
            if linking {
                crate::error::BuildError::LinkFailure {
                    output: file,
                    stderr: String::new(),
                }
            } else {
                crate::error::BuildError::CompileFailure {
                    file,
                    command: Vec::new(),
                    stderr: String::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{CompanionTools, Version};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn toolchain_with_tools(tools: CompanionTools) -> ResolvedToolchain {
        ResolvedToolchain {
            name: "gcc".into(),
            family: ToolchainFamily::Gcc,
            version: Version::new(12, 0, 0),
            cpp: PathBuf::from("g++"),
            cc: PathBuf::from("gcc"),
            linker: PathBuf::from("g++"),
            archiver: PathBuf::from("ar"),
            resource_compiler: None,
            rc_is_llvm: false,
            tools,
            target_triple: "x86_64-unknown-linux-gnu".into(),
            env_delta: BTreeMap::new(),
        }
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!(StrategyKind::parse("native"), Some(StrategyKind::Native));
        assert_eq!(StrategyKind::parse("ninja"), Some(StrategyKind::Ninja));
        assert_eq!(StrategyKind::parse("msbuild"), None);
    }

    #[test]
    fn test_validation_requires_backend_tool() {
        let bare = toolchain_with_tools(CompanionTools::default());
        assert!(StrategyKind::Native.validate(&bare).is_ok());
        assert!(StrategyKind::Makefile.validate(&bare).is_err());
        assert!(StrategyKind::Ninja.validate(&bare).is_err());

        let with_ninja = toolchain_with_tools(CompanionTools {
            ninja: Some(PathBuf::from("/usr/bin/ninja")),
            ..CompanionTools::default()
        });
        assert!(StrategyKind::Ninja.validate(&with_ninja).is_ok());
    }
}
