//! Build configurations.
//!
//! A configuration is a named bundle of code-generation switches (Release,
//! Debug, Profile, ...). The stock set mirrors what most projects expect;
//! a build file may declare its own instead.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Optimization level requested by a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    /// No optimization (`-O0` / `/Od`)
    None,
    /// `-O1` / `/O1`
    L1,
    /// `-O2` / `/O2`
    L2,
    /// `-O3` / `/Ox`
    L3,
    /// Optimize for size (`-Os` / `/O1`)
    Size,
    /// Fastest, may break strict standards conformance (`-Ofast` / `/O2 /fp:fast`)
    Fast,
    /// Debug-friendly optimization (`-Og` / `/Od`)
    Debug,
}

impl OptimizationLevel {
    /// Parse the build-file spelling ("0", "1", "2", "3", "size", "fast", "debug").
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "0" => Some(OptimizationLevel::None),
            "1" => Some(OptimizationLevel::L1),
            "2" => Some(OptimizationLevel::L2),
            "3" => Some(OptimizationLevel::L3),
            "size" => Some(OptimizationLevel::Size),
            "fast" => Some(OptimizationLevel::Fast),
            "debug" => Some(OptimizationLevel::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationLevel::None => "0",
            OptimizationLevel::L1 => "1",
            OptimizationLevel::L2 => "2",
            OptimizationLevel::L3 => "3",
            OptimizationLevel::Size => "size",
            OptimizationLevel::Fast => "fast",
            OptimizationLevel::Debug => "debug",
        }
    }
}

/// A named build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    pub name: String,

    #[serde(rename = "optimizationLevel")]
    pub optimization_level: OptimizationLevel,

    #[serde(rename = "linkTimeOptimization", default)]
    pub link_time_optimization: bool,

    #[serde(rename = "stripSymbols", default)]
    pub strip_symbols: bool,

    #[serde(rename = "debugSymbols", default)]
    pub debug_symbols: bool,

    #[serde(rename = "enableProfiling", default)]
    pub enable_profiling: bool,

    #[serde(rename = "interproceduralOptimization", default)]
    pub interprocedural_optimization: bool,
}

impl BuildConfiguration {
    /// A configuration is debuggable iff it has debug symbols and no LTO.
    pub fn is_debuggable(&self) -> bool {
        self.debug_symbols && !self.link_time_optimization
    }

    /// Reject contradictory switch combinations at parse time.
    ///
    /// LTO discards the information both debuggers and profilers need, so
    /// `lto` with `debugSymbols` or `enableProfiling` is an error.
    pub fn validate(&self) -> Result<()> {
        if self.link_time_optimization && (self.debug_symbols || self.enable_profiling) {
            bail!(
                "configuration `{}` enables linkTimeOptimization together with \
                 debugSymbols or enableProfiling",
                self.name
            );
        }
        Ok(())
    }

    /// The stock configurations used when a build file declares none.
    pub fn default_set() -> Vec<BuildConfiguration> {
        vec![
            BuildConfiguration {
                name: "Release".into(),
                optimization_level: OptimizationLevel::L2,
                link_time_optimization: false,
                strip_symbols: true,
                debug_symbols: false,
                enable_profiling: false,
                interprocedural_optimization: false,
            },
            BuildConfiguration {
                name: "Debug".into(),
                optimization_level: OptimizationLevel::None,
                link_time_optimization: false,
                strip_symbols: false,
                debug_symbols: true,
                enable_profiling: false,
                interprocedural_optimization: false,
            },
            BuildConfiguration {
                name: "RelWithDebInfo".into(),
                optimization_level: OptimizationLevel::L2,
                link_time_optimization: false,
                strip_symbols: false,
                debug_symbols: true,
                enable_profiling: false,
                interprocedural_optimization: false,
            },
            BuildConfiguration {
                name: "MinSizeRel".into(),
                optimization_level: OptimizationLevel::Size,
                link_time_optimization: false,
                strip_symbols: true,
                debug_symbols: false,
                enable_profiling: false,
                interprocedural_optimization: false,
            },
            BuildConfiguration {
                name: "RelHighOpt".into(),
                optimization_level: OptimizationLevel::L3,
                link_time_optimization: true,
                strip_symbols: true,
                debug_symbols: false,
                enable_profiling: false,
                interprocedural_optimization: true,
            },
            BuildConfiguration {
                name: "Profile".into(),
                optimization_level: OptimizationLevel::None,
                link_time_optimization: false,
                strip_symbols: false,
                debug_symbols: true,
                enable_profiling: true,
                interprocedural_optimization: false,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimization_parse() {
        assert_eq!(OptimizationLevel::parse("0"), Some(OptimizationLevel::None));
        assert_eq!(OptimizationLevel::parse("2"), Some(OptimizationLevel::L2));
        assert_eq!(
            OptimizationLevel::parse("size"),
            Some(OptimizationLevel::Size)
        );
        assert_eq!(OptimizationLevel::parse("turbo"), None);
    }

    #[test]
    fn test_debuggable() {
        let debug = BuildConfiguration {
            name: "Debug".into(),
            optimization_level: OptimizationLevel::None,
            link_time_optimization: false,
            strip_symbols: false,
            debug_symbols: true,
            enable_profiling: false,
            interprocedural_optimization: false,
        };
        assert!(debug.is_debuggable());

        let lto = BuildConfiguration {
            link_time_optimization: true,
            debug_symbols: false,
            ..debug.clone()
        };
        assert!(!lto.is_debuggable());
    }

    #[test]
    fn test_lto_with_debug_symbols_rejected() {
        let bad = BuildConfiguration {
            name: "Broken".into(),
            optimization_level: OptimizationLevel::L2,
            link_time_optimization: true,
            strip_symbols: false,
            debug_symbols: true,
            enable_profiling: false,
            interprocedural_optimization: false,
        };
        assert!(bad.validate().is_err());

        let bad_profiling = BuildConfiguration {
            debug_symbols: false,
            enable_profiling: true,
            ..bad.clone()
        };
        assert!(bad_profiling.validate().is_err());
    }

    #[test]
    fn test_default_set_is_valid() {
        for config in BuildConfiguration::default_set() {
            config.validate().unwrap();
        }
    }
}
