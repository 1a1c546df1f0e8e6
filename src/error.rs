//! Build error taxonomy.
//!
//! Every failure that crosses a component boundary is one of these kinds.
//! Each kind maps to a process exit code so the CLI can report a stable
//! status to calling tools and CI.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a successful build.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when a compiler or linker returned non-zero.
pub const EXIT_BUILD_FAILURE: i32 = 1;
/// Exit code for configuration or build-file errors.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// Exit code when the build was interrupted by the user.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Error raised anywhere in the build pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{}:{line}: invalid value for `{key}`: {message}", file.display())]
    Parse {
        file: PathBuf,
        line: usize,
        key: String,
        message: String,
    },

    #[error("required tool not found: {tool}")]
    ToolchainNotFound { tool: String },

    #[error("unsupported compiler family (detected macros: {tags:?})")]
    UnsupportedFamily { tags: Vec<String> },

    #[error("could not parse compiler version from `{raw}`")]
    VersionUnparseable { raw: String },

    #[error("compilation failed for {}", file.display())]
    CompileFailure {
        file: PathBuf,
        command: Vec<String>,
        stderr: String,
    },

    #[error("linking failed for {}", output.display())]
    LinkFailure { output: PathBuf, stderr: String },

    #[error("dependency scan failed for {}: {message}", file.display())]
    DependencyScanFailure { file: PathBuf, message: String },

    #[error("cycle detected between modules: {0:?}")]
    ModuleCycle(Vec<String>),

    #[error("cache file is corrupt: {}", path.display())]
    CacheCorrupt { path: PathBuf },

    #[error("{message}: {}", path.display())]
    Io {
        path: PathBuf,
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no interpreter available for script {}", script.display())]
    InterpreterUnavailable { script: PathBuf },

    #[error("aborted by {signal}")]
    Aborted { signal: String },
}

impl BuildError {
    /// The process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Parse { .. } => EXIT_CONFIG_ERROR,
            BuildError::ToolchainNotFound { .. } => EXIT_CONFIG_ERROR,
            BuildError::UnsupportedFamily { .. } => EXIT_CONFIG_ERROR,
            BuildError::VersionUnparseable { .. } => EXIT_CONFIG_ERROR,
            BuildError::CompileFailure { .. } => EXIT_BUILD_FAILURE,
            BuildError::LinkFailure { .. } => EXIT_BUILD_FAILURE,
            BuildError::DependencyScanFailure { .. } => EXIT_BUILD_FAILURE,
            BuildError::ModuleCycle(_) => EXIT_BUILD_FAILURE,
            BuildError::CacheCorrupt { .. } => EXIT_BUILD_FAILURE,
            BuildError::Io { .. } => EXIT_BUILD_FAILURE,
            BuildError::InterpreterUnavailable { .. } => EXIT_CONFIG_ERROR,
            BuildError::Aborted { .. } => EXIT_INTERRUPTED,
        }
    }

    /// Whether the build may continue after this error was reported.
    ///
    /// Only cache corruption is locally recoverable (the cache is discarded
    /// and the build proceeds from scratch).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BuildError::CacheCorrupt { .. })
    }

    /// Convenience constructor for I/O failures with the offending path.
    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            message: message.into(),
            source,
        }
    }
}

/// Map a raw child exit status to a process exit code.
///
/// Negative codes encode the terminating signal number, matching the shell
/// convention of `128 + signo` only at the outermost boundary.
pub fn exit_code_for_child(status: i32, signal: Option<i32>) -> i32 {
    match signal {
        Some(signo) => -signo,
        None => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let parse = BuildError::Parse {
            file: PathBuf::from("build.json"),
            line: 3,
            key: "configurations".into(),
            message: "unknown optimization level".into(),
        };
        assert_eq!(parse.exit_code(), EXIT_CONFIG_ERROR);

        let compile = BuildError::CompileFailure {
            file: PathBuf::from("src/main.cpp"),
            command: vec!["c++".into()],
            stderr: String::new(),
        };
        assert_eq!(compile.exit_code(), EXIT_BUILD_FAILURE);

        let aborted = BuildError::Aborted {
            signal: "SIGINT".into(),
        };
        assert_eq!(aborted.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_recoverable() {
        let corrupt = BuildError::CacheCorrupt {
            path: PathBuf::from(".slipway/cache.json"),
        };
        assert!(corrupt.is_recoverable());

        let missing = BuildError::ToolchainNotFound {
            tool: "archiver".into(),
        };
        assert!(!missing.is_recoverable());
    }

    #[test]
    fn test_child_exit_mapping() {
        assert_eq!(exit_code_for_child(0, None), 0);
        assert_eq!(exit_code_for_child(3, None), 3);
        assert_eq!(exit_code_for_child(0, Some(15)), -15);
    }
}
