//! Script target runner.
//!
//! Scripts run through an interpreter resolved from the script itself: the
//! shebang line wins, then the extension decides. The interpreter is
//! looked up through tool discovery; a script with no usable interpreter
//! is a configuration error, not a silent skip.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::core::target::ScriptTarget;
use crate::pool::{Job, PoolCommand, PoolSettings};
use crate::toolchain::discovery;

use super::{pool_error_to_build_error, BuildSession, StrategyContext};

/// Interpreter candidates per extension, tried in order.
fn interpreter_candidates(extension: &str) -> &'static [&'static str] {
    match extension {
        "sh" => &["bash", "sh"],
        "py" => &["python3", "python"],
        "rb" => &["ruby"],
        "pl" => &["perl"],
        "lua" => &["lua"],
        "ps1" => &["pwsh", "powershell"],
        "bat" | "cmd" => &["cmd"],
        _ => &[],
    }
}

/// Resolve the interpreter argv prefix for a script file.
///
/// Returns the full prefix (interpreter plus any fixed flags); the script
/// path and its arguments are appended by the caller.
pub fn resolve_interpreter(script: &Path, search_paths: &[PathBuf]) -> Result<Vec<String>> {
    // A shebang names the interpreter directly.
    if let Some(shebang) = read_shebang(script) {
        let mut parts = shebang.split_whitespace().map(String::from);
        if let Some(program) = parts.next() {
            let name = Path::new(&program)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(program.clone());

            // `#!/usr/bin/env python3` form: the real interpreter is the
            // first argument.
            let (lookup, mut rest): (String, Vec<String>) = if name == "env" {
                let real = parts.next().unwrap_or_default();
                (real, parts.collect())
            } else {
                (name, parts.collect())
            };

            if let Some(path) = discovery::find_tool(&lookup, search_paths) {
                let mut argv = vec![path.display().to_string()];
                argv.append(&mut rest);
                return Ok(argv);
            }
        }
    }

    let extension = script
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    for candidate in interpreter_candidates(&extension) {
        if let Some(path) = discovery::find_tool(candidate, search_paths) {
            let mut argv = vec![path.display().to_string()];
            if *candidate == "cmd" {
                argv.push("/c".into());
            }
            return Ok(argv);
        }
    }

    Err(anyhow!(crate::error::BuildError::InterpreterUnavailable {
        script: script.to_path_buf(),
    }))
}

fn read_shebang(script: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(script).ok()?;
    let first = contents.lines().next()?;
    first.strip_prefix("#!").map(|rest| rest.trim().to_string())
}

/// Runs one script target through the pool.
pub struct ScriptRunner<'a> {
    ctx: &'a StrategyContext<'a>,
    target: &'a ScriptTarget,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(ctx: &'a StrategyContext<'a>, target: &'a ScriptTarget) -> Self {
        ScriptRunner { ctx, target }
    }

    pub fn run(&self, session: &mut BuildSession) -> Result<()> {
        let script = self.ctx.workspace.root.join(&self.target.file);
        if !script.exists() {
            return Err(anyhow!(crate::error::BuildError::io(
                &script,
                "script not found",
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            )));
        }

        let mut argv = resolve_interpreter(&script, &self.ctx.workspace.search_paths)?;
        argv.push(script.display().to_string());
        argv.extend(self.target.arguments.iter().cloned());

        let mut command = PoolCommand::new(argv, script);
        command.output = format!("script {}", self.target.name);
        command.cwd = Some(
            self.target
                .working_directory
                .as_ref()
                .map(|d| self.ctx.workspace.root.join(d))
                .unwrap_or_else(|| self.ctx.workspace.root.clone()),
        );
        command.env = self.ctx.toolchain.env_delta.clone();

        let job = Job {
            name: self.target.name.clone(),
            list: vec![command],
        };
        let settings = PoolSettings {
            color: console::Style::new().yellow(),
            show_commands: self.ctx.show_commands,
            ..Default::default()
        };

        session
            .pool
            .run(&job, &settings)
            .map_err(|e| anyhow!(pool_error_to_build_error(e, false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shebang_wins_over_extension() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task.py");
        // Shebang names sh even though the extension says python.
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();

        if cfg!(unix) {
            let argv = resolve_interpreter(&script, &[]).unwrap();
            assert!(argv[0].ends_with("sh"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_env_shebang_resolves_real_interpreter() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task");
        std::fs::write(&script, "#!/usr/bin/env sh\necho hi\n").unwrap();

        let argv = resolve_interpreter(&script, &[]).unwrap();
        assert!(argv[0].ends_with("sh"));
        assert!(!argv[0].ends_with("env"));
    }

    #[test]
    fn test_unknown_extension_without_shebang_fails() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task.xyz");
        std::fs::write(&script, "echo hi\n").unwrap();

        let err = resolve_interpreter(&script, &[]).unwrap_err();
        let build_error = err.downcast_ref::<crate::error::BuildError>().unwrap();
        assert!(matches!(
            build_error,
            crate::error::BuildError::InterpreterUnavailable { .. }
        ));
    }

    #[test]
    fn test_interpreter_candidates() {
        assert_eq!(interpreter_candidates("py"), ["python3", "python"]);
        assert_eq!(interpreter_candidates("bat"), ["cmd"]);
        assert!(interpreter_candidates("xyz").is_empty());
    }
}
