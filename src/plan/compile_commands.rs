//! `compile_commands.json` generation.
//!
//! One entry per C/C++/Objective-C translation unit, appended as targets
//! build and rewritten atomically at the end of the build so IDEs and
//! clang tooling never observe a torn file.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::util::fs::write_atomic;

/// One database entry, in the `arguments` (argv-array) form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub directory: String,
    pub file: String,
    pub arguments: Vec<String>,
}

/// Collects entries during the build and writes the database once.
#[derive(Debug, Default)]
pub struct CompileCommandsGenerator {
    entries: Vec<CompileCommand>,
}

impl CompileCommandsGenerator {
    pub fn new() -> Self {
        CompileCommandsGenerator::default()
    }

    /// Append one TU's command.
    pub fn add(&mut self, directory: &Path, file: &Path, arguments: Vec<String>) {
        self.entries.push(CompileCommand {
            directory: directory.display().to_string(),
            file: file.display().to_string(),
            arguments,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The database path under a build root.
    pub fn database_path(build_root: &Path) -> PathBuf {
        build_root.join("compile_commands.json")
    }

    /// Rewrite the database atomically.
    pub fn save(&self, build_root: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&Self::database_path(build_root), &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_one_entry_per_file() {
        let tmp = TempDir::new().unwrap();

        let mut generator = CompileCommandsGenerator::new();
        generator.add(
            tmp.path(),
            Path::new("src/main.cpp"),
            vec!["g++".into(), "-c".into(), "src/main.cpp".into()],
        );
        generator.save(tmp.path()).unwrap();

        let text =
            std::fs::read_to_string(CompileCommandsGenerator::database_path(tmp.path())).unwrap();
        let parsed: Vec<CompileCommand> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].file, "src/main.cpp");
        assert_eq!(parsed[0].arguments[0], "g++");
    }

    #[test]
    fn test_rewrite_replaces_previous_database() {
        let tmp = TempDir::new().unwrap();

        let mut first = CompileCommandsGenerator::new();
        first.add(tmp.path(), Path::new("a.cpp"), vec!["cc".into()]);
        first.add(tmp.path(), Path::new("b.cpp"), vec!["cc".into()]);
        first.save(tmp.path()).unwrap();

        let mut second = CompileCommandsGenerator::new();
        second.add(tmp.path(), Path::new("a.cpp"), vec!["cc".into()]);
        second.save(tmp.path()).unwrap();

        let text =
            std::fs::read_to_string(CompileCommandsGenerator::database_path(tmp.path())).unwrap();
        let parsed: Vec<CompileCommand> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 1);
    }
}
