//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use glob::glob;

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write file: {}", path.display()))
}

/// Write a file atomically via a sibling temp file and rename.
///
/// A build interrupted mid-write must never leave a half-written cache or
/// compile-commands database behind.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    ensure_dir(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;

    use std::io::Write;
    tmp.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;

    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Rename `from` to `to`, replacing any existing file.
pub fn rename_replace(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        ensure_dir(parent)?;
    }
    fs::rename(from, to).with_context(|| {
        format!("failed to rename {} to {}", from.display(), to.display())
    })
}

/// Find files matching glob patterns relative to a base directory.
pub fn glob_files(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();

    for pattern in patterns {
        // Make pattern absolute by joining with base
        let full_pattern = base.join(pattern);
        let pattern_str = full_pattern.to_string_lossy();

        for entry in
            glob(&pattern_str).with_context(|| format!("invalid glob pattern: {}", pattern))?
        {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        results.push(path);
                    }
                }
                Err(e) => {
                    tracing::warn!("glob error: {}", e);
                }
            }
        }
    }

    results.sort();
    results.dedup();
    Ok(results)
}

/// Whether `path` matches any of the glob patterns.
pub fn matches_any_glob(path: &Path, patterns: &[String]) -> bool {
    let text = path.to_string_lossy();
    patterns.iter().any(|p| {
        glob::Pattern::new(p)
            .map(|pat| pat.matches(&text))
            .unwrap_or(false)
    })
}

/// Canonicalize a path, but don't fail if it doesn't exist yet.
/// Returns the path as-is if canonicalization fails.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Modification time of a file, in whole seconds since the epoch.
///
/// Returns 0 when the file does not exist; a missing input is always older
/// than any recorded mtime and a missing output is always stale.
pub fn mtime_seconds(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_glob_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.cpp"), "int main() {}").unwrap();
        fs::write(src.join("util.cpp"), "void util() {}").unwrap();
        fs::write(src.join("readme.txt"), "readme").unwrap();

        let files = glob_files(tmp.path(), &["src/**/*.cpp".to_string()]).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_write_atomic_replaces() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_mtime_missing_is_zero() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(mtime_seconds(&tmp.path().join("nope")), 0);

        let path = tmp.path().join("real");
        fs::write(&path, "x").unwrap();
        assert!(mtime_seconds(&path) > 0);
    }

    #[test]
    fn test_matches_any_glob() {
        let patterns = vec!["**/*.txt".to_string(), "bin/*".to_string()];
        assert!(matches_any_glob(Path::new("docs/readme.txt"), &patterns));
        assert!(matches_any_glob(Path::new("bin/tool"), &patterns));
        assert!(!matches_any_glob(Path::new("src/main.cpp"), &patterns));
    }
}
