//! Dependency-file handling.
//!
//! GNU-style compilers emit make-syntax `.d` files (`obj: src hdr hdr ...`
//! with backslash continuations and `$`-escaped spaces). MSVC instead
//! prints `Note: including file: <path>` lines on stdout; the command pool
//! extracts those and this module writes them into a `.d` file of one
//! header per line, so the cache layer reads a single format downstream.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::error::BuildError;

/// The marker MSVC prints before each included file.
pub const MSVC_INCLUDE_NOTE: &str = "Note: including file:";

/// Parse a compiler-emitted dependency file into the list of headers the
/// TU read.
///
/// Both the make-syntax form and the line-per-path form written by
/// [`write_dep_lines`] are accepted.
pub fn parse_dep_file(path: &Path) -> Result<Vec<PathBuf>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow!(BuildError::io(path, "failed to read dependency file", e)))?;
    Ok(parse_dep_text(&contents))
}

/// Parse dependency text in either supported format.
pub fn parse_dep_text(contents: &str) -> Vec<PathBuf> {
    if contents.contains(':') && looks_like_make_rule(contents) {
        parse_make_rule(contents)
    } else {
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

fn looks_like_make_rule(contents: &str) -> bool {
    // A make rule has `target: prerequisites`; a colon inside a Windows
    // drive prefix (`C:\...`) at line start does not count.
    contents.lines().next().is_some_and(|first| {
        match first.find(':') {
            Some(1) if first.as_bytes().get(2) == Some(&b'\\') => false,
            Some(_) => true,
            None => false,
        }
    })
}

/// Parse a make-syntax dependency rule, handling `\` line continuations
/// and `\ `-escaped spaces in paths.
fn parse_make_rule(contents: &str) -> Vec<PathBuf> {
    let mut merged = String::with_capacity(contents.len());
    for line in contents.lines() {
        let line = line.strip_suffix('\\').unwrap_or(line);
        merged.push_str(line);
        merged.push(' ');
    }

    // Skip everything up to the first unescaped colon (the rule target).
    let after_target = match find_rule_colon(&merged) {
        Some(i) => &merged[i + 1..],
        None => &merged[..],
    };

    let mut deps = Vec::new();
    let mut current = String::new();
    let mut chars = after_target.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                current.push(' ');
                chars.next();
            }
            ' ' | '\t' => {
                if !current.is_empty() {
                    deps.push(PathBuf::from(std::mem::take(&mut current)));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        deps.push(PathBuf::from(current));
    }

    deps.dedup();
    deps
}

/// Find the colon ending the rule target, skipping drive-letter colons.
fn find_rule_colon(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b':' {
            continue;
        }
        // `X:\` or `X:/` is a drive prefix, not a rule separator.
        let is_drive = i >= 1
            && bytes[i - 1].is_ascii_alphabetic()
            && matches!(bytes.get(i + 1), Some(b'\\') | Some(b'/'))
            && (i == 1 || bytes[i - 2] == b' ');
        if !is_drive {
            return Some(i);
        }
    }
    None
}

/// Extract the include path from one line of MSVC `/showIncludes` output,
/// if it is a dependency note.
pub fn parse_msvc_include_line(line: &str) -> Option<PathBuf> {
    let rest = line.strip_prefix(MSVC_INCLUDE_NOTE)?;
    let path = rest.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Write a line-per-path dependency file.
pub fn write_dep_lines(path: &Path, deps: &[PathBuf]) -> Result<()> {
    let mut contents = String::new();
    for dep in deps {
        contents.push_str(&dep.to_string_lossy());
        contents.push('\n');
    }
    crate::util::fs::write_string(path, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_make_rule() {
        let text = "obj/main.o: src/main.cpp \\\n  include/app.hpp \\\n  include/util.hpp\n";
        let deps = parse_dep_text(text);
        assert_eq!(
            deps,
            [
                PathBuf::from("src/main.cpp"),
                PathBuf::from("include/app.hpp"),
                PathBuf::from("include/util.hpp"),
            ]
        );
    }

    #[test]
    fn test_parse_make_rule_with_escaped_spaces() {
        let text = "obj/a.o: src/has\\ space.hpp src/plain.hpp\n";
        let deps = parse_dep_text(text);
        assert_eq!(
            deps,
            [
                PathBuf::from("src/has space.hpp"),
                PathBuf::from("src/plain.hpp"),
            ]
        );
    }

    #[test]
    fn test_parse_line_format() {
        let text = "C:\\vc\\include\\vector\nsrc/app.hpp\n\n";
        let deps = parse_dep_text(text);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1], PathBuf::from("src/app.hpp"));
    }

    #[test]
    fn test_parse_msvc_include_line() {
        assert_eq!(
            parse_msvc_include_line("Note: including file:   C:\\vc\\include\\vector"),
            Some(PathBuf::from("C:\\vc\\include\\vector"))
        );
        assert_eq!(parse_msvc_include_line("main.cpp"), None);
        assert_eq!(parse_msvc_include_line("Note: including file:"), None);
    }

    #[test]
    fn test_write_then_parse_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("main.cpp.d");

        let deps = vec![PathBuf::from("a.hpp"), PathBuf::from("b/c.hpp")];
        write_dep_lines(&path, &deps).unwrap();
        assert_eq!(parse_dep_file(&path).unwrap(), deps);
    }
}
