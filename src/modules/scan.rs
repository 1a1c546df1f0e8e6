//! Module dependency scan parsing.
//!
//! GCC and Clang emit P1689 JSON (`-fdeps-format=p1689r5`); MSVC emits its
//! own JSON via `/scanDependencies`. Both reduce to the same per-TU facts:
//! which module the TU provides (if any), which named modules it imports,
//! and which header units it imports.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::error::BuildError;

/// One translation unit's module declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleScan {
    pub source: PathBuf,

    /// Module this TU provides, when it is an interface or implementation
    /// unit.
    pub provides: Option<String>,

    /// Whether the provided module is an *interface* unit (`export module`)
    /// rather than an implementation unit (`module`).
    pub is_interface: bool,

    pub imports: BTreeSet<String>,
    pub header_units: BTreeSet<PathBuf>,
}

impl ModuleScan {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        ModuleScan {
            source: source.into(),
            ..Default::default()
        }
    }
}

/// Parse a scan output, sniffing the format.
pub fn parse_scan_output(source: &Path, text: &str) -> Result<ModuleScan> {
    let json: Value = serde_json::from_str(text).map_err(|e| {
        anyhow!(BuildError::DependencyScanFailure {
            file: source.to_path_buf(),
            message: format!("scan output is not valid JSON: {}", e),
        })
    })?;

    if json.get("rules").is_some() {
        parse_p1689(source, &json)
    } else if json.get("Data").is_some() {
        parse_msvc_scan(source, &json)
    } else {
        Err(anyhow!(BuildError::DependencyScanFailure {
            file: source.to_path_buf(),
            message: "unrecognized scan format".into(),
        }))
    }
}

/// Parse P1689 dependency format (GCC, Clang).
pub fn parse_p1689(source: &Path, json: &Value) -> Result<ModuleScan> {
    let mut scan = ModuleScan::new(source);

    let rules = json
        .get("rules")
        .and_then(Value::as_array)
        .ok_or_else(|| scan_error(source, "missing rules array"))?;

    for rule in rules {
        for provide in rule
            .get("provides")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(name) = provide.get("logical-name").and_then(Value::as_str) {
                scan.provides = Some(name.to_string());
                scan.is_interface = provide
                    .get("is-interface")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
            }
        }

        for require in rule
            .get("requires")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(name) = require.get("logical-name").and_then(Value::as_str) else {
                continue;
            };
            let lookup = require
                .get("lookup-method")
                .and_then(Value::as_str)
                .unwrap_or("by-name");

            if lookup == "by-name" {
                scan.imports.insert(name.to_string());
            } else {
                // include-angle / include-quote: a header unit. Prefer the
                // resolved source path when the scanner provides one.
                let path = require
                    .get("source-path")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| name.trim_matches(|c| c == '<' || c == '>' || c == '"'));
                scan.header_units.insert(PathBuf::from(path));
            }
        }
    }

    Ok(scan)
}

/// Parse MSVC `/scanDependencies` output.
pub fn parse_msvc_scan(source: &Path, json: &Value) -> Result<ModuleScan> {
    let mut scan = ModuleScan::new(source);

    let data = json
        .get("Data")
        .ok_or_else(|| scan_error(source, "missing Data object"))?;

    if let Some(provided) = data.get("ProvidedModule").and_then(Value::as_str) {
        if !provided.is_empty() {
            scan.provides = Some(provided.to_string());
            scan.is_interface = true;
        }
    }

    for import in data
        .get("ImportedModules")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(name) = import.as_str() {
            scan.imports.insert(name.to_string());
        }
    }

    for unit in data
        .get("ImportedHeaderUnits")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let path = unit
            .get("Header")
            .and_then(Value::as_str)
            .or_else(|| unit.as_str());
        if let Some(path) = path {
            scan.header_units.insert(PathBuf::from(path));
        }
    }

    Ok(scan)
}

fn scan_error(source: &Path, message: &str) -> anyhow::Error {
    anyhow!(BuildError::DependencyScanFailure {
        file: source.to_path_buf(),
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_p1689_interface() {
        let json = r#"{
            "version": 1,
            "rules": [{
                "primary-output": "obj/m_a.cpp.o",
                "provides": [{"logical-name": "a", "is-interface": true}],
                "requires": []
            }]
        }"#;

        let scan = parse_scan_output(Path::new("m_a.cpp"), json).unwrap();
        assert_eq!(scan.provides.as_deref(), Some("a"));
        assert!(scan.is_interface);
        assert!(scan.imports.is_empty());
    }

    #[test]
    fn test_parse_p1689_imports_and_header_units() {
        let json = r#"{
            "version": 1,
            "rules": [{
                "provides": [{"logical-name": "b", "is-interface": true}],
                "requires": [
                    {"logical-name": "a"},
                    {"logical-name": "<vector>", "lookup-method": "include-angle",
                     "source-path": "/usr/include/c++/12/vector"}
                ]
            }]
        }"#;

        let scan = parse_scan_output(Path::new("m_b.cpp"), json).unwrap();
        assert_eq!(scan.provides.as_deref(), Some("b"));
        assert!(scan.imports.contains("a"));
        assert_eq!(
            scan.header_units.iter().next().unwrap(),
            Path::new("/usr/include/c++/12/vector")
        );
    }

    #[test]
    fn test_parse_p1689_implementation_unit() {
        // A module implementation unit requires its own module and provides
        // nothing.
        let json = r#"{
            "version": 1,
            "rules": [{ "requires": [{"logical-name": "a"}] }]
        }"#;

        let scan = parse_scan_output(Path::new("a_impl.cpp"), json).unwrap();
        assert_eq!(scan.provides, None);
        assert!(scan.imports.contains("a"));
    }

    #[test]
    fn test_parse_msvc_scan() {
        let json = r#"{
            "Version": "1.1",
            "Data": {
                "Source": "m_b.cpp",
                "ProvidedModule": "b",
                "ImportedModules": ["a"],
                "ImportedHeaderUnits": [{"Header": "C:\\proj\\util.hpp"}]
            }
        }"#;

        let scan = parse_scan_output(Path::new("m_b.cpp"), json).unwrap();
        assert_eq!(scan.provides.as_deref(), Some("b"));
        assert!(scan.imports.contains("a"));
        assert_eq!(scan.header_units.len(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_scan_output(Path::new("x.cpp"), "not json").is_err());
        assert!(parse_scan_output(Path::new("x.cpp"), "{}").is_err());
    }
}
