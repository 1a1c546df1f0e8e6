//! Compiler family identification.
//!
//! The compiler is identified by what it defines, not what its binary is
//! called: a no-op preprocessor run dumps the predefined macros and the
//! family is classified from the tags present. A `cc` symlink to clang, a
//! renamed cross-gcc and `icx` pretending to be clang all classify
//! correctly this way.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::error::BuildError;
use crate::util::process::ProcessBuilder;

use super::{ToolchainFamily, Version};

/// Macro dump of a compiler probe.
pub type MacroMap = BTreeMap<String, String>;

/// Identify a compiler's family and version.
///
/// GNU-style compilers answer `-dM -E`; when that fails the MSVC probe is
/// tried. A compiler that answers neither is unsupported.
pub fn identify_compiler(compiler: &Path) -> Result<(ToolchainFamily, Version)> {
    let macros = match probe_gnu(compiler) {
        Ok(macros) if !macros.is_empty() => macros,
        _ => probe_msvc(compiler)?,
    };

    let family = classify(&macros)?;
    let version = parse_version(family, &macros)?;
    Ok((family, version))
}

/// Dump predefined macros with `-dM -E` over an empty source.
pub fn probe_gnu(compiler: &Path) -> Result<MacroMap> {
    let probe = tempfile::Builder::new()
        .prefix("slipway-probe")
        .suffix(".c")
        .tempfile()?;

    let output = ProcessBuilder::new(compiler)
        .args(["-x", "c", "-dM", "-E"])
        .arg(probe.path())
        .exec()?;

    if !output.status.success() {
        return Ok(MacroMap::new());
    }

    Ok(parse_macro_dump(&String::from_utf8_lossy(&output.stdout)))
}

/// Probe `cl`-style compilers: preprocess a stub that expands the version
/// macros into plain text.
pub fn probe_msvc(compiler: &Path) -> Result<MacroMap> {
    let mut stub = tempfile::Builder::new()
        .prefix("slipway-probe")
        .suffix(".c")
        .tempfile()?;
    stub.write_all(
        b"#if defined(_MSC_VER)\n\
          PROBE _MSC_VER _MSC_FULL_VER\n\
          #endif\n",
    )?;
    stub.flush()?;

    let output = ProcessBuilder::new(compiler)
        .args(["/nologo", "/EP"])
        .arg(stub.path())
        .exec()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut macros = MacroMap::new();
    for line in stdout.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("PROBE") {
            continue;
        }
        if let Some(ver) = parts.next() {
            macros.insert("_MSC_VER".into(), ver.to_string());
        }
        if let Some(full) = parts.next() {
            macros.insert("_MSC_FULL_VER".into(), full.to_string());
        }
    }

    if macros.is_empty() {
        return Err(anyhow!(BuildError::UnsupportedFamily { tags: Vec::new() }));
    }
    Ok(macros)
}

/// Parse `#define NAME VALUE` lines into a map.
pub fn parse_macro_dump(dump: &str) -> MacroMap {
    let mut macros = MacroMap::new();
    for line in dump.lines() {
        let Some(rest) = line.strip_prefix("#define ") else {
            continue;
        };
        let mut parts = rest.splitn(2, ' ');
        if let Some(name) = parts.next() {
            // Function-like macros are irrelevant for classification.
            if name.contains('(') {
                continue;
            }
            macros.insert(
                name.to_string(),
                parts.next().unwrap_or_default().trim().to_string(),
            );
        }
    }
    macros
}

/// Classify a macro dump into a compiler family. First match wins.
pub fn classify(macros: &MacroMap) -> Result<ToolchainFamily> {
    let has = |name: &str| macros.contains_key(name);
    let mingw = has("__MINGW32__") || has("__MINGW64__");

    if has("__EMSCRIPTEN__") {
        return Ok(ToolchainFamily::Emscripten);
    }
    if has("__clang__") && has("__APPLE_CC__") {
        return Ok(ToolchainFamily::AppleClang);
    }
    if has("__clang__") && mingw {
        return Ok(ToolchainFamily::MingwClang);
    }
    if has("__clang__") {
        return Ok(ToolchainFamily::Clang);
    }
    if has("__INTEL_LLVM_COMPILER") {
        return Ok(ToolchainFamily::IntelLlvm);
    }
    if has("__INTEL_COMPILER") {
        return Ok(ToolchainFamily::IntelClassic);
    }
    if has("__GNUC__") && mingw {
        return Ok(ToolchainFamily::MingwGcc);
    }
    if has("__GNUC__") {
        return Ok(ToolchainFamily::Gcc);
    }
    if has("_MSC_VER") {
        return Ok(ToolchainFamily::Msvc);
    }

    Err(anyhow!(BuildError::UnsupportedFamily {
        tags: macros.keys().take(12).cloned().collect(),
    }))
}

/// Extract `(major, minor, patch)` from the family's version macros.
pub fn parse_version(family: ToolchainFamily, macros: &MacroMap) -> Result<Version> {
    let number = |name: &str| -> Option<u32> { macros.get(name).and_then(|v| v.parse().ok()) };
    let unparseable = || {
        anyhow!(BuildError::VersionUnparseable {
            raw: format!("{} macro dump", family),
        })
    };

    match family {
        ToolchainFamily::Gcc | ToolchainFamily::MingwGcc => Ok(Version::new(
            number("__GNUC__").ok_or_else(unparseable)?,
            number("__GNUC_MINOR__").unwrap_or(0),
            number("__GNUC_PATCHLEVEL__").unwrap_or(0),
        )),
        ToolchainFamily::Clang
        | ToolchainFamily::AppleClang
        | ToolchainFamily::MingwClang
        | ToolchainFamily::IntelLlvm => Ok(Version::new(
            number("__clang_major__").ok_or_else(unparseable)?,
            number("__clang_minor__").unwrap_or(0),
            number("__clang_patchlevel__").unwrap_or(0),
        )),
        ToolchainFamily::Emscripten => Ok(Version::new(
            number("__EMSCRIPTEN_major__").ok_or_else(unparseable)?,
            number("__EMSCRIPTEN_minor__").unwrap_or(0),
            number("__EMSCRIPTEN_tiny__").unwrap_or(0),
        )),
        ToolchainFamily::IntelClassic => {
            // 2021.x spelling: __INTEL_COMPILER=2021, update in a sibling macro.
            let major = number("__INTEL_COMPILER").ok_or_else(unparseable)?;
            Ok(Version::new(
                major,
                number("__INTEL_COMPILER_UPDATE").unwrap_or(0),
                0,
            ))
        }
        ToolchainFamily::Msvc => {
            // _MSC_VER is a four-digit number, e.g. 1938 => 19.38; the
            // trailing five digits of _MSC_FULL_VER are the patch.
            let msc_ver = number("_MSC_VER").ok_or_else(unparseable)?;
            let patch = macros
                .get("_MSC_FULL_VER")
                .filter(|full| full.len() > 5)
                .and_then(|full| full[full.len() - 5..].parse().ok())
                .unwrap_or(0);
            Ok(Version::new(msc_ver / 100, msc_ver % 100, patch))
        }
    }
}

/// Rewrite a tool path when the located binary serves the wrong
/// architecture.
///
/// MinGW installs 32- and 64-bit trees side by side (`/mingw64/bin`,
/// `/mingw32/bin`); MSVC pairs host/target directories
/// (`HostX64/x64`, `HostX64/x86`, ...). When the requested CPU does not
/// match the directory the binary sits in, the sibling directory is tried.
pub fn remap_architecture(path: &Path, target_cpu: &str) -> PathBuf {
    let text = path.to_string_lossy().replace('\\', "/");

    let remapped = match target_cpu {
        "x86" | "i686" => text
            .replace("/mingw64/", "/mingw32/")
            .replace("/HostX64/x64", "/HostX64/x86")
            .replace("/HostX86/x64", "/HostX86/x86"),
        "x86_64" | "amd64" => text
            .replace("/mingw32/", "/mingw64/")
            .replace("/HostX64/x86", "/HostX64/x64")
            .replace("/HostX86/x86", "/HostX86/x64"),
        _ => text.clone(),
    };

    if remapped != text {
        let candidate = PathBuf::from(&remapped);
        if candidate.exists() {
            return candidate;
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macros(pairs: &[(&str, &str)]) -> MacroMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_macro_dump() {
        let dump = "#define __GNUC__ 12\n\
                    #define __GNUC_MINOR__ 2\n\
                    #define __SIZE_TYPE__ long unsigned int\n\
                    #define MAX(a,b) ((a)>(b)?(a):(b))\n";
        let parsed = parse_macro_dump(dump);
        assert_eq!(parsed.get("__GNUC__").unwrap(), "12");
        assert_eq!(parsed.get("__SIZE_TYPE__").unwrap(), "long unsigned int");
        assert!(!parsed.keys().any(|k| k.contains('(')));
    }

    #[test]
    fn test_classify_gcc() {
        let m = macros(&[("__GNUC__", "12")]);
        assert_eq!(classify(&m).unwrap(), ToolchainFamily::Gcc);
    }

    #[test]
    fn test_classify_clang_over_gcc_compat_macros() {
        // Clang defines __GNUC__ for compatibility; __clang__ wins.
        let m = macros(&[("__GNUC__", "4"), ("__clang__", "1")]);
        assert_eq!(classify(&m).unwrap(), ToolchainFamily::Clang);
    }

    #[test]
    fn test_classify_apple_clang() {
        let m = macros(&[("__clang__", "1"), ("__APPLE_CC__", "6000")]);
        assert_eq!(classify(&m).unwrap(), ToolchainFamily::AppleClang);
    }

    #[test]
    fn test_classify_mingw_variants() {
        let m = macros(&[("__GNUC__", "12"), ("__MINGW64__", "1")]);
        assert_eq!(classify(&m).unwrap(), ToolchainFamily::MingwGcc);

        let m = macros(&[("__clang__", "1"), ("__MINGW32__", "1")]);
        assert_eq!(classify(&m).unwrap(), ToolchainFamily::MingwClang);
    }

    #[test]
    fn test_classify_emscripten_first() {
        // emcc defines clang macros too; emscripten is checked first.
        let m = macros(&[("__EMSCRIPTEN__", "1"), ("__clang__", "1")]);
        assert_eq!(classify(&m).unwrap(), ToolchainFamily::Emscripten);
    }

    #[test]
    fn test_classify_msvc() {
        let m = macros(&[("_MSC_VER", "1938")]);
        assert_eq!(classify(&m).unwrap(), ToolchainFamily::Msvc);
    }

    #[test]
    fn test_classify_unknown_fails() {
        let m = macros(&[("__SOMETHING_ELSE__", "1")]);
        assert!(classify(&m).is_err());
    }

    #[test]
    fn test_version_gcc() {
        let m = macros(&[
            ("__GNUC__", "12"),
            ("__GNUC_MINOR__", "2"),
            ("__GNUC_PATCHLEVEL__", "1"),
        ]);
        assert_eq!(
            parse_version(ToolchainFamily::Gcc, &m).unwrap(),
            Version::new(12, 2, 1)
        );
    }

    #[test]
    fn test_version_clang() {
        let m = macros(&[
            ("__clang_major__", "17"),
            ("__clang_minor__", "0"),
            ("__clang_patchlevel__", "6"),
        ]);
        assert_eq!(
            parse_version(ToolchainFamily::Clang, &m).unwrap(),
            Version::new(17, 0, 6)
        );
    }

    #[test]
    fn test_version_msvc() {
        let m = macros(&[("_MSC_VER", "1938"), ("_MSC_FULL_VER", "193833135")]);
        assert_eq!(
            parse_version(ToolchainFamily::Msvc, &m).unwrap(),
            Version::new(19, 38, 33135)
        );
    }

    #[test]
    fn test_version_missing_macro_fails() {
        let m = macros(&[("__clang__", "1")]);
        assert!(parse_version(ToolchainFamily::Clang, &m).is_err());
    }

    #[test]
    fn test_remap_architecture_leaves_unknown_paths() {
        let path = PathBuf::from("/usr/bin/gcc");
        assert_eq!(remap_architecture(&path, "x86_64"), path);
    }

    #[test]
    fn test_remap_architecture_requires_existing_sibling() {
        // The mingw32 sibling does not exist here, so the original path is
        // kept even though the pattern matches.
        let path = PathBuf::from("/mingw64/bin/gcc.exe");
        assert_eq!(remap_architecture(&path, "x86"), path);
    }
}
