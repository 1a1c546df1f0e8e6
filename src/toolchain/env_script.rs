//! Vendor environment capture.
//!
//! MSVC and Intel toolchains only work inside the environment their setup
//! scripts (`vcvarsall.bat`, `setvars.bat`) create. The scripts are sourced
//! exactly once, here, in a throwaway shell; the *delta* of environment
//! variables against the parent process is recorded and replayed onto every
//! child spawned for that toolchain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::error::BuildError;
use crate::util::process::ProcessBuilder;

use super::ToolchainFamily;

/// Environment variables introduced or changed by a script.
pub type EnvDelta = BTreeMap<String, String>;

/// Source `script` with `args` in a shell and capture the environment
/// variables it changed.
///
/// `PATH` is special-cased: the parent's entries are stripped from the
/// captured value so only the vendor-added directories are stored.
pub fn capture_env_delta(script: &Path, args: &[String]) -> Result<EnvDelta> {
    let baseline: BTreeMap<String, String> = std::env::vars().collect();

    let output = if cfg!(windows) {
        let command = format!("\"{}\" {} && set", script.display(), args.join(" "));
        ProcessBuilder::new("cmd").args(["/d", "/c", &command]).exec()
    } else {
        let command = format!(
            "source \"{}\" {} >/dev/null 2>&1 && printenv",
            script.display(),
            args.join(" ")
        );
        ProcessBuilder::new("bash").args(["-c", &command]).exec()
    }
    .with_context(|| format!("failed to source {}", script.display()))?;

    if !output.status.success() {
        return Err(anyhow!(BuildError::io(
            script,
            "environment script failed",
            std::io::Error::new(std::io::ErrorKind::Other, "non-zero exit"),
        )));
    }

    let mut delta = EnvDelta::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let changed = baseline
            .get(name)
            .map(|old| old != value)
            .unwrap_or(true);
        if !changed {
            continue;
        }

        if name.eq_ignore_ascii_case("PATH") {
            let stripped = strip_baseline_path(value, baseline.get(name).map(String::as_str));
            if !stripped.is_empty() {
                delta.insert(name.to_string(), stripped);
            }
        } else {
            delta.insert(name.to_string(), value.to_string());
        }
    }

    Ok(delta)
}

/// Remove the parent's PATH entries from a captured PATH, keeping only the
/// directories the script prepended or appended.
fn strip_baseline_path(captured: &str, baseline: Option<&str>) -> String {
    let separator = if cfg!(windows) { ';' } else { ':' };
    let old: Vec<&str> = baseline
        .map(|p| p.split(separator).collect())
        .unwrap_or_default();

    captured
        .split(separator)
        .filter(|entry| !entry.is_empty() && !old.contains(entry))
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

/// Locate and source the vendor environment script for a family,
/// returning the captured delta.
pub fn vendor_environment_delta(family: ToolchainFamily, target_cpu: &str) -> Result<EnvDelta> {
    let (script, args) = match family {
        ToolchainFamily::Msvc => {
            let script = find_vcvarsall().ok_or_else(|| {
                anyhow!(BuildError::ToolchainNotFound {
                    tool: "vcvarsall.bat".into(),
                })
            })?;
            let arch = match target_cpu {
                "x86" | "i686" => "x86",
                "arm64" | "aarch64" => "arm64",
                _ => "x64",
            };
            (script, vec![arch.to_string()])
        }
        ToolchainFamily::IntelClassic | ToolchainFamily::IntelLlvm => {
            let script = find_intel_setvars().ok_or_else(|| {
                anyhow!(BuildError::ToolchainNotFound {
                    tool: "setvars.bat".into(),
                })
            })?;
            (script, Vec::new())
        }
        _ => return Ok(EnvDelta::new()),
    };

    tracing::info!("sourcing vendor environment from {}", script.display());
    capture_env_delta(&script, &args)
}

fn find_vcvarsall() -> Option<PathBuf> {
    // VCINSTALLDIR/VSAPPIDDIR are set inside developer prompts; fall back
    // to the conventional installation layout.
    if let Ok(vc) = std::env::var("VCINSTALLDIR") {
        let candidate = Path::new(&vc).join("Auxiliary/Build/vcvarsall.bat");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    if let Ok(ide) = std::env::var("VSAPPIDDIR") {
        // <root>/Common7/IDE/ -> <root>/VC/Auxiliary/Build
        let candidate = Path::new(&ide).join("../../../VC/Auxiliary/Build/vcvarsall.bat");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let program_files =
        std::env::var("ProgramFiles").unwrap_or_else(|_| "C:\\Program Files".into());
    let vs_root = Path::new(&program_files).join("Microsoft Visual Studio");
    for year in ["2022", "2019"] {
        for edition in ["Enterprise", "Professional", "Community", "BuildTools"] {
            let candidate = vs_root
                .join(year)
                .join(edition)
                .join("VC/Auxiliary/Build/vcvarsall.bat");
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

fn find_intel_setvars() -> Option<PathBuf> {
    let root = std::env::var("ONEAPI_ROOT").unwrap_or_else(|_| {
        if cfg!(windows) {
            "C:\\Program Files (x86)\\Intel\\oneAPI".into()
        } else {
            "/opt/intel/oneapi".into()
        }
    });
    let name = if cfg!(windows) {
        "setvars.bat"
    } else {
        "setvars.sh"
    };
    let candidate = Path::new(&root).join(name);
    candidate.exists().then_some(candidate)
}

/// Write an env delta file: key-sorted `KEY=VALUE` lines.
pub fn write_env_file(path: &Path, delta: &EnvDelta) -> Result<()> {
    let mut contents = String::new();
    for (key, value) in delta {
        contents.push_str(key);
        contents.push('=');
        contents.push_str(value);
        contents.push('\n');
    }
    crate::util::fs::write_string(path, &contents)
}

/// Read an env delta file written by [`write_env_file`].
pub fn read_env_file(path: &Path) -> Result<EnvDelta> {
    let contents = crate::util::fs::read_to_string(path)?;
    let mut delta = EnvDelta::new();
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once('=') {
            if !key.is_empty() {
                delta.insert(key.to_string(), value.to_string());
            }
        }
    }
    Ok(delta)
}

/// Apply a delta to this process's environment.
pub fn apply_to_process(delta: &EnvDelta) {
    for (key, value) in delta {
        if key.eq_ignore_ascii_case("PATH") {
            let separator = if cfg!(windows) { ";" } else { ":" };
            let existing = std::env::var("PATH").unwrap_or_default();
            std::env::set_var("PATH", format!("{}{}{}", value, separator, existing));
        } else {
            std::env::set_var(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_strip_baseline_path() {
        let baseline = "/usr/bin:/bin";
        let captured = "/opt/vendor/bin:/usr/bin:/bin:/opt/vendor/lib";
        assert_eq!(
            strip_baseline_path(captured, Some(baseline)),
            "/opt/vendor/bin:/opt/vendor/lib"
        );
    }

    #[test]
    fn test_env_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build.env");

        let mut delta = EnvDelta::new();
        delta.insert("ZED".into(), "last".into());
        delta.insert("ALPHA".into(), "first".into());
        delta.insert("INCLUDE".into(), "C:\\vc\\include".into());

        write_env_file(&path, &delta).unwrap();

        // Keys come out sorted.
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ALPHA=first");
        assert_eq!(lines[2], "ZED=last");

        assert_eq!(read_env_file(&path).unwrap(), delta);
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_env_delta() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("vars.sh");
        std::fs::write(&script, "export SLIPWAY_PROBE_VAR=captured\n").unwrap();

        let delta = capture_env_delta(&script, &[]).unwrap();
        assert_eq!(delta.get("SLIPWAY_PROBE_VAR").map(String::as_str), Some("captured"));
        // Unchanged variables are not part of the delta.
        assert!(!delta.contains_key("HOME"));
    }
}
