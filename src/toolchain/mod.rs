//! Toolchain resolution.
//!
//! A [`ToolchainPreference`] names the tools the user wants; resolution
//! turns it into a [`ResolvedToolchain`] with concrete absolute paths, a
//! detected compiler family and version, and (on Windows) the vendor
//! environment delta applied to every child process.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::util::hash::Fingerprint;

pub mod discovery;
pub mod env_script;
pub mod identity;

pub use identity::identify_compiler;

/// Compiler family, detected from predefined preprocessor macros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolchainFamily {
    Gcc,
    Clang,
    AppleClang,
    MingwGcc,
    MingwClang,
    Msvc,
    IntelClassic,
    IntelLlvm,
    Emscripten,
}

impl ToolchainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainFamily::Gcc => "gcc",
            ToolchainFamily::Clang => "clang",
            ToolchainFamily::AppleClang => "apple-clang",
            ToolchainFamily::MingwGcc => "mingw-gcc",
            ToolchainFamily::MingwClang => "mingw-clang",
            ToolchainFamily::Msvc => "msvc",
            ToolchainFamily::IntelClassic => "intel-classic",
            ToolchainFamily::IntelLlvm => "intel-llvm",
            ToolchainFamily::Emscripten => "emscripten",
        }
    }

    /// Whether the family takes GNU-style arguments.
    pub fn is_gnu_style(&self) -> bool {
        !matches!(self, ToolchainFamily::Msvc | ToolchainFamily::IntelClassic)
    }

    /// Whether resolution must source a vendor environment script first.
    pub fn needs_vendor_environment(&self) -> bool {
        matches!(
            self,
            ToolchainFamily::Msvc | ToolchainFamily::IntelClassic | ToolchainFamily::IntelLlvm
        )
    }
}

impl fmt::Display for ToolchainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiler version as `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version, tolerating a missing patch component.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.trim().split('.');
        let mut next = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(p) => p
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| anyhow!(BuildError::VersionUnparseable { raw: raw.into() })),
                None if required => {
                    Err(anyhow!(BuildError::VersionUnparseable { raw: raw.into() }))
                }
                None => Ok(0),
            }
        };
        Ok(Version {
            major: next(true)?,
            minor: next(false)?,
            patch: next(false)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The tools the user asked for, before resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchainPreference {
    /// Toolchain name as keyed in the cache (e.g. `gcc`, `llvm`, `msvc`).
    pub name: String,

    /// C++ compiler executable name or path.
    pub cpp: Option<String>,
    /// C compiler executable name or path.
    pub cc: Option<String>,
    pub linker: Option<String>,
    pub archiver: Option<String>,
    /// Windows resource compiler.
    pub rc: Option<String>,

    /// User-forced family; detected from macros when absent.
    pub family: Option<ToolchainFamily>,

    /// Execution backend hint (`native`, `makefile`, `ninja`).
    pub strategy: Option<String>,
}

impl ToolchainPreference {
    /// A sensible default preference for the host.
    pub fn host_default() -> Self {
        if cfg!(windows) {
            ToolchainPreference {
                name: "msvc".into(),
                cpp: Some("cl".into()),
                cc: Some("cl".into()),
                linker: Some("link".into()),
                archiver: Some("lib".into()),
                rc: Some("rc".into()),
                family: None,
                strategy: None,
            }
        } else {
            ToolchainPreference {
                name: "auto".into(),
                cpp: std::env::var("CXX").ok(),
                cc: std::env::var("CC").ok(),
                linker: None,
                archiver: Some("ar".into()),
                rc: None,
                family: None,
                strategy: None,
            }
        }
    }
}

/// Versions of the companion build drivers, when found.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanionTools {
    pub make: Option<PathBuf>,
    pub make_version: Option<String>,
    /// `nmake` or `jom` stands in for make on MSVC.
    pub make_is_nmake: bool,
    pub make_is_jom: bool,

    pub ninja: Option<PathBuf>,
    pub ninja_version: Option<String>,

    pub cmake: Option<PathBuf>,
    pub cmake_version: Option<String>,
}

/// A fully resolved toolchain: concrete paths plus identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedToolchain {
    pub name: String,
    pub family: ToolchainFamily,
    pub version: Version,

    pub cpp: PathBuf,
    pub cc: PathBuf,
    pub linker: PathBuf,
    pub archiver: PathBuf,

    pub resource_compiler: Option<PathBuf>,
    /// Whether the resource compiler is `llvm-rc` (different argument form).
    pub rc_is_llvm: bool,

    pub tools: CompanionTools,

    /// Target triple this toolchain was resolved for.
    pub target_triple: String,

    /// Environment delta from the vendor setup script, applied to every
    /// child process spawned for this toolchain.
    pub env_delta: BTreeMap<String, String>,
}

impl ResolvedToolchain {
    /// Stable identity hash.
    ///
    /// Once written to the cache this must not change for the same
    /// installation; a mismatch forces a full rebuild.
    pub fn identity_hash(&self) -> String {
        let mut fp = Fingerprint::new();
        fp.update_str(self.family.as_str());
        fp.update_str(&self.version.to_string());
        fp.update_str(&self.cpp.to_string_lossy());
        fp.update_str(&self.cc.to_string_lossy());
        fp.update_str(&self.linker.to_string_lossy());
        fp.update_str(&self.archiver.to_string_lossy());
        fp.update_str(&self.target_triple);
        fp.finish_short()
    }

    /// Compiler driver for the given language.
    pub fn compiler_for(&self, cxx: bool) -> &Path {
        if cxx {
            &self.cpp
        } else {
            &self.cc
        }
    }
}

/// Resolve a preference into a concrete toolchain.
pub fn resolve_toolchain(
    preference: &ToolchainPreference,
    target_triple: &str,
    search_paths: &[PathBuf],
) -> Result<ResolvedToolchain> {
    let target_cpu = target_triple.split('-').next().unwrap_or_default();

    let locate = |requested: Option<&str>, fallbacks: &[&str], label: &str| -> Result<PathBuf> {
        let found = match requested {
            Some(name) => discovery::find_tool(name, search_paths),
            None => fallbacks
                .iter()
                .find_map(|name| discovery::find_tool(name, search_paths)),
        };
        let path = found.ok_or_else(|| {
            anyhow!(BuildError::ToolchainNotFound {
                tool: requested.unwrap_or(label).to_string(),
            })
        })?;
        Ok(identity::remap_architecture(&path, target_cpu))
    };

    let cpp = locate(preference.cpp.as_deref(), &["c++", "g++", "clang++"], "C++ compiler")?;
    let cc = locate(preference.cc.as_deref(), &["cc", "gcc", "clang"], "C compiler")?;

    // Detect the family from the compiler itself unless the user forced one.
    let (detected_family, version) = identify_compiler(&cc)?;
    let family = preference.family.unwrap_or(detected_family);

    // Vendor toolchains only work inside their scripted environment.
    let env_delta = if family.needs_vendor_environment() && cfg!(windows) {
        env_script::vendor_environment_delta(family, target_cpu)?
    } else {
        BTreeMap::new()
    };

    let linker = match family {
        ToolchainFamily::Msvc | ToolchainFamily::IntelClassic => {
            locate(preference.linker.as_deref(), &["link"], "linker")?
        }
        // GNU-style toolchains link through the compiler driver.
        _ => match preference.linker.as_deref() {
            Some(name) => locate(Some(name), &[], "linker")?,
            None => cpp.clone(),
        },
    };

    let archiver = match family {
        ToolchainFamily::Msvc | ToolchainFamily::IntelClassic => {
            locate(preference.archiver.as_deref(), &["lib"], "archiver")?
        }
        _ => locate(preference.archiver.as_deref(), &["ar", "llvm-ar"], "archiver")?,
    };

    let windows_target = target_triple.contains("windows");
    let (resource_compiler, rc_is_llvm) = if windows_target {
        let rc = locate(preference.rc.as_deref(), &["rc", "llvm-rc", "windres"], "resource compiler")?;
        let is_llvm = rc
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("llvm-rc"))
            .unwrap_or(false);
        (Some(rc), is_llvm)
    } else {
        (None, false)
    };

    let tools = discovery::find_companion_tools(family, search_paths);

    Ok(ResolvedToolchain {
        name: preference.name.clone(),
        family,
        version,
        cpp,
        cc,
        linker,
        archiver,
        resource_compiler,
        rc_is_llvm,
        tools,
        target_triple: target_triple.to_string(),
        env_delta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain() -> ResolvedToolchain {
        ResolvedToolchain {
            name: "gcc".into(),
            family: ToolchainFamily::Gcc,
            version: Version::new(12, 2, 0),
            cpp: PathBuf::from("/usr/bin/g++"),
            cc: PathBuf::from("/usr/bin/gcc"),
            linker: PathBuf::from("/usr/bin/g++"),
            archiver: PathBuf::from("/usr/bin/ar"),
            resource_compiler: None,
            rc_is_llvm: false,
            tools: CompanionTools::default(),
            target_triple: "x86_64-unknown-linux-gnu".into(),
            env_delta: BTreeMap::new(),
        }
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("12.2.0").unwrap(), Version::new(12, 2, 0));
        assert_eq!(Version::parse("14.1").unwrap(), Version::new(14, 1, 0));
        assert!(Version::parse("not-a-version").is_err());
    }

    #[test]
    fn test_identity_hash_stable_and_sensitive() {
        let a = toolchain();
        let b = toolchain();
        assert_eq!(a.identity_hash(), b.identity_hash());

        let mut c = toolchain();
        c.version = Version::new(13, 1, 0);
        assert_ne!(a.identity_hash(), c.identity_hash());

        let mut d = toolchain();
        d.target_triple = "arm64-apple-darwin".into();
        assert_ne!(a.identity_hash(), d.identity_hash());
    }

    #[test]
    fn test_family_traits() {
        assert!(ToolchainFamily::Clang.is_gnu_style());
        assert!(ToolchainFamily::MingwGcc.is_gnu_style());
        assert!(!ToolchainFamily::Msvc.is_gnu_style());
        assert!(ToolchainFamily::Msvc.needs_vendor_environment());
        assert!(ToolchainFamily::IntelLlvm.needs_vendor_environment());
        assert!(!ToolchainFamily::Gcc.needs_vendor_environment());
    }
}
