//! Toolchain cache.
//!
//! Resolved toolchains are expensive to produce (macro probes, vendor
//! script sourcing), so they are persisted: per-project by default, and in
//! the per-user global file when the user asks for
//! `--save-user-toolchain-globally`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::toolchain::{CompanionTools, ResolvedToolchain, ToolchainFamily, Version};
use crate::util::fs::{read_to_string, write_atomic};

/// One persisted toolchain entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainEntry {
    #[serde(rename = "C++")]
    pub cpp: PathBuf,
    #[serde(rename = "C")]
    pub cc: PathBuf,
    pub linker: PathBuf,
    pub archiver: PathBuf,
    #[serde(rename = "windowsResource", skip_serializing_if = "Option::is_none")]
    pub windows_resource: Option<PathBuf>,
    pub family: ToolchainFamily,
    pub version: String,
    #[serde(rename = "targetTriple")]
    pub target_triple: String,
    #[serde(rename = "identityHash")]
    pub identity_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_delta: BTreeMap<String, String>,
}

impl ToolchainEntry {
    pub fn from_resolved(toolchain: &ResolvedToolchain, strategy: &str) -> Self {
        ToolchainEntry {
            cpp: toolchain.cpp.clone(),
            cc: toolchain.cc.clone(),
            linker: toolchain.linker.clone(),
            archiver: toolchain.archiver.clone(),
            windows_resource: toolchain.resource_compiler.clone(),
            family: toolchain.family,
            version: toolchain.version.to_string(),
            target_triple: toolchain.target_triple.clone(),
            identity_hash: toolchain.identity_hash(),
            strategy: strategy.to_string(),
            env_delta: toolchain.env_delta.clone(),
        }
    }

    /// Rehydrate a resolved toolchain, re-verifying that the recorded
    /// tools still exist.
    pub fn to_resolved(&self, name: &str) -> Option<ResolvedToolchain> {
        for tool in [&self.cpp, &self.cc, &self.linker, &self.archiver] {
            if !tool.exists() {
                tracing::debug!("cached tool missing: {}", tool.display());
                return None;
            }
        }

        let version = Version::parse(&self.version).ok()?;
        let rc_is_llvm = self
            .windows_resource
            .as_ref()
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("llvm-rc"))
            .unwrap_or(false);

        Some(ResolvedToolchain {
            name: name.to_string(),
            family: self.family,
            version,
            cpp: self.cpp.clone(),
            cc: self.cc.clone(),
            linker: self.linker.clone(),
            archiver: self.archiver.clone(),
            resource_compiler: self.windows_resource.clone(),
            rc_is_llvm,
            tools: CompanionTools::default(),
            target_triple: self.target_triple.clone(),
            env_delta: self.env_delta.clone(),
        })
    }
}

/// The toolchain cache file: named toolchains plus loose tool paths.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ToolchainCache {
    #[serde(default)]
    toolchains: BTreeMap<String, ToolchainEntry>,
    #[serde(default)]
    tools: BTreeMap<String, PathBuf>,
}

impl ToolchainCache {
    pub fn load(path: &Path) -> ToolchainCache {
        if !path.exists() {
            return ToolchainCache::default();
        }
        match read_to_string(path).and_then(|text| Ok(serde_json::from_str(&text)?)) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(
                    "discarding corrupt toolchain cache {}: {}",
                    path.display(),
                    e
                );
                ToolchainCache::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, &json)
    }

    /// Look up a toolchain by name for a specific target triple.
    pub fn get(&self, name: &str, target_triple: &str) -> Option<&ToolchainEntry> {
        self.toolchains
            .get(name)
            .filter(|entry| entry.target_triple == target_triple)
    }

    pub fn insert(&mut self, name: &str, entry: ToolchainEntry) {
        self.toolchains.insert(name.to_string(), entry);
    }

    /// Remembered path of a loose tool (interpreters, cmake, ...).
    pub fn tool(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path).filter(|p| p.exists())
    }

    pub fn remember_tool(&mut self, name: &str, path: PathBuf) {
        self.tools.insert(name.to_string(), path);
    }

    /// The per-user global cache location.
    pub fn global_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".slipway/toolchains.json"))
    }
}
