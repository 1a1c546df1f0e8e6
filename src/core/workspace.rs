//! Workspace - the parsed, immutable build description.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use crate::core::bundle::BundleTarget;
use crate::core::configuration::BuildConfiguration;
use crate::core::target::Target;
use crate::util::hash::Fingerprint;

/// Host or target platform, as spelled in build-file condition suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
}

impl Platform {
    pub fn host() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOS,
            _ => Platform::Linux,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOS => "macos",
            Platform::Linux => "linux",
        }
    }
}

/// Target architecture in triple form, e.g. `x86_64-pc-windows-msvc` or
/// `arm64-apple-darwin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arch {
    pub triple: String,
    pub cpu: String,
}

impl Arch {
    /// Parse a `<cpu>-<vendor>-<os>[-<abi>]` triple.
    pub fn from_triple(triple: &str) -> Result<Self> {
        let cpu = match triple.split('-').next() {
            Some(cpu) if !cpu.is_empty() => cpu.to_string(),
            _ => bail!("invalid architecture triple `{}`", triple),
        };
        Ok(Arch {
            triple: triple.to_string(),
            cpu,
        })
    }

    /// The triple of the machine running the build.
    pub fn host() -> Self {
        let cpu = match std::env::consts::ARCH {
            "aarch64" => "arm64",
            other => other,
        };
        let (vendor, os) = match std::env::consts::OS {
            "macos" => ("apple", "darwin".to_string()),
            "windows" => ("pc", "windows-msvc".to_string()),
            os => ("unknown", format!("{}-gnu", os)),
        };
        Arch {
            triple: format!("{}-{}-{}", cpu, vendor, os),
            cpu: cpu.to_string(),
        }
    }
}

/// The parsed workspace: configurations, targets, bundles.
///
/// Immutable after parsing; the orchestrator and strategies only read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub version: String,

    /// Workspace root directory (where the build file lives).
    pub root: PathBuf,

    pub platform: Platform,
    pub host_arch: Arch,
    pub target_arch: Arch,

    /// Extra directories consulted by tool discovery.
    pub search_paths: Vec<PathBuf>,

    pub configurations: Vec<BuildConfiguration>,
    pub targets: Vec<Target>,
    pub bundles: Vec<BundleTarget>,
}

impl Workspace {
    /// Root for all build output.
    pub fn build_root(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Directory holding the workspace cache and other local state.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".slipway")
    }

    pub fn configuration(&self, name: &str) -> Option<&BuildConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name() == name)
    }

    /// Targets in dependency order.
    ///
    /// Static links between source targets create build edges; CMake,
    /// sub-project and script targets are atomic nodes ordered by their
    /// declaration position. Declaration order is preserved among
    /// unconnected targets.
    pub fn targets_in_build_order(&self) -> Result<Vec<&Target>> {
        let mut graph = DiGraph::<usize, ()>::new();
        let mut index_of = HashMap::new();

        for (i, target) in self.targets.iter().enumerate() {
            let node = graph.add_node(i);
            index_of.insert(target.name().to_string(), node);
        }

        for target in &self.targets {
            let Some(source) = target.as_source() else {
                continue;
            };
            let dependent = index_of[target.name()];
            for link in source.static_links.iter().chain(source.links.iter()) {
                if let Some(&dependency) = index_of.get(link.as_str()) {
                    graph.add_edge(dependency, dependent, ());
                }
            }
        }

        let order = petgraph::algo::toposort(&graph, None).map_err(|cycle| {
            let name = self.targets[graph[cycle.node_id()]].name();
            anyhow::anyhow!("dependency cycle involving target `{}`", name)
        })?;

        // toposort follows edge insertion; re-sort independent nodes back
        // into declaration order while keeping edge constraints.
        let mut positions: Vec<usize> = order.iter().map(|n| graph[*n]).collect();
        stable_levels(&graph, &mut positions);

        Ok(positions.into_iter().map(|i| &self.targets[i]).collect())
    }

    /// Names of targets that `name` links against, in declaration order.
    pub fn link_dependencies(&self, name: &str) -> Vec<&str> {
        let Some(Target::Source(source)) = self.target(name) else {
            return Vec::new();
        };
        source
            .static_links
            .iter()
            .chain(source.links.iter())
            .filter(|l| self.target(l).is_some())
            .map(|l| l.as_str())
            .collect()
    }

    /// Stable hash over the whole parsed description.
    ///
    /// Any edit to the build file changes this hash and invalidates the
    /// per-target build directories.
    pub fn workspace_hash(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let mut fp = Fingerprint::new();
        fp.update_str(&serialized);
        fp.finish_short()
    }
}

/// Order node payloads so that dependency constraints hold while untied
/// nodes keep their declaration order.
fn stable_levels(graph: &DiGraph<usize, ()>, positions: &mut [usize]) {
    use petgraph::Direction;

    let mut level = HashMap::new();
    // positions is already topologically ordered, so each node's
    // dependencies are visited first.
    for &i in positions.iter() {
        let node = graph
            .node_indices()
            .find(|n| graph[*n] == i)
            .expect("node payload present");
        let depth = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|d| level.get(&graph[d]).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        level.insert(i, depth);
    }

    positions.sort_by_key(|i| (level[i], *i));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::SourceTarget;

    fn workspace_with(targets: Vec<Target>) -> Workspace {
        Workspace {
            name: "test".into(),
            version: "1.0.0".into(),
            root: PathBuf::from("."),
            platform: Platform::host(),
            host_arch: Arch::host(),
            target_arch: Arch::host(),
            search_paths: Vec::new(),
            configurations: BuildConfiguration::default_set(),
            targets,
            bundles: Vec::new(),
        }
    }

    fn source(name: &str, static_links: &[&str]) -> Target {
        let mut t = SourceTarget::new(name);
        t.static_links = static_links.iter().map(|s| s.to_string()).collect();
        Target::Source(t)
    }

    #[test]
    fn test_arch_from_triple() {
        let arch = Arch::from_triple("x86_64-pc-windows-msvc").unwrap();
        assert_eq!(arch.cpu, "x86_64");

        assert!(Arch::from_triple("").is_err());
    }

    #[test]
    fn test_build_order_honors_static_links() {
        let ws = workspace_with(vec![
            source("app", &["core", "util"]),
            source("core", &["util"]),
            source("util", &[]),
        ]);

        let order: Vec<&str> = ws
            .targets_in_build_order()
            .unwrap()
            .iter()
            .map(|t| t.name())
            .collect();

        assert_eq!(order, ["util", "core", "app"]);
    }

    #[test]
    fn test_build_order_keeps_declaration_order_when_independent() {
        let ws = workspace_with(vec![source("b", &[]), source("a", &[]), source("c", &[])]);

        let order: Vec<&str> = ws
            .targets_in_build_order()
            .unwrap()
            .iter()
            .map(|t| t.name())
            .collect();

        assert_eq!(order, ["b", "a", "c"]);
    }

    #[test]
    fn test_build_order_detects_cycles() {
        let ws = workspace_with(vec![source("a", &["b"]), source("b", &["a"])]);
        assert!(ws.targets_in_build_order().is_err());
    }

    #[test]
    fn test_workspace_hash_changes_with_content() {
        let ws1 = workspace_with(vec![source("a", &[])]);
        let mut ws2 = workspace_with(vec![source("a", &[])]);
        assert_eq!(ws1.workspace_hash(), ws2.workspace_hash());

        ws2.version = "1.0.1".into();
        assert_ne!(ws1.workspace_hash(), ws2.workspace_hash());
    }
}
