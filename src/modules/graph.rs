//! Inter-module dependency graph.
//!
//! Nodes are translation units; an edge B -> A means "A imports B", so
//! edges point from producer to consumer and a topological order is a
//! valid compile order. Compilation is issued in *batches*: all nodes of
//! one depth level have their dependencies satisfied and may run in
//! parallel.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::BuildError;

use super::scan::ModuleScan;

/// Dependency graph over the scanned TUs of one target.
#[derive(Debug)]
pub struct ModuleGraph {
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
    /// module name -> index of the TU providing it
    providers: BTreeMap<String, usize>,
}

impl ModuleGraph {
    /// Build the graph from scan results.
    ///
    /// Imports with no provider inside the target are left to the system
    /// module handling upstream; they do not create edges here.
    pub fn build(scans: &[ModuleScan]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..scans.len()).map(|i| graph.add_node(i)).collect();

        let mut providers = BTreeMap::new();
        for (i, scan) in scans.iter().enumerate() {
            if let Some(name) = &scan.provides {
                if scan.is_interface {
                    providers.insert(name.clone(), i);
                }
            }
        }

        for (i, scan) in scans.iter().enumerate() {
            for import in &scan.imports {
                if let Some(&provider) = providers.get(import) {
                    if provider != i {
                        graph.add_edge(nodes[provider], nodes[i], ());
                    }
                }
            }
            // An implementation unit depends on its own interface.
            if !scan.is_interface {
                if let Some(name) = &scan.provides {
                    if let Some(&provider) = providers.get(name) {
                        if provider != i {
                            graph.add_edge(nodes[provider], nodes[i], ());
                        }
                    }
                }
            }
        }

        let module_graph = ModuleGraph {
            graph,
            nodes,
            providers,
        };
        module_graph.check_acyclic(scans)?;
        Ok(module_graph)
    }

    /// The TU index providing a named module, if any.
    pub fn provider_of(&self, module: &str) -> Option<usize> {
        self.providers.get(module).copied()
    }

    fn check_acyclic(&self, scans: &[ModuleScan]) -> Result<()> {
        if petgraph::algo::toposort(&self.graph, None).is_ok() {
            return Ok(());
        }

        // Name the modules on the cycle for the error report.
        let mut cycle_modules: Vec<String> = Vec::new();
        for component in petgraph::algo::tarjan_scc(&self.graph) {
            if component.len() < 2 {
                continue;
            }
            for node in component {
                let scan = &scans[self.graph[node]];
                if let Some(name) = &scan.provides {
                    if !cycle_modules.contains(name) {
                        cycle_modules.push(name.clone());
                    }
                }
            }
        }
        cycle_modules.sort();

        Err(anyhow!(BuildError::ModuleCycle(cycle_modules)))
    }

    /// Compile batches: each batch's nodes depend only on earlier batches.
    pub fn batches(&self) -> Vec<Vec<usize>> {
        let mut depth: BTreeMap<usize, usize> = BTreeMap::new();
        let order =
            petgraph::algo::toposort(&self.graph, None).expect("graph verified acyclic in build");

        let mut max_depth = 0;
        for node in order {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| depth[&self.graph[dep]] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(self.graph[node], level);
            max_depth = max_depth.max(level);
        }

        let mut batches = vec![Vec::new(); max_depth + 1];
        for (index, level) in depth {
            batches[level].push(index);
        }
        batches.iter_mut().for_each(|batch| batch.sort());
        batches
    }

    /// All TUs that transitively import any of `changed`, including the
    /// changed TUs themselves.
    ///
    /// This is the invalidation set: a touched module interface forces its
    /// own BMI and every downstream importer to rebuild.
    pub fn invalidated_by(&self, changed: &[usize]) -> BTreeSet<usize> {
        let mut invalidated = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = changed
            .iter()
            .filter_map(|&i| self.nodes.get(i).copied())
            .collect();

        while let Some(node) = stack.pop() {
            if !invalidated.insert(self.graph[node]) {
                continue;
            }
            for importer in self.graph.neighbors_directed(node, Direction::Outgoing) {
                stack.push(importer);
            }
        }

        invalidated
    }
}
