//! C++20 module build planning.
//!
//! For a modules-enabled target the native strategy first scans every TU
//! (§ scan), then builds the inter-TU DAG (§ graph), and finally compiles
//! in topological batches: header units first, then each module level,
//! implementation units and plain TUs last.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::compile::ModuleReferences;
use crate::error::BuildError;
use crate::util::hash::sha256_str;

pub mod graph;
pub mod scan;

pub use graph::ModuleGraph;
pub use scan::{parse_scan_output, ModuleScan};

/// Module names provided by the toolchain, importable without a provider
/// in the workspace.
pub const SYSTEM_MODULES: &[&str] = &["std", "std.compat"];

/// A header unit to compile to a BMI before any importer runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderUnit {
    pub header: PathBuf,
    pub bmi: PathBuf,
    /// Whether the header came from outside the workspace (a system
    /// header). Without a toolchain system-module index it is still built
    /// as a user header unit.
    pub system: bool,
}

/// The complete module schedule for one target.
pub struct ModulePlan {
    pub scans: Vec<ModuleScan>,

    /// Batches of indices into `scans`; batch N+1 depends only on batches
    /// 0..=N. Within a batch, jobs run in parallel.
    pub batches: Vec<Vec<usize>>,

    /// Header units, compiled before the first batch.
    pub header_units: Vec<HeaderUnit>,

    graph: ModuleGraph,
    bmi_of_module: BTreeMap<String, PathBuf>,
    bmi_of_header: BTreeMap<PathBuf, PathBuf>,
}

impl ModulePlan {
    /// Assemble the plan from per-TU scans.
    ///
    /// `bmi_dir`/`bmi_extension` come from the target's derived output
    /// paths; `workspace_root` decides which header units count as system
    /// headers.
    pub fn new(
        scans: Vec<ModuleScan>,
        bmi_dir: &Path,
        bmi_extension: &str,
        workspace_root: &Path,
    ) -> Result<Self> {
        let graph = ModuleGraph::build(&scans)?;
        let batches = graph.batches();

        let mut bmi_of_module = BTreeMap::new();
        for scan in &scans {
            if let (Some(name), true) = (&scan.provides, scan.is_interface) {
                bmi_of_module.insert(
                    name.clone(),
                    bmi_dir.join(format!("{}.{}", name, bmi_extension)),
                );
            }
        }

        let mut bmi_of_header = BTreeMap::new();
        let mut header_units = Vec::new();
        for scan in &scans {
            for header in &scan.header_units {
                if bmi_of_header.contains_key(header) {
                    continue;
                }
                let stem = header
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "header".into());
                // Same-named headers from different directories must not
                // collide on a BMI path.
                let tag = &sha256_str(&header.to_string_lossy())[..8];
                let bmi = bmi_dir.join(format!("{}-{}.{}", stem, tag, bmi_extension));

                bmi_of_header.insert(header.clone(), bmi.clone());
                header_units.push(HeaderUnit {
                    header: header.clone(),
                    bmi,
                    system: !header.starts_with(workspace_root),
                });
            }
        }

        Ok(ModulePlan {
            scans,
            batches,
            header_units,
            graph,
            bmi_of_module,
            bmi_of_header,
        })
    }

    /// BMI path of the module a TU provides, if it is an interface unit.
    pub fn bmi_for_tu(&self, index: usize) -> Option<&PathBuf> {
        let scan = self.scans.get(index)?;
        if !scan.is_interface {
            return None;
        }
        scan.provides
            .as_ref()
            .and_then(|name| self.bmi_of_module.get(name))
    }

    /// The BMI references a TU's compile needs: every named import mapped
    /// to its provider's BMI, every imported header unit mapped to its BMI.
    ///
    /// Imports of toolchain-provided modules pass through without a
    /// reference; an import nothing provides is an error.
    pub fn references_for(&self, index: usize) -> Result<ModuleReferences> {
        let scan = &self.scans[index];
        let mut refs = ModuleReferences::default();

        for import in &scan.imports {
            match self.bmi_of_module.get(import) {
                Some(bmi) => refs.modules.push((import.clone(), bmi.clone())),
                None if SYSTEM_MODULES.contains(&import.as_str()) => {}
                None => {
                    return Err(anyhow!(BuildError::DependencyScanFailure {
                        file: scan.source.clone(),
                        message: format!("imported module `{}` has no provider", import),
                    }));
                }
            }
        }

        for header in &scan.header_units {
            if let Some(bmi) = self.bmi_of_header.get(header) {
                refs.header_units.push(bmi.clone());
            }
        }

        Ok(refs)
    }

    /// TU indices invalidated when `changed` TUs are stale (transitive
    /// importers; computed once per build).
    pub fn invalidated_by(&self, changed: &[usize]) -> std::collections::BTreeSet<usize> {
        self.graph.invalidated_by(changed)
    }
}
