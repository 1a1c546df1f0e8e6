//! Distribution bundle descriptors.
//!
//! Bundling itself (app folders, installers, disk images) is carried out by
//! platform packagers outside the build core; the core only collects the
//! requested artifacts into the distribution directory per this descriptor.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Linux bundle surface: a `.desktop` entry plus icon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinuxBundle {
    pub desktop_entry: Option<PathBuf>,
    pub icon: Option<PathBuf>,
}

/// macOS bundle surface: `Info.plist`, optional universal binary and DMG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacosBundle {
    pub info_plist: Option<PathBuf>,
    pub universal_binary: bool,
    pub make_dmg: bool,
    pub icon: Option<PathBuf>,
}

/// Windows bundle surface: NSIS installer script plus icon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowsBundle {
    pub nsis_script: Option<PathBuf>,
    pub icon: Option<PathBuf>,
}

/// A distribution bundle: which build targets to collect and how to wrap
/// them per platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleTarget {
    pub name: String,

    /// Build configuration the bundle is taken from.
    pub configuration: Option<String>,

    /// Names of build targets whose artifacts are included.
    pub build_targets: Vec<String>,

    /// Extra files to copy in, as globs relative to the workspace root.
    pub include: Vec<String>,

    /// Globs excluded from `include`.
    pub exclude: Vec<String>,

    /// The executable a launcher should start.
    pub main_executable: Option<String>,

    pub linux: LinuxBundle,
    pub macos: MacosBundle,
    pub windows: WindowsBundle,
}

impl BundleTarget {
    /// The executable name a launcher should start, defaulting to the first
    /// included build target.
    pub fn main_executable_name(&self) -> Option<&str> {
        self.main_executable
            .as_deref()
            .or_else(|| self.build_targets.first().map(|s| s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_executable_defaults_to_first_target() {
        let mut bundle = BundleTarget {
            name: "dist".into(),
            build_targets: vec!["app".into(), "helper".into()],
            ..Default::default()
        };
        assert_eq!(bundle.main_executable_name(), Some("app"));

        bundle.main_executable = Some("helper".into());
        assert_eq!(bundle.main_executable_name(), Some("helper"));
    }
}
