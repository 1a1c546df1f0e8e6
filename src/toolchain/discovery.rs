//! Tool discovery.
//!
//! Pure lookups: nothing here mutates the process environment. Tools are
//! searched as absolute paths first, then on `PATH`, then in the build
//! file's `searchPaths`, then in platform well-known roots.

use std::path::{Path, PathBuf};

use crate::util::process::ProcessBuilder;

use super::{CompanionTools, ToolchainFamily};

/// Find an executable on `PATH`, honoring platform executable suffixes.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Find a tool by absolute path, `PATH`, extra search paths, then
/// well-known installation roots.
pub fn find_tool(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let as_path = Path::new(name);
    if as_path.is_absolute() {
        return as_path.exists().then(|| as_path.to_path_buf());
    }

    if let Some(path) = find_on_path(name) {
        return Some(path);
    }

    for dir in search_paths.iter().map(PathBuf::as_path) {
        if let Some(path) = find_in_dir(dir, name) {
            return Some(path);
        }
    }

    for root in well_known_roots() {
        if let Some(path) = find_in_dir(&root, name) {
            return Some(path);
        }
        // Vendor roots usually keep tools one level down in bin/.
        if let Some(path) = find_in_dir(&root.join("bin"), name) {
            return Some(path);
        }
    }

    None
}

fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    let exact = dir.join(name);
    if exact.is_file() {
        return Some(exact);
    }
    if cfg!(windows) {
        for suffix in ["exe", "bat", "cmd"] {
            let candidate = dir.join(format!("{}.{}", name, suffix));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Platform installation roots consulted after `PATH`.
pub fn well_known_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if cfg!(windows) {
        let program_files =
            std::env::var("ProgramFiles").unwrap_or_else(|_| "C:\\Program Files".into());
        for sub in ["Microsoft Visual Studio", "LLVM", "Git/usr/bin"] {
            roots.push(Path::new(&program_files).join(sub));
        }
        if let Ok(oneapi) = std::env::var("ONEAPI_ROOT") {
            roots.push(PathBuf::from(oneapi));
        }
    } else if cfg!(target_os = "macos") {
        roots.push(PathBuf::from("/Library/Developer/CommandLineTools/usr/bin"));
        if let Ok(developer_dir) = std::env::var("DEVELOPER_DIR") {
            roots.push(Path::new(&developer_dir).join("usr/bin"));
        } else if let Some(xcode) = xcode_developer_dir() {
            roots.push(xcode.join("usr/bin"));
        }
        roots.push(PathBuf::from("/opt/intel/oneapi"));
    } else {
        roots.push(PathBuf::from("/opt/intel/oneapi"));
        roots.push(PathBuf::from("/usr/local/bin"));
    }

    roots
}

/// The active Xcode developer directory, per `xcode-select -p`.
fn xcode_developer_dir() -> Option<PathBuf> {
    let output = ProcessBuilder::new("xcode-select").arg("-p").exec().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Locate `make`/`ninja`/`cmake` and record their versions.
///
/// On MSVC, `nmake` (or `jom` when installed) stands in for make.
pub fn find_companion_tools(family: ToolchainFamily, search_paths: &[PathBuf]) -> CompanionTools {
    let mut tools = CompanionTools::default();

    if matches!(
        family,
        ToolchainFamily::Msvc | ToolchainFamily::IntelClassic
    ) {
        if let Some(jom) = find_tool("jom", search_paths) {
            tools.make_version = tool_version(&jom, "/VERSION");
            tools.make = Some(jom);
            tools.make_is_jom = true;
        } else if let Some(nmake) = find_tool("nmake", search_paths) {
            tools.make_version = tool_version(&nmake, "/?");
            tools.make = Some(nmake);
            tools.make_is_nmake = true;
        }
    } else if let Some(make) = find_tool("make", search_paths) {
        tools.make_version = tool_version(&make, "--version");
        tools.make = Some(make);
    }

    if let Some(ninja) = find_tool("ninja", search_paths) {
        tools.ninja_version = tool_version(&ninja, "--version");
        tools.ninja = Some(ninja);
    }

    if let Some(cmake) = find_tool("cmake", search_paths) {
        tools.cmake_version = tool_version(&cmake, "--version");
        tools.cmake = Some(cmake);
    }

    tools
}

/// Run `<tool> <flag>` and pull the first dotted version number out of the
/// output.
pub fn tool_version(path: &Path, flag: &str) -> Option<String> {
    let output = ProcessBuilder::new(path).arg(flag).exec().ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    extract_version(&text)
}

/// First `N.N[.N]` token in a blob of tool output.
pub fn extract_version(text: &str) -> Option<String> {
    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_digit());
        let mut parts = token.split('.');
        let looks_like_version = token.contains('.')
            && parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
        if looks_like_version {
            return Some(token.to_string());
        }
    }
    None
}
