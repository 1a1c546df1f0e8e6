//! Implementation of `slipway init`.
//!
//! Writes a minimal starter workspace into the current directory. Larger
//! template sets are the business of external scaffolding tools; this just
//! gets a hello-world building.

use std::path::Path;

use anyhow::{bail, Result};

use crate::core::DEFAULT_BUILD_FILE;
use crate::util::fs::write_string;

const STARTER_BUILD_FILE: &str = r#"{
	"workspace": "{name}",
	"version": "0.1.0",
	"targets": {
		"{name}": {
			"kind": "executable",
			"language": "C++",
			"languageStandard": "c++17",
			"files": ["src/**/*.cpp"],
			"warnings": "pedantic"
		}
	}
}
"#;

const STARTER_MAIN: &str = r#"#include <iostream>

int main()
{
	std::cout << "Hello from {name}!" << std::endl;
	return 0;
}
"#;

/// Create a starter workspace in `directory` named after it.
pub fn execute(directory: &Path) -> Result<()> {
    let build_file = directory.join(DEFAULT_BUILD_FILE);
    if build_file.exists() {
        bail!("{} already exists", build_file.display());
    }

    let name = directory
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "project".to_string());

    write_string(&build_file, &STARTER_BUILD_FILE.replace("{name}", &name))?;
    let main = directory.join("src/main.cpp");
    if !main.exists() {
        write_string(&main, &STARTER_MAIN.replace("{name}", &name))?;
    }

    println!("created {}", build_file.display());
    println!("build with: slipway build");
    Ok(())
}
