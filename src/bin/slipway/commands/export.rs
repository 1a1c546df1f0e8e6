//! `slipway export`.
//!
//! IDE project-file generation lives in external exporter tools; the core
//! only reserves the verb and points at them.

use anyhow::{bail, Result};

use crate::cli::{Cli, Commands};

pub fn execute(cli: &Cli) -> Result<i32> {
    let args = match &cli.command {
        Commands::Export(args) => args,
        _ => unreachable!("routed by main"),
    };

    bail!(
        "no exporter for `{}` is bundled with this build; \
         install the matching slipway exporter and re-run",
        args.kind
    );
}
