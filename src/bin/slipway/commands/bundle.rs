//! `slipway bundle` / `slipway install`.

use anyhow::Result;

use crate::cli::{Cli, Commands};
use slipway::error::EXIT_SUCCESS;
use slipway::ops::{self, BundleOptions};

pub fn execute(cli: &Cli) -> Result<i32> {
    let args = match &cli.command {
        Commands::Bundle(args) | Commands::Install(args) => args,
        _ => unreachable!("routed by main"),
    };

    let options = BundleOptions {
        build: super::build_options(cli),
        bundles: args.bundles.clone(),
    };

    ops::bundle::execute(&options)?;
    Ok(EXIT_SUCCESS)
}
