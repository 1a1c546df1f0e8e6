//! `slipway build` / `slipway rebuild`.

use anyhow::Result;

use crate::cli::{Cli, Commands};
use slipway::error::EXIT_SUCCESS;
use slipway::ops;

pub fn execute(cli: &Cli, from_scratch: bool) -> Result<i32> {
    let args = match &cli.command {
        Commands::Build(args) | Commands::Rebuild(args) => args,
        _ => unreachable!("routed by main"),
    };

    let mut options = super::build_options(cli);
    options.from_scratch = from_scratch;
    if args.configuration.is_some() {
        options.configuration = args.configuration.clone();
    }
    options.targets = args.targets.clone();

    ops::build::execute(&options)?;
    Ok(EXIT_SUCCESS)
}
