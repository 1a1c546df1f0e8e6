//! `slipway clean`.

use anyhow::Result;

use crate::cli::{Cli, Commands};
use slipway::error::EXIT_SUCCESS;
use slipway::ops::{self, CleanOptions};

pub fn execute(cli: &Cli) -> Result<i32> {
    let args = match &cli.command {
        Commands::Clean(args) => args,
        _ => unreachable!("routed by main"),
    };

    let options = CleanOptions {
        configuration: cli.configuration.clone(),
        input_file: cli.input_file.clone(),
        all: args.all,
    };

    ops::clean::execute(&options)?;
    Ok(EXIT_SUCCESS)
}
