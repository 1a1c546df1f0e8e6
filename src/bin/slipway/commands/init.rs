//! `slipway init`.

use anyhow::Result;

use crate::cli::{Cli, Commands};
use slipway::error::EXIT_SUCCESS;
use slipway::ops;

pub fn execute(cli: &Cli) -> Result<i32> {
    let args = match &cli.command {
        Commands::Init(args) => args,
        _ => unreachable!("routed by main"),
    };

    let directory = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    ops::init::execute(&directory)?;
    Ok(EXIT_SUCCESS)
}
