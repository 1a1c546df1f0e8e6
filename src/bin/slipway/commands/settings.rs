//! `slipway get` / `set` / `unset`.

use anyhow::Result;

use crate::cli::{Cli, Commands};
use slipway::error::EXIT_SUCCESS;
use slipway::ops::settings;

pub fn execute(cli: &Cli) -> Result<i32> {
    let root = std::env::current_dir()?;

    match &cli.command {
        Commands::Get(args) => settings::get(&root, &args.key)?,
        Commands::Set(args) => settings::set(&root, &args.key, &args.value)?,
        Commands::Unset(args) => settings::unset(&root, &args.key)?,
        _ => unreachable!("routed by main"),
    }

    Ok(EXIT_SUCCESS)
}
