//! `slipway run` / `slipway buildrun`.

use anyhow::Result;

use crate::cli::{Cli, Commands};
use slipway::ops::{self, RunOptions};

pub fn execute(cli: &Cli, build_first: bool) -> Result<i32> {
    let args = match &cli.command {
        Commands::Run(args) | Commands::Buildrun(args) => args,
        _ => unreachable!("routed by main"),
    };

    let options = RunOptions {
        build: super::build_options(cli),
        target: args.target.clone(),
        arguments: args.arguments.clone(),
        build_first,
    };

    ops::run::execute(&options)
}
