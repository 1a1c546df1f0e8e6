//! `slipway configure`.

use anyhow::Result;

use crate::cli::Cli;
use slipway::error::EXIT_SUCCESS;
use slipway::ops;

pub fn execute(cli: &Cli) -> Result<i32> {
    let options = super::build_options(cli);
    ops::configure::execute(&options)?;
    Ok(EXIT_SUCCESS)
}
