//! Slipway CLI entry point.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use slipway::error::{BuildError, EXIT_CONFIG_ERROR};

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("slipway=debug")
    } else {
        EnvFilter::new("slipway=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Configure => commands::configure::execute(&cli),
        Commands::Build(_) => commands::build::execute(&cli, false),
        Commands::Rebuild(_) => commands::build::execute(&cli, true),
        Commands::Clean(_) => commands::clean::execute(&cli),
        Commands::Run(_) => commands::run::execute(&cli, false),
        Commands::Buildrun(_) => commands::run::execute(&cli, true),
        Commands::Bundle(_) => commands::bundle::execute(&cli),
        Commands::Install(_) => commands::bundle::execute(&cli),
        Commands::Export(_) => commands::export::execute(&cli),
        Commands::Init(_) => commands::init::execute(&cli),
        Commands::Get(_) | Commands::Set(_) | Commands::Unset(_) => {
            commands::settings::execute(&cli)
        }
    }
}

/// Map an error chain to the process exit code.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<BuildError>())
        .map(BuildError::exit_code)
        .unwrap_or(EXIT_CONFIG_ERROR)
}
