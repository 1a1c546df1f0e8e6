//! Command implementations: translate CLI arguments into ops calls.

pub mod build;
pub mod bundle;
pub mod clean;
pub mod configure;
pub mod export;
pub mod init;
pub mod run;
pub mod settings;

use crate::cli::Cli;
use slipway::ops::BuildOptions;

/// Assemble the build options shared by most verbs from the global flags.
pub fn build_options(cli: &Cli) -> BuildOptions {
    BuildOptions {
        configuration: cli.configuration.clone(),
        arch: cli.arch.clone(),
        toolchain: cli.toolchain.clone(),
        jobs: cli.jobs,
        input_file: cli.input_file.clone(),
        envfile: cli.envfile.clone(),
        targets: Vec::new(),
        only_required: cli.only_required,
        generate_compile_commands: cli.generate_compile_commands,
        show_commands: cli.show_commands,
        keep_going: cli.keep_going,
        save_user_toolchain_globally: cli.save_user_toolchain_globally,
        strategy: None,
        from_scratch: false,
    }
}
