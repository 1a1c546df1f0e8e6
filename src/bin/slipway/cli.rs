//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Slipway - a JSON-configured meta build system for C and C++
#[derive(Parser)]
#[command(name = "slipway")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Build configuration name
    #[arg(short = 'c', long, global = true)]
    pub configuration: Option<String>,

    /// Target architecture (triple or preset)
    #[arg(short = 'a', long, global = true)]
    pub arch: Option<String>,

    /// Toolchain name
    #[arg(short = 't', long, global = true)]
    pub toolchain: Option<String>,

    /// Number of parallel jobs
    #[arg(short = 'j', long, global = true)]
    pub jobs: Option<usize>,

    /// Environment file applied before toolchain resolution
    #[arg(long, global = true)]
    pub envfile: Option<PathBuf>,

    /// Build file path (defaults to slipway.json)
    #[arg(long, global = true)]
    pub input_file: Option<PathBuf>,

    /// Build only the requested targets and their dependencies
    #[arg(long, global = true)]
    pub only_required: bool,

    /// Write compile_commands.json at the build root
    #[arg(long, global = true)]
    pub generate_compile_commands: bool,

    /// Echo full command lines instead of output names
    #[arg(long, global = true)]
    pub show_commands: bool,

    /// Continue past the first failed command
    #[arg(long, global = true)]
    pub keep_going: bool,

    /// Also store the resolved toolchain in the per-user cache
    #[arg(long, global = true)]
    pub save_user_toolchain_globally: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and persist the toolchain without building
    Configure,

    /// Build the workspace
    Build(BuildArgs),

    /// Wipe the configuration's build directory, then build
    Rebuild(BuildArgs),

    /// Remove build artifacts
    Clean(CleanArgs),

    /// Run an executable target
    Run(RunArgs),

    /// Build, then run an executable target
    Buildrun(RunArgs),

    /// Collect distribution bundles
    Bundle(BundleArgs),

    /// Build and collect every bundle
    Install(BundleArgs),

    /// Export IDE project files
    Export(ExportArgs),

    /// Create a starter workspace in the current directory
    Init(InitArgs),

    /// Print a workspace setting
    Get(KeyArgs),

    /// Store a workspace setting
    Set(KeyValueArgs),

    /// Clear a workspace setting
    Unset(KeyArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    /// Configuration to build (overrides -c)
    pub configuration: Option<String>,

    /// Restrict the build to these targets
    pub targets: Vec<String>,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Remove every configuration's output
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Target to run (defaults to the first executable)
    pub target: Option<String>,

    /// Arguments forwarded to the program
    #[arg(last = true)]
    pub arguments: Vec<String>,
}

#[derive(Args)]
pub struct BundleArgs {
    /// Bundles to produce (defaults to all)
    pub bundles: Vec<String>,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Export kind (e.g. vscode, xcode)
    pub kind: String,
}

#[derive(Args)]
pub struct InitArgs {
    /// Directory to initialize (defaults to the current directory)
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args)]
pub struct KeyValueArgs {
    pub key: String,
    pub value: String,
}
