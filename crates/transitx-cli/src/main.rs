//! TransitX CLI
//!
//! Command-line interface over the TransitX engine

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use transitx_core::logging_facility;
use transitx_core::ExError;
use transitx_engine::{Engine, EngineConfig};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "transitx")]
#[command(about = "TransitX - Versioned transit datasets and snapshots", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory; overrides `data_dir` from the configuration
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Owner the submitted jobs are registered under
    #[arg(long, global = true, default_value = "cli")]
    pub owner: String,

    /// Seconds to wait for a job before giving up
    #[arg(long, global = true, default_value_t = 600)]
    pub timeout_secs: u64,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Dataset operations (import, validate, versions)
    Dataset(commands::dataset::DatasetArgs),
    /// Snapshot operations (create, list, promote, restore, obsolete)
    Snapshot(commands::snapshot::SnapshotArgs),
}

const DEFAULT_DATA_DIR: &str = ".transitx";

fn open_engine(global: &GlobalArgs) -> Result<Engine, ExError> {
    let mut config = match &global.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &global.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(PathBuf::from(DEFAULT_DATA_DIR));
    }
    logging_facility::init(config.logging_profile());
    Engine::open(config)
}

fn main() {
    let cli = Cli::parse();

    let result = open_engine(&cli.global).and_then(|engine| match cli.command {
        Commands::Dataset(args) => commands::dataset::execute(&engine, &cli.global, args),
        Commands::Snapshot(args) => commands::snapshot::execute(&engine, &cli.global, args),
    });

    if let Err(e) = result {
        tracing::error!(err_code = e.code(), "Command failed");
        eprintln!("Error [{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}
