//! Snapshot commands: create, list, promote, restore, obsolete

use clap::{Args, Subcommand};
use transitx_core::errors::ExError;
use transitx_core::model::{Snapshot, SnapshotKey, SnapshotMetadata};
use transitx_core_types::{DatasetId, Version};
use transitx_engine::commands::{CreateSnapshotJob, PromoteSnapshotJob, RestoreSnapshotJob};
use transitx_engine::{Engine, JobType};

use super::{print_json, run_job};
use crate::GlobalArgs;

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// Snapshot the head (or a given version) of a dataset
    Create(CreateArgs),
    /// List a dataset's snapshots in version order
    List(DatasetArg),
    /// Make a snapshot the dataset's current one
    Promote(KeyArgs),
    /// Restore a snapshot as the new head and make it current
    Restore(KeyArgs),
    /// Retire a snapshot; it stays in the history
    Obsolete(KeyArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    #[arg(long)]
    pub dataset: String,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub comment: Option<String>,

    /// Source version; the head when omitted
    #[arg(long)]
    pub version: Option<u64>,

    /// Promote the snapshot once created
    #[arg(long)]
    pub promote: bool,
}

#[derive(Debug, Args)]
pub struct DatasetArg {
    #[arg(long)]
    pub dataset: String,
}

#[derive(Debug, Args)]
pub struct KeyArgs {
    #[arg(long)]
    pub dataset: String,

    #[arg(long)]
    pub version: u64,
}

impl KeyArgs {
    fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.dataset.as_str(), Version::new(self.version))
    }
}

pub fn execute(engine: &Engine, global: &GlobalArgs, args: SnapshotArgs) -> Result<(), ExError> {
    match args.command {
        SnapshotCommand::Create(create) => execute_create(engine, global, create),
        SnapshotCommand::List(list) => execute_list(engine, list),
        SnapshotCommand::Promote(key) => {
            let job = PromoteSnapshotJob::new(engine.registry().clone(), key.key());
            run_job(engine, global, "Promote snapshot", JobType::ProcessSnapshot, job)?;
            Ok(())
        }
        SnapshotCommand::Restore(key) => {
            let job = RestoreSnapshotJob::new(engine.registry().clone(), key.key());
            run_job(engine, global, "Restore snapshot", JobType::RestoreSnapshot, job)?;
            Ok(())
        }
        SnapshotCommand::Obsolete(key) => {
            let snapshot = engine.registry().mark_obsolete(&key.key())?;
            print_json(&snapshot)
        }
    }
}

fn execute_create(engine: &Engine, global: &GlobalArgs, args: CreateArgs) -> Result<(), ExError> {
    let mut metadata = SnapshotMetadata::new(args.name);
    if let Some(comment) = args.comment {
        metadata = metadata.with_comment(comment);
    }
    let mut job = CreateSnapshotJob::new(engine.registry().clone(), args.dataset.as_str(), metadata);
    if let Some(version) = args.version {
        job = job.from_version(Version::new(version));
    }
    if args.promote {
        job = job.and_promote();
    }
    run_job(engine, global, "Create snapshot", JobType::CreateSnapshot, job)?;
    Ok(())
}

fn execute_list(engine: &Engine, args: DatasetArg) -> Result<(), ExError> {
    let dataset = DatasetId::from(args.dataset.as_str());
    let snapshots = engine
        .registry()
        .list_snapshots(&dataset)
        .collect::<Result<Vec<Snapshot>, ExError>>()?;
    print_json(&snapshots)
}
