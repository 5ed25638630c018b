//! Dataset commands: import, validate, versions

use clap::{Args, Subcommand};
use std::path::PathBuf;
use transitx_core::errors::ExError;
use transitx_core_types::{DatasetId, Version};
use transitx_engine::commands::{ImportBatch, ImportRecordsJob, ValidateFeedJob};
use transitx_engine::{Engine, JobType};

use super::{print_json, run_job};
use crate::GlobalArgs;

#[derive(Debug, Args)]
pub struct DatasetArgs {
    #[command(subcommand)]
    pub command: DatasetCommand,
}

#[derive(Debug, Subcommand)]
pub enum DatasetCommand {
    /// Import records from a JSON file as a new dataset version
    Import(ImportArgs),
    /// Check references between trips, routes and stops
    Validate(ValidateArgs),
    /// List retained versions and the head
    Versions(VersionsArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[arg(long)]
    pub dataset: String,

    /// JSON object of collections, each keyed by record id or a list of records with an `id`
    #[arg(long)]
    pub file: PathBuf,

    /// Empty each imported collection first
    #[arg(long)]
    pub replace: bool,

    /// Fail unless the head is still this version
    #[arg(long)]
    pub expect_head: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long)]
    pub dataset: String,

    /// Version to check; the head when omitted
    #[arg(long)]
    pub version: Option<u64>,

    /// Fail the job when any issue is found
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct VersionsArgs {
    #[arg(long)]
    pub dataset: String,
}

pub fn execute(engine: &Engine, global: &GlobalArgs, args: DatasetArgs) -> Result<(), ExError> {
    match args.command {
        DatasetCommand::Import(import) => execute_import(engine, global, import),
        DatasetCommand::Validate(validate) => execute_validate(engine, global, validate),
        DatasetCommand::Versions(versions) => execute_versions(engine, versions),
    }
}

fn execute_import(engine: &Engine, global: &GlobalArgs, args: ImportArgs) -> Result<(), ExError> {
    let batch = ImportBatch::from_file(&args.file)?;
    let mut job = ImportRecordsJob::new(engine.records().clone(), args.dataset.as_str(), batch);
    if args.replace {
        job = job.replacing();
    }
    if let Some(head) = args.expect_head {
        job = job.expecting_head(Version::new(head));
    }
    run_job(engine, global, "Import records", JobType::ImportRecords, job)?;
    Ok(())
}

fn execute_validate(engine: &Engine, global: &GlobalArgs, args: ValidateArgs) -> Result<(), ExError> {
    let mut job = ValidateFeedJob::new(engine.records().clone(), args.dataset.as_str());
    if let Some(version) = args.version {
        job = job.at_version(Version::new(version));
    }
    if args.strict {
        job = job.strict();
    }
    run_job(engine, global, "Validate feed", JobType::ValidateFeed, job)?;
    Ok(())
}

fn execute_versions(engine: &Engine, args: VersionsArgs) -> Result<(), ExError> {
    let dataset = DatasetId::from(args.dataset.as_str());
    let versions: Vec<u64> = engine
        .records()
        .list_versions(&dataset)?
        .into_iter()
        .map(|v| v.get())
        .collect();
    let head = engine.records().head_version(&dataset)?.map(|v| v.get());
    print_json(&serde_json::json!({
        "datasetId": dataset.as_str(),
        "head": head,
        "versions": versions,
    }))
}
