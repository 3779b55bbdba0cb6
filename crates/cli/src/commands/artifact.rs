//! Artifact layout and report commands

use std::path::PathBuf;

use anyhow::Result;
use aut_harness::logs::{application_log_files, collect_application_logs};
use aut_harness::{DirectoryReporter, HarnessConfig, TestInfo};
use clap::Args;
use serde::Serialize;
use tracing::info;

use crate::output::{print_item, print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ArtifactDirArgs {
    /// Module path of the test, `::` separated
    pub module: String,

    /// Test name
    pub name: String,

    /// Test parameters
    pub params: Vec<String>,

    /// Create the directory
    #[arg(long)]
    pub create: bool,
}

#[derive(Args)]
pub struct CollectLogsArgs {
    /// Status-data directory to scan (defaults to the configured one)
    #[arg(long)]
    pub status_dir: Option<PathBuf>,

    /// Report directory to attach logs to (defaults to the configured one)
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Only list the logs that would be collected
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Serialize)]
pub struct ArtifactDir {
    pub test: String,
    pub path: PathBuf,
}

impl TableDisplay for ArtifactDir {
    fn headers() -> Vec<&'static str> {
        vec!["TEST", "PATH"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.test.clone(), self.path.display().to_string()]
    }
}

#[derive(Serialize)]
pub struct LogFile {
    pub path: PathBuf,
}

impl TableDisplay for LogFile {
    fn headers() -> Vec<&'static str> {
        vec!["LOG"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.path.display().to_string()]
    }
}

#[derive(Serialize)]
pub struct Collected {
    pub count: usize,
    pub report_dir: PathBuf,
}

impl TableDisplay for Collected {
    fn headers() -> Vec<&'static str> {
        vec!["ATTACHED", "REPORT"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.count.to_string(), self.report_dir.display().to_string()]
    }
}

pub fn artifact_dir(args: ArtifactDirArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let test = TestInfo::new(args.module, args.name).with_params(args.params);
    let path = test.artifact_dir(&config.paths.run_root);
    if args.create {
        std::fs::create_dir_all(&path)?;
    }

    print_item(
        &ArtifactDir {
            test: test.full_name(),
            path,
        },
        format,
    );
    Ok(())
}

pub fn collect_logs(args: CollectLogsArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let status_dir = args.status_dir.unwrap_or_else(|| config.paths.status_data_dir.clone());

    if args.dry_run {
        let files: Vec<LogFile> = application_log_files(&status_dir)
            .into_iter()
            .map(|path| LogFile { path })
            .collect();
        print_list(&files, format);
        return Ok(());
    }

    let report_dir = args.report_dir.unwrap_or_else(|| config.paths.report_dir.clone());
    let reporter = DirectoryReporter::new(report_dir.clone());
    let count = collect_application_logs(&status_dir, &reporter)?;
    info!("Collected {} log(s) from {}", count, status_dir.display());

    print_item(&Collected { count, report_dir }, format);
    Ok(())
}
