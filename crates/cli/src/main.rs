//! AUT Harness CLI - Main Entry Point
//!
//! Operator access to the harness process utilities and artifact layout:
//! find who holds a port, clean up stray application processes, and locate
//! or collect test artifacts outside a test run.

use std::path::PathBuf;

use anyhow::Context;
use aut_harness::{logging, HarnessConfig};
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{artifact, process};

/// AUT Harness CLI - desktop UI test process and artifact utilities
#[derive(Parser)]
#[command(name = "aut-harness")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file (TOML)
    #[arg(short, long, env = "AUT_HARNESS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List processes bound to a local port
    Ports(process::PortsArgs),

    /// Find the first free port in a range
    FreePort(process::FreePortArgs),

    /// Kill a process and wait for it to exit
    Kill(process::KillArgs),

    /// Run a command to completion
    Run(process::RunArgs),

    /// Start a command without waiting for it
    Exec(process::ExecArgs),

    /// Print the artifact directory of a test
    ArtifactDir(artifact::ArtifactDirArgs),

    /// Attach application logs to the report and remove them
    CollectLogs(artifact::CollectLogsArgs),
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HarnessConfig> {
    match path {
        Some(path) => {
            let mut config = HarnessConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            config.apply_env();
            Ok(config)
        }
        None => Ok(HarnessConfig::from_env()?),
    }
}

fn main() {
    let cli = Cli::parse();

    let _logs = logging::init(if cli.verbose { "debug" } else { "warn" });

    if let Err(e) = execute(cli) {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let format = cli.format;

    match cli.command {
        Commands::Ports(args) => process::ports(args, format),
        Commands::FreePort(args) => process::free_port(args, &config, format),
        Commands::Kill(args) => process::kill(args, &config, format),
        Commands::Run(args) => process::run(args, &config, format),
        Commands::Exec(args) => process::exec(args, format),
        Commands::ArtifactDir(args) => artifact::artifact_dir(args, &config, format),
        Commands::CollectLogs(args) => artifact::collect_logs(args, &config, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_takes_trailing_command() {
        let cli = Cli::try_parse_from(["aut-harness", "run", "--timeout", "5", "--", "echo", "-n", "hi"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.timeout, Some(5));
                assert_eq!(args.command, vec!["echo", "-n", "hi"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_kill_parses_signal() {
        let cli = Cli::try_parse_from(["aut-harness", "kill", "1234", "--signal", "term"]).unwrap();
        match cli.command {
            Commands::Kill(args) => {
                assert_eq!(args.pid, 1234);
                assert_eq!(args.signal, aut_harness::system::KillSignal::Terminate);
            }
            _ => panic!("expected kill"),
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, "log_level = \"debug\"\n\n[aut]\nport_start = 7000\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.aut.port_start, 7000);
    }
}
