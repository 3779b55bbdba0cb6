//! Process and port commands

use std::time::Duration;

use anyhow::{Context, Result};
use aut_harness::system::{self, ExecOptions, KillSignal};
use aut_harness::HarnessConfig;
use clap::Args;
use serde::Serialize;

use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct PortsArgs {
    /// Local port to look up
    pub port: u16,
}

#[derive(Args)]
pub struct FreePortArgs {
    /// First port to try (defaults to the application's configured port)
    #[arg(long)]
    pub start: Option<u16>,

    /// Distance between candidate ports
    #[arg(long)]
    pub step: Option<u16>,
}

#[derive(Args)]
pub struct KillArgs {
    /// Process ID
    pub pid: u32,

    /// Signal to send (kill, term, int)
    #[arg(short, long, default_value = "kill")]
    pub signal: KillSignal,
}

#[derive(Args)]
pub struct RunArgs {
    /// Seconds to wait before giving up (defaults to the configured process timeout)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Run through the platform shell
    #[arg(long)]
    pub shell: bool,

    /// Command and arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args)]
pub struct ExecArgs {
    /// Run through the platform shell
    #[arg(long)]
    pub shell: bool,

    /// Command and arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// A process bound to a port
#[derive(Serialize)]
pub struct PortOwner {
    pub port: u16,
    pub pid: u32,
    pub running: bool,
}

impl TableDisplay for PortOwner {
    fn headers() -> Vec<&'static str> {
        vec!["PORT", "PID", "RUNNING"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.port.to_string(),
            self.pid.to_string(),
            if self.running { "✅" } else { "❌" }.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct FreePort {
    pub port: u16,
}

impl TableDisplay for FreePort {
    fn headers() -> Vec<&'static str> {
        vec!["PORT"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.port.to_string()]
    }
}

#[derive(Serialize)]
pub struct Spawned {
    pub pid: u32,
    pub command: String,
}

impl TableDisplay for Spawned {
    fn headers() -> Vec<&'static str> {
        vec!["PID", "COMMAND"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.pid.to_string(), self.command.clone()]
    }
}

pub fn ports(args: PortsArgs, format: OutputFormat) -> Result<()> {
    let owners: Vec<PortOwner> = system::find_process_by_port(args.port)
        .into_iter()
        .map(|pid| PortOwner {
            port: args.port,
            pid,
            running: system::is_running(pid),
        })
        .collect();
    print_list(&owners, format);
    Ok(())
}

pub fn free_port(args: FreePortArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let start = args.start.unwrap_or(config.aut.port_start);
    let step = args.step.unwrap_or(config.aut.port_step);
    let port = system::find_free_port(start, step)?;
    print_item(&FreePort { port }, format);
    Ok(())
}

pub fn kill(args: KillArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    system::kill_process_with_grace(args.pid, args.signal, config.timeouts.kill_grace())
        .with_context(|| format!("failed to stop process {} with {}", args.pid, args.signal.name()))?;
    print_success(&format!("Process {} stopped", args.pid), format);
    Ok(())
}

pub fn run(args: RunArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.timeouts.process());
    let options = ExecOptions {
        shell: args.shell,
        ..Default::default()
    };

    system::run(&args.command, &options, timeout)?;
    print_success(&format!("{} completed", args.command.join(" ")), format);
    Ok(())
}

pub fn exec(args: ExecArgs, format: OutputFormat) -> Result<()> {
    let options = ExecOptions {
        shell: args.shell,
        ..ExecOptions::quiet()
    };

    let pid = system::execute(&args.command, &options)?;
    print_item(
        &Spawned {
            pid,
            command: args.command.join(" "),
        },
        format,
    );
    Ok(())
}
