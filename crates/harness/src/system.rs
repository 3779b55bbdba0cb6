//! Process utilities - port lookup, process termination and subprocess execution
//!
//! The OS process table is shared with everything else on the machine, so
//! lookups are best-effort: processes that exit or refuse inspection while a
//! scan is running are skipped.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Number of signals sent before giving up on a process
pub const KILL_ATTEMPTS: usize = 2;

/// Default wait after each kill attempt
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signal used to terminate a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillSignal {
    #[default]
    Kill,
    Terminate,
    Interrupt,
}

impl KillSignal {
    pub fn name(&self) -> &'static str {
        match self {
            KillSignal::Kill => "SIGKILL",
            KillSignal::Terminate => "SIGTERM",
            KillSignal::Interrupt => "SIGINT",
        }
    }

    #[cfg(unix)]
    fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            KillSignal::Kill => Signal::SIGKILL,
            KillSignal::Terminate => Signal::SIGTERM,
            KillSignal::Interrupt => Signal::SIGINT,
        }
    }
}

impl FromStr for KillSignal {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().trim_start_matches("SIG") {
            "KILL" | "9" => Ok(KillSignal::Kill),
            "TERM" | "15" => Ok(KillSignal::Terminate),
            "INT" | "2" => Ok(KillSignal::Interrupt),
            other => Err(HarnessError::InvalidCommand(format!("unknown signal: {}", other))),
        }
    }
}

/// Find the identifiers of all processes with an inet socket bound to `port`
#[cfg(target_os = "linux")]
pub fn find_process_by_port(port: u16) -> Vec<u32> {
    use std::collections::HashSet;

    let mut inodes = HashSet::new();
    for table in ["tcp", "tcp6", "udp", "udp6"] {
        let Ok(content) = std::fs::read_to_string(format!("/proc/net/{}", table)) else {
            continue;
        };
        for line in content.lines().skip(1) {
            if let Some((local_port, inode)) = parse_proc_net_line(line) {
                if local_port == port && inode != 0 {
                    inodes.insert(inode);
                }
            }
        }
    }

    if inodes.is_empty() {
        return Vec::new();
    }

    let mut pids = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return pids;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Gone or not ours to inspect
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let owns_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .ok()
                .and_then(|target| parse_socket_link(&target.to_string_lossy()))
                .map(|inode| inodes.contains(&inode))
                .unwrap_or(false)
        });
        if owns_socket {
            pids.push(pid);
        }
    }

    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Find the identifiers of all processes with an inet socket bound to `port`
#[cfg(all(unix, not(target_os = "linux")))]
pub fn find_process_by_port(port: u16) -> Vec<u32> {
    let output = Command::new("lsof")
        .args(["-nP", "-t", "-i"])
        .arg(format!(":{}", port))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();

    // lsof exits 1 when nothing matches
    let Ok(output) = output else {
        return Vec::new();
    };

    let mut pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Find the identifiers of all processes with an inet socket bound to `port`
#[cfg(windows)]
pub fn find_process_by_port(port: u16) -> Vec<u32> {
    let Ok(output) = Command::new("netstat")
        .args(["-ano"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
    else {
        return Vec::new();
    };

    let mut pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || !(fields[0] == "TCP" || fields[0] == "UDP") {
                return None;
            }
            let local_port: u16 = fields[1].rsplit(':').next()?.parse().ok()?;
            let pid: u32 = fields.last()?.parse().ok()?;
            (local_port == port && pid != 0).then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Parse one row of `/proc/net/{tcp,udp}[6]` into `(local port, socket inode)`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_net_line(line: &str) -> Option<(u16, u64)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (_, port_hex) = fields[1].rsplit_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let inode = fields[9].parse().ok()?;
    Some((port, inode))
}

/// `socket:[12345]` -> `12345`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Probe ports from `start` in increments of `step` until one has no owner
///
/// There is no upper bound other than the port range itself: if every
/// candidate up to 65535 is taken this fails with `PortRangeExhausted`.
pub fn find_free_port(start: u16, step: u16) -> HarnessResult<u16> {
    find_free_port_except(start, step, &BTreeSet::new())
}

/// [`find_free_port`] that also skips every port in `taken`, for ports handed
/// out to processes that have not bound them yet
pub fn find_free_port_except(start: u16, step: u16, taken: &BTreeSet<u16>) -> HarnessResult<u16> {
    if step == 0 {
        return Err(HarnessError::Config("port step must be non-zero".to_string()));
    }

    let mut port = start;
    loop {
        if taken.contains(&port) {
            debug!("Port {} is already assigned", port);
        } else {
            let owners = find_process_by_port(port);
            if owners.is_empty() {
                debug!("Port {} is free", port);
                return Ok(port);
            }
            debug!("Port {} is used by {:?}", port, owners);
        }
        port = port
            .checked_add(step)
            .ok_or(HarnessError::PortRangeExhausted { start, step })?;
    }
}

/// Whether `pid` refers to a live process. Zombies count as exited.
pub fn is_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    }
}

/// Forcefully terminate a process, retrying once
pub fn kill_process(pid: u32, signal: KillSignal) -> HarnessResult<()> {
    kill_process_with_grace(pid, signal, DEFAULT_KILL_GRACE)
}

/// Send `signal` to `pid` up to [`KILL_ATTEMPTS`] times, waiting up to
/// `grace` after each attempt for the process to go away.
pub fn kill_process_with_grace(pid: u32, signal: KillSignal, grace: Duration) -> HarnessResult<()> {
    debug!("Sending {} to {} process", signal.name(), pid);

    if !is_running(pid) {
        error!("Failed to find process {}", pid);
        return Err(HarnessError::ProcessNotFound(pid));
    }

    for attempt in 1..=KILL_ATTEMPTS {
        warn!("Waiting for process to exit: {} (attempt {})", pid, attempt);
        if !send_signal(pid, signal)? || wait_for_exit(pid, grace) {
            info!("Process {} exited", pid);
            reap(pid);
            return Ok(());
        }
    }

    error!("Process {} survived {} {} attempts", pid, KILL_ATTEMPTS, signal.name());
    Err(HarnessError::ProcessStillRunning {
        pid,
        attempts: KILL_ATTEMPTS,
    })
}

/// Returns `Ok(false)` when the process was already gone.
#[cfg(unix)]
fn send_signal(pid: u32, signal: KillSignal) -> HarnessResult<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid as NixPid;

    // A negative pid would address a process group
    let raw = i32::try_from(pid).map_err(|_| HarnessError::ProcessNotFound(pid))?;
    match kill(NixPid::from_raw(raw), signal.as_nix()) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(HarnessError::Io(std::io::Error::from(errno))),
    }
}

/// Returns `Ok(false)` when the process was already gone.
#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: KillSignal) -> HarnessResult<bool> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) => Ok(process.kill()),
        None => Ok(false),
    }
}

/// Collect the exit status of `pid` if it is an exited child of this
/// process. Anything else is left alone.
#[cfg(unix)]
fn reap(pid: u32) {
    use nix::sys::wait::{waitpid, WaitPidFlag};
    use nix::unistd::Pid as NixPid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match waitpid(NixPid::from_raw(raw), Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => debug!("Reaped process {}: {:?}", pid, status),
        Err(errno) => debug!("Process {} not reaped: {}", pid, errno),
    }
}

#[cfg(not(unix))]
fn reap(_pid: u32) {}

fn wait_for_exit(pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if !is_running(pid) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Where a child's output stream goes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Redirect {
    #[default]
    Inherit,
    Null,
    /// Append to a file, created if missing
    File(PathBuf),
    /// Follow stdout; only meaningful for stderr
    Stdout,
}

/// Options shared by [`execute`] and [`run`]
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub stdout: Redirect,
    pub stderr: Redirect,
    /// Run through the platform shell
    pub shell: bool,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            stdout: Redirect::Inherit,
            stderr: Redirect::Stdout,
            shell: false,
            cwd: None,
            env: Vec::new(),
        }
    }
}

impl ExecOptions {
    pub fn quiet() -> Self {
        Self {
            stdout: Redirect::Null,
            stderr: Redirect::Null,
            ..Default::default()
        }
    }
}

/// Start a command without waiting for it and return its pid
pub fn execute<S: AsRef<str>>(command: &[S], options: &ExecOptions) -> HarnessResult<u32> {
    info!("Executing: {}", command_line(command));
    let child = build_command(command, options)?.spawn()?;
    Ok(child.id())
}

/// Run a command to completion, failing on non-zero exit or after `timeout`
pub fn run<S: AsRef<str>>(command: &[S], options: &ExecOptions, timeout: Duration) -> HarnessResult<()> {
    let line = command_line(command);
    info!("Running: {}", line);

    let mut child = build_command(command, options)?.spawn()?;
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait()? {
            return check_status(line, status);
        }
        let now = Instant::now();
        if now >= deadline {
            warn!("Command timed out after {:?}, killing pid {}", timeout, child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Err(HarnessError::Timeout { command: line, timeout });
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn check_status(command: String, status: ExitStatus) -> HarnessResult<()> {
    if status.success() {
        debug!("Command finished: {}", command);
        Ok(())
    } else {
        Err(HarnessError::NonZeroExit {
            command,
            code: status.code(),
        })
    }
}

fn command_line<S: AsRef<str>>(command: &[S]) -> String {
    command.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(" ")
}

fn build_command<S: AsRef<str>>(command: &[S], options: &ExecOptions) -> HarnessResult<Command> {
    let Some((program, args)) = command.split_first() else {
        return Err(HarnessError::InvalidCommand("empty command".to_string()));
    };

    let mut cmd = if options.shell {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        cmd.arg(command_line(command));
        cmd
    } else {
        let mut cmd = Command::new(program.as_ref());
        cmd.args(args.iter().map(|a| a.as_ref()));
        cmd
    };

    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    let stdout_file = match &options.stdout {
        Redirect::File(path) => Some(open_output(path)?),
        _ => None,
    };

    let stderr = match &options.stderr {
        Redirect::Stdout => match (&options.stdout, &stdout_file) {
            (_, Some(file)) => Stdio::from(file.try_clone()?),
            (Redirect::Null, _) => Stdio::null(),
            _ => Stdio::inherit(),
        },
        other => redirect_to_stdio(other)?,
    };

    let stdout = match stdout_file {
        Some(file) => Stdio::from(file),
        None => redirect_to_stdio(&options.stdout)?,
    };

    cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
    Ok(cmd)
}

fn redirect_to_stdio(redirect: &Redirect) -> HarnessResult<Stdio> {
    Ok(match redirect {
        Redirect::Inherit | Redirect::Stdout => Stdio::inherit(),
        Redirect::Null => Stdio::null(),
        Redirect::File(path) => Stdio::from(open_output(path)?),
    })
}

fn open_output(path: &Path) -> HarnessResult<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_net_line() {
        let line = "   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 123456 1 0000000000000000 100 0 0 10 0";
        assert_eq!(parse_proc_net_line(line), Some((8080, 123456)));

        let v6 = "   1: 00000000000000000000000000000000:0016 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 2222 1 0000000000000000 100 0 0 10 0";
        assert_eq!(parse_proc_net_line(v6), Some((22, 2222)));

        assert_eq!(parse_proc_net_line("  sl  local_address rem_address"), None);
    }

    #[test]
    fn test_parse_socket_link() {
        assert_eq!(parse_socket_link("socket:[98765]"), Some(98765));
        assert_eq!(parse_socket_link("pipe:[98765]"), None);
        assert_eq!(parse_socket_link("/dev/null"), None);
    }

    #[test]
    fn test_kill_signal_from_str() {
        assert_eq!("SIGKILL".parse::<KillSignal>().unwrap(), KillSignal::Kill);
        assert_eq!("term".parse::<KillSignal>().unwrap(), KillSignal::Terminate);
        assert_eq!("2".parse::<KillSignal>().unwrap(), KillSignal::Interrupt);
        assert!("HUP".parse::<KillSignal>().is_err());
    }

    #[test]
    fn test_find_free_port_rejects_zero_step() {
        assert!(matches!(find_free_port(8000, 0), Err(HarnessError::Config(_))));
    }

    #[test]
    fn test_find_free_port_except_skips_taken() {
        let taken: BTreeSet<u16> = [61700, 61702].into_iter().collect();
        let port = find_free_port_except(61700, 2, &taken).unwrap();
        assert!(port >= 61704);
        assert_eq!((port - 61700) % 2, 0);
    }

    #[test]
    fn test_find_free_port_except_exhausts_range() {
        let taken: BTreeSet<u16> = [u16::MAX - 1, u16::MAX].into_iter().collect();
        assert!(matches!(
            find_free_port_except(u16::MAX - 1, 1, &taken),
            Err(HarnessError::PortRangeExhausted { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_send_signal_rejects_pid_outside_pid_range() {
        let pid = i32::MAX as u32 + 1;
        assert!(matches!(
            send_signal(pid, KillSignal::Kill),
            Err(HarnessError::ProcessNotFound(p)) if p == pid
        ));
        assert!(matches!(
            send_signal(u32::MAX, KillSignal::Terminate),
            Err(HarnessError::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_empty_command_is_invalid() {
        let empty: [&str; 0] = [];
        let err = run(&empty, &ExecOptions::default(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidCommand(_)));
        assert!(matches!(
            execute(&empty, &ExecOptions::default()),
            Err(HarnessError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_default_options_merge_stderr() {
        let options = ExecOptions::default();
        assert_eq!(options.stdout, Redirect::Inherit);
        assert_eq!(options.stderr, Redirect::Stdout);
        assert!(!options.shell);
    }
}
