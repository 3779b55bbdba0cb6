//! Process utility tests against real processes

#![cfg(unix)]

use std::net::TcpListener;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use aut_harness::system::{
    self, execute, find_free_port, find_process_by_port, kill_process, kill_process_with_grace, run,
    ExecOptions, KillSignal, Redirect,
};
use aut_harness::HarnessError;
use tempfile::TempDir;

fn sleeper(secs: u32) -> std::process::Child {
    Command::new("sleep")
        .arg(secs.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

#[cfg(target_os = "linux")]
#[test]
fn test_find_process_by_port_finds_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let pids = find_process_by_port(port);
    assert!(pids.contains(&std::process::id()), "{:?} missing own pid", pids);
}

#[cfg(target_os = "linux")]
#[test]
fn test_find_free_port_skips_bound_port() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let free = find_free_port(port, 1).unwrap();
    assert_ne!(free, port);
    assert!(free > port);
    assert!(find_process_by_port(free).is_empty());
}

#[test]
fn test_kill_process_missing_pid() {
    let mut child = sleeper(0);
    let pid = child.id();
    child.wait().unwrap();

    let err = kill_process(pid, KillSignal::Kill).unwrap_err();
    assert!(matches!(err, HarnessError::ProcessNotFound(p) if p == pid));
}

#[test]
fn test_kill_process_terminates_child() {
    let mut child = sleeper(30);
    let pid = child.id();
    assert!(system::is_running(pid));

    kill_process(pid, KillSignal::Kill).unwrap();
    assert!(!system::is_running(pid));

    // Already reaped by kill_process
    assert!(child.try_wait().is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn test_kill_process_reaps_spawned_child() {
    let pid = execute(&["sleep", "30"], &ExecOptions::quiet()).unwrap();
    let proc_entry = std::path::PathBuf::from(format!("/proc/{}", pid));
    assert!(proc_entry.exists());

    kill_process(pid, KillSignal::Kill).unwrap();
    assert!(!proc_entry.exists(), "{} left as a zombie", pid);
}

#[test]
fn test_kill_process_reports_survivor() {
    let child = Command::new("sh")
        .args(["-c", "trap '' TERM; exec sleep 30"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let pid = child.id();
    // Let the shell install the trap before exec
    std::thread::sleep(Duration::from_millis(300));

    let err = kill_process_with_grace(pid, KillSignal::Terminate, Duration::from_millis(200)).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::ProcessStillRunning { pid: p, attempts: 2 } if p == pid
    ));

    kill_process(pid, KillSignal::Kill).unwrap();
    assert!(!system::is_running(pid));
}

#[test]
fn test_run_times_out() {
    let start = Instant::now();
    let err = run(&["sleep", "5"], &ExecOptions::quiet(), Duration::from_millis(300)).unwrap_err();

    assert!(matches!(err, HarnessError::Timeout { .. }));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_run_non_zero_exit() {
    let err = run(&["false"], &ExecOptions::quiet(), Duration::from_secs(5)).unwrap_err();
    assert!(matches!(err, HarnessError::NonZeroExit { code: Some(1), .. }));
}

#[test]
fn test_run_success() {
    run(&["true"], &ExecOptions::quiet(), Duration::from_secs(5)).unwrap();
}

#[test]
fn test_run_redirects_both_streams_to_file() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("logs/out.txt");
    let options = ExecOptions {
        stdout: Redirect::File(out.clone()),
        stderr: Redirect::Stdout,
        shell: true,
        ..Default::default()
    };

    run(&["echo out; echo err 1>&2"], &options, Duration::from_secs(5)).unwrap();

    let content = std::fs::read_to_string(&out).unwrap();
    assert!(content.contains("out"));
    assert!(content.contains("err"));
}

#[test]
fn test_execute_returns_without_waiting() {
    let start = Instant::now();
    let pid = execute(&["sleep", "30"], &ExecOptions::quiet()).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(system::is_running(pid));

    kill_process(pid, KillSignal::Kill).unwrap();
    assert!(!system::is_running(pid));
}

#[test]
fn test_execute_missing_binary() {
    let err = execute(&["/definitely/not/a/binary"], &ExecOptions::quiet()).unwrap_err();
    assert!(matches!(err, HarnessError::Io(_)));
}
