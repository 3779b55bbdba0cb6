//! Application-under-test process handle

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AutConfig, HarnessConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::system::{self, ExecOptions, KillSignal, Redirect};

/// Automation ports handed to live handles in this process. An application
/// may bind its port some time after launch, so the port table alone cannot
/// tell two launches apart.
static ASSIGNED_PORTS: Mutex<BTreeSet<u16>> = parking_lot::const_mutex(BTreeSet::new());

/// A port held in [`ASSIGNED_PORTS`] until dropped
#[derive(Debug)]
struct PortReservation(u16);

impl PortReservation {
    fn acquire(start: u16, step: u16) -> HarnessResult<Self> {
        let mut assigned = ASSIGNED_PORTS.lock();
        let port = system::find_free_port_except(start, step, &assigned)?;
        assigned.insert(port);
        Ok(Self(port))
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        ASSIGNED_PORTS.lock().remove(&self.0);
    }
}

/// Lifecycle of an [`Aut`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutStatus {
    NotStarted,
    Running,
    /// Still alive but no longer owned by this handle
    Detached,
    Stopped,
}

/// One instance of the application under test
///
/// Two handles must not share a user-data directory at the same time; this
/// is not checked.
#[derive(Debug)]
pub struct Aut {
    config: AutConfig,
    kill_grace: Duration,
    user_data: Option<PathBuf>,
    pid: Option<u32>,
    port: Option<u16>,
    reservation: Option<PortReservation>,
    status: AutStatus,
}

impl Aut {
    pub fn new(config: &HarnessConfig, user_data: Option<PathBuf>) -> Self {
        Self {
            config: config.aut.clone(),
            kill_grace: config.timeouts.kill_grace(),
            user_data,
            pid: None,
            port: None,
            reservation: None,
            status: AutStatus::NotStarted,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Automation port exported to the application on launch
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn user_data(&self) -> Option<&Path> {
        self.user_data.as_deref()
    }

    pub fn status(&self) -> AutStatus {
        self.status
    }

    pub fn binary_path(&self) -> &Path {
        &self.config.binary_path
    }

    pub fn is_running(&self) -> bool {
        self.pid.map(system::is_running).unwrap_or(false)
    }

    /// Command line used to start the application
    pub fn command(&self) -> Vec<String> {
        let mut command = vec![self.config.binary_path.to_string_lossy().into_owned()];
        command.extend(self.config.args.iter().cloned());
        if let Some(dir) = &self.user_data {
            command.push(format!("{}={}", self.config.user_data_arg, dir.display()));
        }
        command
    }

    /// Start the application
    pub fn launch(&mut self) -> HarnessResult<&mut Self> {
        if self.status == AutStatus::Running {
            warn!("Application already running (pid: {:?})", self.pid);
            return Ok(self);
        }

        if !self.config.binary_path.exists() {
            return Err(HarnessError::ApplicationNotFound(self.config.binary_path.clone()));
        }
        if let Some(dir) = &self.user_data {
            if !dir.is_dir() {
                return Err(HarnessError::UserDataNotFound(dir.clone()));
            }
        }

        let reservation = PortReservation::acquire(self.config.port_start, self.config.port_step)?;
        let port = reservation.0;
        let options = ExecOptions {
            stdout: self
                .config
                .output_file
                .clone()
                .map(Redirect::File)
                .unwrap_or_default(),
            env: vec![(self.config.port_env.clone(), port.to_string())],
            ..Default::default()
        };

        let pid = system::execute(&self.command(), &options)?;
        info!(
            "Launched {} (pid: {}, port: {}, user data: {:?})",
            self.config.binary_path.display(),
            pid,
            port,
            self.user_data
        );

        self.pid = Some(pid);
        self.port = Some(port);
        self.reservation = Some(reservation);
        self.status = AutStatus::Running;
        Ok(self)
    }

    /// Take ownership of an already running instance
    pub fn attach(&mut self, pid: u32) -> HarnessResult<&mut Self> {
        if !system::is_running(pid) {
            return Err(HarnessError::ProcessNotFound(pid));
        }
        info!("Attached to application (pid: {})", pid);
        self.pid = Some(pid);
        self.status = AutStatus::Running;
        Ok(self)
    }

    /// Release the process without terminating it
    pub fn detach(&mut self) -> &mut Self {
        if self.status == AutStatus::Running {
            debug!("Detached from application (pid: {:?})", self.pid);
            self.status = AutStatus::Detached;
        }
        self
    }

    /// Terminate the process. Stopping an exited or never started
    /// application is not an error.
    pub fn stop(&mut self) -> HarnessResult<()> {
        let Some(pid) = self.pid else {
            self.status = AutStatus::Stopped;
            return Ok(());
        };
        if self.status == AutStatus::Stopped {
            return Ok(());
        }

        info!("Stopping application (pid: {})", pid);
        match system::kill_process_with_grace(pid, KillSignal::Kill, self.kill_grace) {
            Ok(()) | Err(HarnessError::ProcessNotFound(_)) => {
                self.status = AutStatus::Stopped;
                self.reservation = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for Aut {
    fn drop(&mut self) {
        if self.status == AutStatus::Running {
            if let Err(e) = self.stop() {
                warn!("Failed to stop application: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_command_includes_user_data() {
        let mut config = HarnessConfig::default();
        config.aut.binary_path = PathBuf::from("/opt/app");
        config.aut.args = vec!["--test-mode".to_string()];

        let aut = Aut::new(&config, Some(PathBuf::from("/data/alice")));
        assert_eq!(
            aut.command(),
            vec!["/opt/app", "--test-mode", "--datadir=/data/alice"]
        );

        let aut = Aut::new(&config, None);
        assert_eq!(aut.command(), vec!["/opt/app", "--test-mode"]);
    }

    #[test]
    fn test_launch_missing_binary() {
        let dir = TempDir::new().unwrap();
        let mut config = HarnessConfig::default();
        config.aut.binary_path = dir.path().join("no-such-app");

        let mut aut = Aut::new(&config, None);
        let err = aut.launch().unwrap_err();
        assert!(matches!(err, HarnessError::ApplicationNotFound(_)));
        assert!(err.is_fatal());
        assert_eq!(aut.status(), AutStatus::NotStarted);
    }

    #[test]
    fn test_port_reservations_are_distinct_until_dropped() {
        let first = PortReservation::acquire(62100, 1).unwrap();
        let second = PortReservation::acquire(62100, 1).unwrap();
        assert_ne!(first.0, second.0);
        assert!(ASSIGNED_PORTS.lock().contains(&first.0));

        let port = first.0;
        drop(first);
        assert!(!ASSIGNED_PORTS.lock().contains(&port));
        assert!(ASSIGNED_PORTS.lock().contains(&second.0));
    }

    #[test]
    fn test_stop_before_launch_is_noop() {
        let mut aut = Aut::new(&HarnessConfig::default(), None);
        aut.stop().unwrap();
        assert_eq!(aut.status(), AutStatus::Stopped);
    }
}
