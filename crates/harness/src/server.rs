//! Automation server management - starting the background GUI-automation
//! server on a free port and stopping it at session teardown

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::system::{self, ExecOptions, KillSignal};

/// Handle to a running automation server
#[derive(Debug)]
pub struct AutomationServer {
    pid: u32,
    port: u16,
    kill_grace: Duration,
    stopped: bool,
}

impl AutomationServer {
    /// Spawn the server and wait until its port is bound
    pub fn start(config: &ServerConfig, kill_grace: Duration) -> HarnessResult<Self> {
        let binary = config.binary_path.as_ref().ok_or_else(|| {
            HarnessError::Config("no automation server binary configured".to_string())
        })?;
        if !binary.exists() {
            return Err(HarnessError::ApplicationNotFound(binary.clone()));
        }

        let port = system::find_free_port(config.port_start, config.port_step)?;
        info!("Starting automation server on port {}", port);

        let mut command = vec![binary.to_string_lossy().into_owned()];
        command.extend(config.args.iter().cloned());
        command.push(config.port_arg.clone());
        command.push(port.to_string());

        let pid = system::execute(&command, &ExecOptions::default())?;
        let mut server = AutomationServer {
            pid,
            port,
            kill_grace,
            stopped: false,
        };

        if let Err(e) = server.wait_for_port(config.startup_timeout()) {
            let _ = server.stop();
            return Err(e);
        }

        info!("Automation server is listening on {} (pid: {})", port, pid);
        Ok(server)
    }

    /// Wait for the server (or a process it spawned) to bind the port
    fn wait_for_port(&self, timeout: Duration) -> HarnessResult<()> {
        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;
            if !system::find_process_by_port(self.port).is_empty() {
                return Ok(());
            }
            if !system::is_running(self.pid) {
                return Err(HarnessError::ServerStartup(format!(
                    "process {} exited before binding port {}",
                    self.pid, self.port
                )));
            }
            if attempts == 1 {
                info!("Waiting for automation server to start...");
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        Err(HarnessError::ServerStartup(format!(
            "port {} not bound after {} checks",
            self.port, attempts
        )))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the server
    pub fn stop(&mut self) -> HarnessResult<()> {
        if self.stopped {
            return Ok(());
        }
        info!("Stopping automation server (pid: {})", self.pid);

        // Try graceful shutdown first
        let graceful = Duration::from_millis(500);
        if system::kill_process_with_grace(self.pid, KillSignal::Terminate, graceful).is_ok() {
            self.stopped = true;
            return Ok(());
        }

        match system::kill_process_with_grace(self.pid, KillSignal::Kill, self.kill_grace) {
            Ok(()) | Err(HarnessError::ProcessNotFound(_)) => {
                self.stopped = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for AutomationServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop automation server: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_start_without_binary_is_config_error() {
        let err = AutomationServer::start(&ServerConfig::default(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_start_missing_binary_is_fatal() {
        let config = ServerConfig {
            binary_path: Some(PathBuf::from("/definitely/not/here/automation-server")),
            ..Default::default()
        };
        let err = AutomationServer::start(&config, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_fatal());
    }
}
