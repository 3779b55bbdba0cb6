//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::account::UserAccount;
use crate::error::{HarnessError, HarnessResult};

/// Environment variable overriding the application binary path
pub const ENV_APP: &str = "AUT_HARNESS_APP";
/// Environment variable overriding the run-output root
pub const ENV_RUN_ROOT: &str = "AUT_HARNESS_RUN_ROOT";
/// Environment variable overriding the capture log level
pub const ENV_LOG_LEVEL: &str = "AUT_HARNESS_LOG_LEVEL";

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application under test
    pub aut: AutConfig,

    /// Background GUI-automation server
    pub server: ServerConfig,

    /// Filesystem layout
    pub paths: PathsConfig,

    /// Timeouts
    pub timeouts: TimeoutsConfig,

    /// Simulated users, the first one is the default account
    pub accounts: Vec<UserAccount>,

    /// Log level applied to captured output for each test
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            aut: AutConfig::default(),
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            accounts: vec![UserAccount::default()],
            log_level: "info".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> HarnessResult<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `AUT_HARNESS_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Some(app) = std::env::var_os(ENV_APP) {
            self.aut.binary_path = PathBuf::from(app);
        }
        if let Some(root) = std::env::var_os(ENV_RUN_ROOT) {
            self.paths.run_root = PathBuf::from(root);
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    fn validate(&self) -> HarnessResult<()> {
        if self.accounts.is_empty() {
            return Err(HarnessError::Config(
                "at least one user account is required".to_string(),
            ));
        }
        if self.aut.port_step == 0 || self.server.port_step == 0 {
            return Err(HarnessError::Config("port_step must be non-zero".to_string()));
        }
        Ok(())
    }

    /// The account used when a test does not ask for a specific one
    pub fn default_account(&self) -> UserAccount {
        self.accounts.first().cloned().unwrap_or_default()
    }
}

/// Application-under-test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutConfig {
    /// Path to the application binary
    pub binary_path: PathBuf,

    /// Extra arguments passed on every launch
    pub args: Vec<String>,

    /// Flag used to pass the user-data directory, as `<flag>=<dir>`
    pub user_data_arg: String,

    /// Environment variable receiving the automation port
    pub port_env: String,

    /// First port probed for the automation port
    pub port_start: u16,

    /// Probe step for the automation port
    pub port_step: u16,

    /// Redirect application stdout/stderr to this file
    pub output_file: Option<PathBuf>,
}

impl Default for AutConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("bin/app"),
            args: Vec::new(),
            user_data_arg: "--datadir".to_string(),
            port_env: "AUT_AUTOMATION_PORT".to_string(),
            port_start: 61500,
            port_step: 1,
            output_file: None,
        }
    }
}

/// Background automation server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path to the server binary, `None` disables the server
    pub binary_path: Option<PathBuf>,

    /// Extra arguments
    pub args: Vec<String>,

    /// Flag used to pass the listening port, as `<flag>` `<port>`
    pub port_arg: String,

    /// First port probed
    pub port_start: u16,

    /// Probe step
    pub port_step: u16,

    /// How long to wait for the server to bind its port
    pub startup_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            args: Vec::new(),
            port_arg: "--port".to_string(),
            port_start: 4322,
            port_step: 1,
            startup_secs: 10,
        }
    }
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for per-test artifact directories
    pub run_root: PathBuf,

    /// Directory holding report attachments
    pub report_dir: PathBuf,

    /// Application per-user status directory; logs live in `<entry>/logs`
    pub status_data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            run_root: PathBuf::from("test-results/run"),
            report_dir: PathBuf::from("test-results/report"),
            status_data_dir: PathBuf::from("test-results/status-data"),
        }
    }
}

/// Timeout settings in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Default timeout for blocking commands
    pub process_secs: u64,

    /// Grace period after each kill attempt before liveness is rechecked
    pub kill_grace_ms: u64,

    /// Timeout for a screen capture command
    pub capture_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            process_secs: 10,
            kill_grace_ms: 1000,
            capture_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_secs)
    }
}

impl TimeoutsConfig {
    pub fn process(&self) -> Duration {
        Duration::from_secs(self.process_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn capture(&self) -> Duration {
        Duration::from_secs(self.capture_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HarnessConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.timeouts.process(), Duration::from_secs(10));
        assert!(config.server.binary_path.is_none());
        assert_eq!(config.default_account().name, "user_account_one");
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
log_level = "debug"

[aut]
binary_path = "/opt/app/bin/app"
port_start = 7000

[paths]
run_root = "/tmp/run"

[[accounts]]
name = "alice"
password = "secret"
"#;
        let config = HarnessConfig::from_toml(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.aut.binary_path, PathBuf::from("/opt/app/bin/app"));
        assert_eq!(config.aut.port_start, 7000);
        assert_eq!(config.aut.port_step, 1);
        assert_eq!(config.paths.run_root, PathBuf::from("/tmp/run"));
        assert_eq!(config.default_account().name, "alice");
        assert!(config.default_account().seed_phrase.is_none());
    }

    #[test]
    fn test_config_rejects_empty_accounts() {
        let err = HarnessConfig::from_toml("accounts = []").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_config_rejects_zero_step() {
        let err = HarnessConfig::from_toml("[server]\nport_step = 0").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }
}
