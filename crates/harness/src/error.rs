//! Error types for the harness

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Process not found: {0}")]
    ProcessNotFound(u32),

    #[error("Process {pid} still running after {attempts} kill attempts")]
    ProcessStillRunning { pid: u32, attempts: usize },

    #[error("Command {command:?} exited with {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    NonZeroExit { command: String, code: Option<i32> },

    #[error("Command {command:?} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("No free port found from {start} with step {step}")]
    PortRangeExhausted { start: u16, step: u16 },

    #[error("Application not found: {}", .0.display())]
    ApplicationNotFound(PathBuf),

    #[error("User data directory not found: {}", .0.display())]
    UserDataNotFound(PathBuf),

    #[error("Automation server failed to start: {0}")]
    ServerStartup(String),

    #[error("Session aborted: {0}")]
    SessionAborted(String),

    #[error("Screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Screen capture failed: {0}")]
    Capture(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("GUI driver error: {0}")]
    Gui(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl HarnessError {
    /// Errors that indicate a broken environment rather than a failing test.
    /// The session stops running tests once one of these is seen.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::ApplicationNotFound(_))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
