//! Logging setup
//!
//! The filter sits behind a reload layer so each test can set the level of
//! the output captured for it.

use parking_lot::Mutex;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::error::{HarnessError, HarnessResult};

/// Handle for changing the active log level
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    level: Mutex<String>,
}

impl LogControl {
    /// A control that is not connected to any subscriber
    pub fn detached(level: &str) -> Self {
        Self {
            handle: None,
            level: Mutex::new(level.to_string()),
        }
    }

    /// Whether this control drives the global subscriber
    pub fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn level(&self) -> String {
        self.level.lock().clone()
    }

    /// Replace the active filter. `level` uses `RUST_LOG` syntax.
    pub fn set_level(&self, level: &str) -> HarnessResult<()> {
        let filter = EnvFilter::try_new(level)
            .map_err(|e| HarnessError::Config(format!("invalid log level '{}': {}", level, e)))?;
        if let Some(handle) = &self.handle {
            handle
                .reload(filter)
                .map_err(|e| HarnessError::Config(format!("cannot reload log filter: {}", e)))?;
        }
        *self.level.lock() = level.to_string();
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
///
/// If a subscriber is already installed the returned control is detached.
pub fn init(level: &str) -> LogControl {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok();

    LogControl {
        handle: installed.then_some(handle),
        level: Mutex::new(level.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_control_tracks_level() {
        let control = LogControl::detached("info");
        assert!(!control.is_installed());
        control.set_level("debug").unwrap();
        assert_eq!(control.level(), "debug");
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let control = LogControl::detached("info");
        assert!(control.set_level("aut_harness=notalevel").is_err());
        assert_eq!(control.level(), "info");
    }
}
