//! Full-screen capture
//!
//! Screens are grabbed by shelling out to the platform's capture tool into a
//! temporary PNG which is then decoded with `image`.

use std::path::Path;
use std::time::Duration;

use image::DynamicImage;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::system::{self, ExecOptions};

/// X11 display captured on Linux
pub const LINUX_DISPLAY: &str = ":0";

/// Source of screen images
pub trait ScreenCapture {
    fn capture(&self) -> HarnessResult<DynamicImage>;
}

/// Capture tool selected for this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureBackend {
    /// ImageMagick `import -window root` against an X11 display
    Import { display: String },
    /// `grim` on Wayland compositors
    Grim,
    /// macOS `screencapture`
    ScreenCapture,
}

impl CaptureBackend {
    /// Pick a backend from the tools available on `PATH`
    pub fn detect() -> HarnessResult<Self> {
        if cfg!(target_os = "macos") {
            return Ok(CaptureBackend::ScreenCapture);
        }
        if cfg!(target_os = "linux") {
            if std::env::var_os("WAYLAND_DISPLAY").is_some() && command_exists("grim") {
                return Ok(CaptureBackend::Grim);
            }
            if command_exists("import") {
                return Ok(CaptureBackend::Import {
                    display: LINUX_DISPLAY.to_string(),
                });
            }
            return Err(HarnessError::CaptureUnavailable(
                "requires either 'grim' (Wayland) or 'import' (ImageMagick/X11)".to_string(),
            ));
        }
        Err(HarnessError::CaptureUnavailable(format!(
            "no capture backend for {}",
            std::env::consts::OS
        )))
    }

    /// Command line writing a PNG to `dest`
    pub fn command(&self, dest: &Path) -> Vec<String> {
        let dest = dest.to_string_lossy().into_owned();
        match self {
            CaptureBackend::Import { display } => vec![
                "import".to_string(),
                "-display".to_string(),
                display.clone(),
                "-window".to_string(),
                "root".to_string(),
                dest,
            ],
            CaptureBackend::Grim => vec!["grim".to_string(), dest],
            CaptureBackend::ScreenCapture => {
                vec!["screencapture".to_string(), "-x".to_string(), dest]
            }
        }
    }
}

/// Captures with the platform tool
pub struct SystemScreenCapture {
    timeout: Duration,
}

impl SystemScreenCapture {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ScreenCapture for SystemScreenCapture {
    fn capture(&self) -> HarnessResult<DynamicImage> {
        let backend = CaptureBackend::detect()?;
        let tmp = tempfile::Builder::new()
            .prefix("aut-capture-")
            .suffix(".png")
            .tempfile()?;

        let command = backend.command(tmp.path());
        debug!("Capturing screen with {:?}", backend);
        system::run(&command, &ExecOptions::quiet(), self.timeout)
            .map_err(|e| HarnessError::Capture(e.to_string()))?;

        Ok(image::open(tmp.path())?)
    }
}

fn command_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_command_targets_display() {
        let backend = CaptureBackend::Import {
            display: LINUX_DISPLAY.to_string(),
        };
        let cmd = backend.command(Path::new("/tmp/shot.png"));
        assert_eq!(cmd[0], "import");
        assert!(cmd.windows(2).any(|w| w[0] == "-display" && w[1] == ":0"));
        assert_eq!(cmd.last().unwrap(), "/tmp/shot.png");
    }

    #[test]
    fn test_screencapture_is_silent() {
        let cmd = CaptureBackend::ScreenCapture.command(Path::new("out.png"));
        assert_eq!(cmd, vec!["screencapture", "-x", "out.png"]);
    }
}
