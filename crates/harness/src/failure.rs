//! Screenshot-on-failure reporting
//!
//! Nothing in here may surface an error to the caller: a broken capture path
//! must never replace the failure of the test that triggered it.

use std::path::{Path, PathBuf};

use chrono::Local;
use image::ImageFormat;
use tracing::{debug, info};

use crate::artifact::{screenshot_path, TestInfo};
use crate::capture::ScreenCapture;
use crate::error::HarnessResult;
use crate::report::{Attachment, AttachmentType, Reporter};

/// Name of the screenshot attachment
pub const SCREENSHOT_ATTACHMENT: &str = "Screenshot on fail";

pub struct FailureReporter<'a> {
    run_root: &'a Path,
    capture: &'a dyn ScreenCapture,
    reporter: &'a dyn Reporter,
}

impl<'a> FailureReporter<'a> {
    pub fn new(run_root: &'a Path, capture: &'a dyn ScreenCapture, reporter: &'a dyn Reporter) -> Self {
        Self {
            run_root,
            capture,
            reporter,
        }
    }

    /// Capture and attach a screenshot for a failed test.
    ///
    /// Returns the screenshot path, or `None` if any step failed.
    pub fn on_failure(&self, test: &TestInfo) -> Option<PathBuf> {
        match self.capture_screenshot(test) {
            Ok(path) => {
                info!("Saved failure screenshot for {} to {}", test.full_name(), path.display());
                Some(path)
            }
            Err(e) => {
                debug!("Failure screenshot for {} not captured: {}", test.full_name(), e);
                None
            }
        }
    }

    fn capture_screenshot(&self, test: &TestInfo) -> HarnessResult<PathBuf> {
        let dir = test.artifact_dir(self.run_root);
        std::fs::create_dir_all(&dir)?;

        let path = screenshot_path(&dir, Local::now());
        let image = self.capture.capture()?;
        image.save_with_format(&path, ImageFormat::Png)?;

        let body = std::fs::read(&path)?;
        self.reporter
            .attach(Attachment::new(SCREENSHOT_ATTACHMENT, AttachmentType::Png, body))?;
        Ok(path)
    }
}
