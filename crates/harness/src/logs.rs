//! Application log collection
//!
//! Log files under `<status data>/<profile>/logs/` belong to the application
//! until the harness attaches them to the report, after which they are
//! deleted so the next test starts from an empty log directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::HarnessResult;
use crate::report::{AttachmentType, Reporter};

/// All files in `<status_data_dir>/*/logs/`, sorted
pub fn application_log_files(status_data_dir: &Path) -> Vec<PathBuf> {
    if !status_data_dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(status_data_dir)
        .min_depth(3)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|name| name == "logs")
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Attach every application log to the report, then delete it.
///
/// Returns the number of files transferred. A file is only deleted once its
/// attachment succeeded.
pub fn collect_application_logs(status_data_dir: &Path, reporter: &dyn Reporter) -> HarnessResult<usize> {
    let files = application_log_files(status_data_dir);
    if files.is_empty() {
        debug!("No application logs under {}", status_data_dir.display());
        return Ok(0);
    }

    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter.attach_file(file, &name, AttachmentType::Text)?;
        std::fs::remove_file(file)?;
    }

    info!("Attached {} application log(s)", files.len());
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use tempfile::TempDir;

    fn write_log(root: &Path, profile: &str, name: &str, body: &str) -> PathBuf {
        let dir = root.join(profile).join("logs");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_logs_are_attached_then_removed() {
        let root = TempDir::new().unwrap();
        let a = write_log(root.path(), "profile-a", "app.log", "a");
        let b = write_log(root.path(), "profile-b", "geth.log", "b");
        // Not a log directory
        std::fs::create_dir_all(root.path().join("profile-a/data")).unwrap();
        std::fs::write(root.path().join("profile-a/data/db"), "keep").unwrap();

        let reporter = MemoryReporter::new();
        let count = collect_application_logs(root.path(), &reporter).unwrap();

        assert_eq!(count, 2);
        assert_eq!(reporter.names(), vec!["app.log", "geth.log"]);
        assert!(reporter.attachments().iter().all(|a| a.kind == AttachmentType::Text));
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(root.path().join("profile-a/data/db").exists());
    }

    #[test]
    fn test_missing_status_dir_has_no_logs() {
        let root = TempDir::new().unwrap();
        let reporter = MemoryReporter::new();
        let count = collect_application_logs(&root.path().join("missing"), &reporter).unwrap();
        assert_eq!(count, 0);
        assert!(reporter.attachments().is_empty());
    }
}
