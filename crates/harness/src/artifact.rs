//! Per-test artifact directories

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Identity of a single test invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestInfo {
    /// Module path, `::` separated (e.g. `suite::messaging`)
    pub module_path: String,

    /// Test function name
    pub name: String,

    /// Parameter values the test was invoked with
    #[serde(default)]
    pub params: Vec<String>,
}

impl TestInfo {
    pub fn new(module_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Parameter signature as a single path component, empty if there are none
    pub fn params_component(&self) -> String {
        self.params
            .iter()
            .map(|p| sanitize(p))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// `<run_root>/<module segments>/<name>/<params>`
    pub fn artifact_dir(&self, run_root: &Path) -> PathBuf {
        let mut dir = run_root.to_path_buf();
        for segment in self.module_path.split("::").filter(|s| !s.is_empty()) {
            dir.push(sanitize(segment));
        }
        dir.push(sanitize(&self.name));
        let params = self.params_component();
        if !params.is_empty() {
            dir.push(params);
        }
        dir
    }

    /// Display name, `module::name[params]`
    pub fn full_name(&self) -> String {
        if self.params.is_empty() {
            format!("{}::{}", self.module_path, self.name)
        } else {
            format!("{}::{}[{}]", self.module_path, self.name, self.params.join("-"))
        }
    }
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Pick a screenshot file name in `dir` that does not exist yet
///
/// `screenshot.png` first, then `screenshot_<HHMMSS>.png`, then
/// `screenshot_<HHMMSS>_<n>.png` for failures within the same second.
pub fn screenshot_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    let first = dir.join("screenshot.png");
    if !first.exists() {
        return first;
    }

    let stamp = now.format("%H%M%S").to_string();
    let stamped = dir.join(format!("screenshot_{}.png", stamp));
    if !stamped.exists() {
        return stamped;
    }

    (1u32..)
        .map(|n| dir.join(format!("screenshot_{}_{}.png", stamp, n)))
        .find(|p| !p.exists())
        .unwrap_or(stamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case(&[], "/run/suite/messaging/test_send" ; "no params")]
    #[test_case(&["alice"], "/run/suite/messaging/test_send/alice" ; "one param")]
    #[test_case(&["alice", "bob smith"], "/run/suite/messaging/test_send/alice-bob_smith" ; "sanitized params")]
    fn test_artifact_dir(params: &[&str], expected: &str) {
        let info = TestInfo::new("suite::messaging", "test_send").with_params(params.iter().copied());
        assert_eq!(info.artifact_dir(Path::new("/run")), PathBuf::from(expected));
    }

    #[test]
    fn test_artifact_dir_is_deterministic() {
        let a = TestInfo::new("suite", "test_x").with_params(["1"]);
        let b = TestInfo::new("suite", "test_x").with_params(["1"]);
        assert_eq!(a.artifact_dir(Path::new("out")), b.artifact_dir(Path::new("out")));
    }

    #[test]
    fn test_path_traversal_is_neutralized() {
        let info = TestInfo::new("..::suite", "../escape");
        let dir = info.artifact_dir(Path::new("/run"));
        assert!(dir.starts_with("/run"));
        assert!(!dir.components().any(|c| c.as_os_str() == ".."));
    }

    #[test]
    fn test_full_name() {
        assert_eq!(TestInfo::new("a::b", "t").full_name(), "a::b::t");
        assert_eq!(TestInfo::new("a", "t").with_params(["x", "y"]).full_name(), "a::t[x-y]");
    }

    #[test]
    fn test_screenshot_path_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 30).unwrap();

        let first = screenshot_path(dir.path(), now);
        assert_eq!(first.file_name().unwrap(), "screenshot.png");
        std::fs::write(&first, b"1").unwrap();

        let second = screenshot_path(dir.path(), now);
        assert_eq!(second.file_name().unwrap(), "screenshot_134530.png");
        std::fs::write(&second, b"2").unwrap();

        let third = screenshot_path(dir.path(), now);
        assert_eq!(third.file_name().unwrap(), "screenshot_134530_1.png");
    }
}
