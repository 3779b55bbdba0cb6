//! Report collaborator - receives named attachments from the harness

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};

/// Declared content type of an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    Png,
    Text,
    Json,
}

impl AttachmentType {
    pub fn mime(&self) -> &'static str {
        match self {
            AttachmentType::Png => "image/png",
            AttachmentType::Text => "text/plain",
            AttachmentType::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AttachmentType::Png => "png",
            AttachmentType::Text => "txt",
            AttachmentType::Json => "json",
        }
    }
}

/// A named artifact handed to the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub kind: AttachmentType,
    pub body: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, kind: AttachmentType, body: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            body,
        }
    }
}

/// External reporting system
pub trait Reporter {
    /// Called once when the session starts
    fn init(&self) -> HarnessResult<()> {
        Ok(())
    }

    fn attach(&self, attachment: Attachment) -> HarnessResult<()>;

    /// Read a file and attach its contents
    fn attach_file(&self, path: &Path, name: &str, kind: AttachmentType) -> HarnessResult<()> {
        let body = std::fs::read(path)?;
        self.attach(Attachment::new(name, kind, body))
    }
}

/// One line of `attachments.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub mime: String,
    pub source: String,
    pub sha256: String,
    pub size: usize,
}

/// Writes each attachment as `<uuid>-attachment.<ext>` and indexes it in
/// `attachments.jsonl`
pub struct DirectoryReporter {
    dir: PathBuf,
    index: Mutex<()>,
}

impl DirectoryReporter {
    pub const INDEX_FILE: &'static str = "attachments.jsonl";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read back the attachment index
    pub fn records(&self) -> HarnessResult<Vec<AttachmentRecord>> {
        let path = self.dir.join(Self::INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(HarnessError::from))
            .collect()
    }
}

impl Reporter for DirectoryReporter {
    fn init(&self) -> HarnessResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        info!("Report attachments go to {}", self.dir.display());
        Ok(())
    }

    fn attach(&self, attachment: Attachment) -> HarnessResult<()> {
        std::fs::create_dir_all(&self.dir)?;

        let source = format!("{}-attachment.{}", uuid::Uuid::new_v4(), attachment.kind.extension());
        std::fs::write(self.dir.join(&source), &attachment.body)?;

        let record = AttachmentRecord {
            name: attachment.name,
            kind: attachment.kind,
            mime: attachment.kind.mime().to_string(),
            source,
            sha256: hex::encode(Sha256::digest(&attachment.body)),
            size: attachment.body.len(),
        };
        let line = serde_json::to_string(&record)?;

        let _guard = self.index.lock();
        let mut index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(Self::INDEX_FILE))
            .map_err(|e| HarnessError::Report(format!("cannot open index: {}", e)))?;
        writeln!(index, "{}", line)?;

        debug!("Attached '{}' as {}", record.name, record.source);
        Ok(())
    }
}

/// Keeps attachments in memory
#[derive(Default)]
pub struct MemoryReporter {
    attachments: Mutex<Vec<Attachment>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.attachments.lock().iter().map(|a| a.name.clone()).collect()
    }
}

impl Reporter for MemoryReporter {
    fn attach(&self, attachment: Attachment) -> HarnessResult<()> {
        self.attachments.lock().push(attachment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_reporter_writes_index() {
        let dir = TempDir::new().unwrap();
        let reporter = DirectoryReporter::new(dir.path().join("report"));
        reporter.init().unwrap();

        reporter
            .attach(Attachment::new("app.log", AttachmentType::Text, b"hello".to_vec()))
            .unwrap();
        reporter
            .attach(Attachment::new("Screenshot on fail", AttachmentType::Png, vec![1, 2, 3]))
            .unwrap();

        let records = reporter.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "app.log");
        assert_eq!(records[0].mime, "text/plain");
        assert!(records[0].source.ends_with("-attachment.txt"));
        assert_eq!(records[1].kind, AttachmentType::Png);
        assert_eq!(records[1].size, 3);

        let body = std::fs::read(reporter.dir().join(&records[0].source)).unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(records[0].sha256, hex::encode(Sha256::digest(b"hello")));
    }

    #[test]
    fn test_attach_file_reads_contents() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "contents").unwrap();

        let reporter = MemoryReporter::new();
        reporter.attach_file(&file, "a.txt", AttachmentType::Text).unwrap();

        let attachments = reporter.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].body, b"contents");
    }
}
