use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An immutable record of one `GitOps` operation and the safety checks
/// performed on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub repo_path: PathBuf,
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub args: Vec<String>,
    pub safety_checks: Vec<String>,
    pub checks_passed: bool,
    pub failure_reason: Option<String>,
    pub duration_ms: u128,
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms as u64)
    }
}

/// Sink every `GitOps` operation writes one `AuditEntry` to.
///
/// Kept as a trait so tests can substitute an in-memory sink instead of
/// touching the filesystem.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Appends one JSON line per entry to a configured file path.
///
/// The file is opened once at construction and reused; writes are
/// line-buffered and flushed per entry so a crash mid-run loses at most the
/// in-flight write.
pub struct JsonlAuditSink {
    file: Mutex<std::fs::File>,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)?;
        let mut file = self.file.lock().expect("audit sink lock poisoned");
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory sink for tests and `--dry-run`/no-audit-file operation.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit sink lock poisoned").clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.lock().expect("audit sink lock poisoned").push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(op: &str, passed: bool) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            operation: op.to_string(),
            repo_path: PathBuf::from("/repo"),
            branch: Some("main".to_string()),
            remote: None,
            args: vec![],
            safety_checks: vec!["path_exists".to_string()],
            checks_passed: passed,
            failure_reason: if passed {
                None
            } else {
                Some("DestructiveNotAllowed".to_string())
            },
            duration_ms: 5,
            error: None,
        }
    }

    #[test]
    fn memory_sink_records_entries_in_order() {
        let sink = MemoryAuditSink::new();
        sink.record(sample_entry("status", true)).unwrap();
        sink.record(sample_entry("reset_hard", false)).unwrap();
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "status");
        assert!(!entries[1].checks_passed);
        assert_eq!(entries[1].failure_reason.as_deref(), Some("DestructiveNotAllowed"));
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).unwrap();
        sink.record(sample_entry("commit", true)).unwrap();
        sink.record(sample_entry("push", true)).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().next().unwrap().contains("\"operation\":\"commit\""));
    }
}
