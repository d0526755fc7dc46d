//! Rolling JSON error log for internal failures.
//!
//! Client-caused rejections never land here; only 5xx-class failures do.
//! Entries older than the retention window are dropped on every write,
//! so the file stays bounded without a background task.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// How long entries are retained.
const RETENTION_DAYS: i64 = 7;

/// One logged internal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// When the failure happened.
    pub timestamp: DateTime<Utc>,

    /// Short failure description.
    pub error: String,

    /// Internal detail (stderr, stack context). Never sent to clients.
    pub details: String,

    /// Request path the failure occurred on.
    pub path: String,
}

/// Append-mostly JSON error log with 7-day retention.
pub struct ErrorLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ErrorLog {
    /// Create a log writing to `path`. The file is created lazily on the
    /// first record.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
            write_lock: Mutex::new(()),
        }
    }

    /// Record an internal failure. Logging failures are swallowed after
    /// a warning; an unwritable log must never take a request down.
    pub async fn record(&self, error: &str, details: &str, request_path: &str) {
        let entry = ErrorEntry {
            timestamp: Utc::now(),
            error: error.to_string(),
            details: details.to_string(),
            path: request_path.to_string(),
        };

        if let Err(e) = self.append(entry).await {
            tracing::warn!(error = %e, "failed to write error log entry");
        }
    }

    async fn append(&self, entry: ErrorEntry) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str::<Vec<ErrorEntry>>(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        entries.retain(|existing| existing.timestamp >= cutoff);
        entries.push(entry);

        let json = serde_json::to_vec_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read back all retained entries; used by tests.
    pub async fn entries(&self) -> Vec<ErrorEntry> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(&dir.path().join("log.json"));
        log.record("slicer crashed", "exit 139", "/slice/FDM").await;
        log.record("profile missing", "FDM_0.3mm.ini", "/slice/FDM").await;

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].error, "slicer crashed");
        assert_eq!(entries[1].path, "/slice/FDM");
    }

    #[tokio::test]
    async fn prunes_entries_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let stale = vec![ErrorEntry {
            timestamp: Utc::now() - Duration::days(8),
            error: "old".to_string(),
            details: String::new(),
            path: "/slice/SLA".to_string(),
        }];
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let log = ErrorLog::new(&path);
        log.record("fresh", "", "/slice/FDM").await;

        let entries = log.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error, "fresh");
    }

    #[tokio::test]
    async fn corrupt_log_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, b"{ garbage").unwrap();

        let log = ErrorLog::new(&path);
        log.record("fresh", "", "/slice/FDM").await;
        assert_eq!(log.entries().await.len(), 1);
    }
}
