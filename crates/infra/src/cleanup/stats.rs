use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which sweep produced a count or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupCategory {
    TempFile,
    StaleUpload,
    FailedUpload,
}

impl CleanupCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupCategory::TempFile => "temp_file",
            CleanupCategory::StaleUpload => "stale_upload",
            CleanupCategory::FailedUpload => "failed_upload",
        }
    }
}

/// A single item the sweep could not remove. The sweep carries on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupItemError {
    pub category: CleanupCategory,
    /// Object path or upload id.
    pub target: String,
    pub message: String,
}

/// Outcome of one sweep, or of a full run once the sweeps are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub temp_files_removed: u64,
    pub stale_uploads_removed: u64,
    pub failed_uploads_removed: u64,
    pub total_bytes_recovered: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub errors: Vec<CleanupItemError>,
}

impl CleanupStats {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            temp_files_removed: 0,
            stale_uploads_removed: 0,
            failed_uploads_removed: 0,
            total_bytes_recovered: 0,
            started_at: at,
            finished_at: at,
            errors: Vec::new(),
        }
    }

    pub fn total_removed(&self) -> u64 {
        self.temp_files_removed + self.stale_uploads_removed + self.failed_uploads_removed
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn record_error(&mut self, category: CleanupCategory, target: impl Into<String>, message: impl ToString) {
        self.errors.push(CleanupItemError {
            category,
            target: target.into(),
            message: message.to_string(),
        });
    }

    /// Fold `other` into `self`, widening the time window to cover both.
    pub fn merge(&mut self, other: CleanupStats) {
        self.temp_files_removed += other.temp_files_removed;
        self.stale_uploads_removed += other.stale_uploads_removed;
        self.failed_uploads_removed += other.failed_uploads_removed;
        self.total_bytes_recovered += other.total_bytes_recovered;
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = self.finished_at.max(other.finished_at);
        self.errors.extend(other.errors);
    }
}

/// Snapshot of what sits under the temp prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub prefix: String,
    pub objects: u64,
    pub bytes: u64,
}

/// Cumulative counters since the scheduler was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<CleanupStats>,
}

impl CleanupReport {
    /// A run with any item error counts as failed.
    pub(crate) fn record(&mut self, stats: &CleanupStats) {
        self.total_runs += 1;
        if stats.is_clean() {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        self.last_run = Some(stats.clone());
    }
}
