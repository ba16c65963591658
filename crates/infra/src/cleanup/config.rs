//! Storage cleanup configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for [`StorageCleanupScheduler`](super::StorageCleanupScheduler).
///
/// Ages are whole hours; an object or row strictly older than its age is
/// eligible for removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Object-storage prefix holding temporary uploads.
    ///
    /// Default: "temp"
    ///
    /// Env: CLIPCREDIT_CLEANUP_TEMP_PREFIX
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,

    /// Default: 24 hours
    ///
    /// Env: CLIPCREDIT_CLEANUP_TEMP_FILE_MAX_AGE_HOURS
    #[serde(default = "default_temp_file_max_age_hours")]
    pub temp_file_max_age_hours: u64,

    /// Completed uploads older than this are removed together with their
    /// object.
    ///
    /// Default: 168 hours (7 days)
    ///
    /// Env: CLIPCREDIT_CLEANUP_STALE_UPLOAD_MAX_AGE_HOURS
    #[serde(default = "default_stale_upload_max_age_hours")]
    pub stale_upload_max_age_hours: u64,

    /// Upload rows that never received an object are dropped after this.
    ///
    /// Default: 24 hours
    ///
    /// Env: CLIPCREDIT_CLEANUP_FAILED_UPLOAD_MAX_AGE_HOURS
    #[serde(default = "default_failed_upload_max_age_hours")]
    pub failed_upload_max_age_hours: u64,

    /// Hours between scheduled runs.
    ///
    /// Default: 12 hours
    ///
    /// Env: CLIPCREDIT_CLEANUP_INTERVAL_HOURS
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
}

fn default_temp_prefix() -> String {
    "temp".to_string()
}

fn default_temp_file_max_age_hours() -> u64 {
    24
}

fn default_stale_upload_max_age_hours() -> u64 {
    7 * 24
}

fn default_failed_upload_max_age_hours() -> u64 {
    24
}

fn default_interval_hours() -> u64 {
    12
}

/// Upper bound on any age or interval: one hundred years.
const MAX_HOURS: u64 = 100 * 365 * 24;

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            temp_prefix: default_temp_prefix(),
            temp_file_max_age_hours: default_temp_file_max_age_hours(),
            stale_upload_max_age_hours: default_stale_upload_max_age_hours(),
            failed_upload_max_age_hours: default_failed_upload_max_age_hours(),
            interval_hours: default_interval_hours(),
        }
    }
}

impl CleanupConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.temp_prefix.trim_matches('/').is_empty() {
            anyhow::bail!("temp_prefix must not be empty");
        }

        for (name, hours) in [
            ("temp_file_max_age_hours", self.temp_file_max_age_hours),
            ("stale_upload_max_age_hours", self.stale_upload_max_age_hours),
            ("failed_upload_max_age_hours", self.failed_upload_max_age_hours),
            ("interval_hours", self.interval_hours),
        ] {
            if hours == 0 {
                anyhow::bail!("{name} must be positive, got {hours}");
            }
            if hours > MAX_HOURS {
                anyhow::bail!("{name} must be at most {MAX_HOURS}, got {hours}");
            }
        }

        Ok(())
    }

    pub fn temp_file_max_age(&self) -> chrono::Duration {
        hours(self.temp_file_max_age_hours)
    }

    pub fn stale_upload_max_age(&self) -> chrono::Duration {
        hours(self.stale_upload_max_age_hours)
    }

    pub fn failed_upload_max_age(&self) -> chrono::Duration {
        hours(self.failed_upload_max_age_hours)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }
}

fn hours(h: u64) -> chrono::Duration {
    i64::try_from(h)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CleanupConfig::default();
        assert_eq!(config.temp_prefix, "temp");
        assert_eq!(config.temp_file_max_age(), chrono::Duration::hours(24));
        assert_eq!(config.stale_upload_max_age(), chrono::Duration::days(7));
        assert_eq!(config.failed_upload_max_age(), chrono::Duration::hours(24));
        assert_eq!(config.interval(), Duration::from_secs(12 * 3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: CleanupConfig = serde_json::from_str(r#"{"interval_hours": 1}"#).unwrap();
        assert_eq!(config.interval_hours, 1);
        assert_eq!(config.stale_upload_max_age_hours, 168);
    }

    #[test]
    fn zero_ages_and_blank_prefix_are_rejected() {
        let config = CleanupConfig {
            failed_upload_max_age_hours: 0,
            ..CleanupConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failed_upload_max_age_hours"));

        let config = CleanupConfig {
            temp_prefix: "/".to_string(),
            ..CleanupConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ages_beyond_a_century_are_rejected() {
        let config = CleanupConfig {
            temp_file_max_age_hours: 3_000_000_000,
            ..CleanupConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temp_file_max_age_hours"));

        let config = CleanupConfig {
            stale_upload_max_age_hours: MAX_HOURS,
            ..CleanupConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
