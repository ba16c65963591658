//! Process configuration read from `CLIPCREDIT_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::cleanup::CleanupConfig;
use crate::retry::RetryPolicy;

/// Where uploaded objects live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process memory; contents vanish on restart.
    Memory,
    /// A directory on the local filesystem.
    LocalFs { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub public_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Postgres adapters when true, in-memory stores otherwise.
    pub use_persistent_stores: bool,
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub cleanup: CleanupConfig,
    pub storage_retry: RetryPolicy,
    pub crediting_retry: RetryPolicy,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cleanup: CleanupConfig::default(),
            storage_retry: RetryPolicy::default(),
            crediting_retry: RetryPolicy::crediting(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                public_base_url: "memory://".to_string(),
            },
            database: DatabaseConfig {
                use_persistent_stores: false,
                url: None,
                max_connections: 5,
            },
        }
    }
}

impl AppConfig {
    /// Read the process environment, falling back to defaults for anything
    /// unset. Malformed values are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env(&lookup);
        let defaults = AppConfig::default();

        let cleanup = CleanupConfig {
            temp_prefix: env
                .string("CLIPCREDIT_CLEANUP_TEMP_PREFIX")
                .unwrap_or(defaults.cleanup.temp_prefix),
            temp_file_max_age_hours: env
                .parse("CLIPCREDIT_CLEANUP_TEMP_FILE_MAX_AGE_HOURS")?
                .unwrap_or(defaults.cleanup.temp_file_max_age_hours),
            stale_upload_max_age_hours: env
                .parse("CLIPCREDIT_CLEANUP_STALE_UPLOAD_MAX_AGE_HOURS")?
                .unwrap_or(defaults.cleanup.stale_upload_max_age_hours),
            failed_upload_max_age_hours: env
                .parse("CLIPCREDIT_CLEANUP_FAILED_UPLOAD_MAX_AGE_HOURS")?
                .unwrap_or(defaults.cleanup.failed_upload_max_age_hours),
            interval_hours: env
                .parse("CLIPCREDIT_CLEANUP_INTERVAL_HOURS")?
                .unwrap_or(defaults.cleanup.interval_hours),
        };

        let storage_retry = env.retry_policy("CLIPCREDIT_STORAGE_RETRY", defaults.storage_retry)?;
        let crediting_retry = env.retry_policy("CLIPCREDIT_CREDIT_RETRY", defaults.crediting_retry)?;

        let backend = match env.string("CLIPCREDIT_STORAGE_ROOT") {
            Some(root) => StorageBackend::LocalFs { root: root.into() },
            None => {
                warn!("CLIPCREDIT_STORAGE_ROOT not set; objects are kept in memory");
                StorageBackend::Memory
            }
        };
        let storage = StorageConfig {
            backend,
            public_base_url: env
                .string("CLIPCREDIT_PUBLIC_BASE_URL")
                .unwrap_or(defaults.storage.public_base_url),
        };

        let use_persistent_stores = env.parse("USE_PERSISTENT_STORES")?.unwrap_or(false);
        let database = DatabaseConfig {
            use_persistent_stores,
            url: env.string("DATABASE_URL"),
            max_connections: env
                .parse("CLIPCREDIT_DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database.max_connections),
        };
        if !use_persistent_stores {
            warn!("USE_PERSISTENT_STORES is off; balances and payments are kept in memory");
        }

        let config = AppConfig {
            cleanup,
            storage_retry,
            crediting_retry,
            storage,
            database,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.cleanup.validate().context("invalid cleanup configuration")?;
        self.storage_retry.validate().context("invalid storage retry policy")?;
        self.crediting_retry.validate().context("invalid crediting retry policy")?;

        if self.database.use_persistent_stores && self.database.url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("max_connections must be positive");
        }
        Ok(())
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.string(key)
            .map(|raw| raw.parse::<T>().with_context(|| format!("{key}={raw:?} is not valid")))
            .transpose()
    }

    fn millis(&self, key: &str) -> anyhow::Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    /// `{prefix}_MAX_ATTEMPTS`, `_INITIAL_DELAY_MS`, `_MAX_DELAY_MS` (0 for
    /// uncapped), `_BACKOFF_FACTOR` and `_TIMEOUT_MS` over `base`.
    fn retry_policy(&self, prefix: &str, base: RetryPolicy) -> anyhow::Result<RetryPolicy> {
        let mut policy = base;
        if let Some(n) = self.parse(&format!("{prefix}_MAX_ATTEMPTS"))? {
            policy = policy.with_max_attempts(n);
        }
        if let Some(d) = self.millis(&format!("{prefix}_INITIAL_DELAY_MS"))? {
            policy = policy.with_initial_delay(d);
        }
        if let Some(d) = self.millis(&format!("{prefix}_MAX_DELAY_MS"))? {
            policy = policy.with_max_delay(Some(d).filter(|d| !d.is_zero()));
        }
        if let Some(f) = self.parse(&format!("{prefix}_BACKOFF_FACTOR"))? {
            policy = policy.with_backoff_factor(f);
        }
        if let Some(d) = self.millis(&format!("{prefix}_TIMEOUT_MS"))? {
            policy = policy.with_attempt_timeout(d);
        }
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.crediting_retry.max_delay, None);
        assert_eq!(config.storage_retry.max_delay, Some(Duration::from_secs(10)));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("CLIPCREDIT_CLEANUP_TEMP_PREFIX", "scratch"),
            ("CLIPCREDIT_CLEANUP_INTERVAL_HOURS", "6"),
            ("CLIPCREDIT_STORAGE_RETRY_MAX_ATTEMPTS", "5"),
            ("CLIPCREDIT_STORAGE_RETRY_MAX_DELAY_MS", "0"),
            ("CLIPCREDIT_CREDIT_RETRY_INITIAL_DELAY_MS", "250"),
            ("CLIPCREDIT_STORAGE_ROOT", "/var/lib/clipcredit"),
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/clipcredit"),
        ])
        .unwrap();

        assert_eq!(config.cleanup.temp_prefix, "scratch");
        assert_eq!(config.cleanup.interval_hours, 6);
        assert_eq!(config.storage_retry.max_attempts, 5);
        assert_eq!(config.storage_retry.max_delay, None);
        assert_eq!(config.crediting_retry.initial_delay, Duration::from_millis(250));
        assert_eq!(
            config.storage.backend,
            StorageBackend::LocalFs {
                root: PathBuf::from("/var/lib/clipcredit")
            }
        );
        assert!(config.database.use_persistent_stores);
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = config_from(&[("CLIPCREDIT_CLEANUP_INTERVAL_HOURS", "twelve")]).unwrap_err();
        assert!(err.to_string().contains("CLIPCREDIT_CLEANUP_INTERVAL_HOURS"));
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = config_from(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn zero_cleanup_interval_is_rejected() {
        assert!(config_from(&[("CLIPCREDIT_CLEANUP_INTERVAL_HOURS", "0")]).is_err());
    }
}
