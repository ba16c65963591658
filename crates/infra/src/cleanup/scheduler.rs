use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::storage::{ObjectStorage, project_from_path};
use crate::store::UploadStore;

use super::stats::{CleanupCategory, CleanupReport, CleanupStats, StorageUsage};
use super::{CleanupConfig, CleanupError};

/// Reclaims temporary objects, stale uploads and upload rows that never
/// completed.
///
/// Cheap to clone; clones share the running flag, counters and schedule.
#[derive(Clone)]
pub struct StorageCleanupScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn ObjectStorage>,
    uploads: Arc<dyn UploadStore>,
    clock: Arc<dyn Clock>,
    config: CleanupConfig,
    running: AtomicBool,
    report: Mutex<CleanupReport>,
    schedule: Mutex<Option<Schedule>>,
}

struct Schedule {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Holds the running flag for the lifetime of a sweep.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, CleanupError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CleanupError::InProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for StorageCleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCleanupScheduler")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

impl StorageCleanupScheduler {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        uploads: Arc<dyn UploadStore>,
        clock: Arc<dyn Clock>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                uploads,
                clock,
                config,
                running: AtomicBool::new(false),
                report: Mutex::new(CleanupReport::default()),
                schedule: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Run all three sweeps concurrently and merge their statistics.
    ///
    /// Fails with [`CleanupError::InProgress`] if another sweep is running.
    /// Item failures and sweeps that could not list their candidates are
    /// reported in [`CleanupStats::errors`], never as an `Err`.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<CleanupStats, CleanupError> {
        let _guard = RunningGuard::acquire(&self.inner.running)?;
        let mut stats = CleanupStats::started(self.inner.clock.now());
        info!("storage cleanup started");

        let (temp, stale, failed) = tokio::join!(
            self.inner.sweep_temp_files(),
            self.inner.sweep_stale_uploads(),
            self.inner.sweep_failed_uploads(),
        );

        let temp_target = self.inner.config.temp_prefix.clone();
        for (category, target, outcome) in [
            (CleanupCategory::TempFile, temp_target.as_str(), temp),
            (CleanupCategory::StaleUpload, "image_uploads", stale),
            (CleanupCategory::FailedUpload, "image_uploads", failed),
        ] {
            match outcome {
                Ok(sweep) => stats.merge(sweep),
                Err(err) => {
                    error!(category = category.as_str(), error = %err, "cleanup sweep aborted");
                    stats.record_error(category, target, &err);
                }
            }
        }
        stats.finished_at = stats.finished_at.max(self.inner.clock.now());

        self.inner.lock_report().record(&stats);

        info!(
            temp_files_removed = stats.temp_files_removed,
            stale_uploads_removed = stats.stale_uploads_removed,
            failed_uploads_removed = stats.failed_uploads_removed,
            bytes_recovered = stats.total_bytes_recovered,
            errors = stats.errors.len(),
            "storage cleanup finished"
        );
        Ok(stats)
    }

    /// Delete objects under the temp prefix older than the temp max age.
    pub async fn cleanup_temp_files(&self) -> Result<CleanupStats, CleanupError> {
        let _guard = RunningGuard::acquire(&self.inner.running)?;
        self.inner.sweep_temp_files().await
    }

    /// Delete completed uploads, object and row, older than the stale max age.
    pub async fn cleanup_stale_uploads(&self) -> Result<CleanupStats, CleanupError> {
        let _guard = RunningGuard::acquire(&self.inner.running)?;
        self.inner.sweep_stale_uploads().await
    }

    /// Delete upload rows that never got an object.
    pub async fn cleanup_failed_uploads(&self) -> Result<CleanupStats, CleanupError> {
        let _guard = RunningGuard::acquire(&self.inner.running)?;
        self.inner.sweep_failed_uploads().await
    }

    /// Object count and size under the temp prefix.
    pub async fn storage_usage(&self) -> Result<StorageUsage, CleanupError> {
        let objects = self.inner.storage.list(&self.inner.config.temp_prefix).await?;
        Ok(StorageUsage {
            prefix: self.inner.config.temp_prefix.clone(),
            objects: objects.len() as u64,
            bytes: objects.iter().map(|o| o.size).sum(),
        })
    }

    pub fn get_stats(&self) -> CleanupReport {
        self.inner.lock_report().clone()
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner
            .lock_schedule()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Arm the periodic run. The first run happens one interval from now.
    ///
    /// Returns `false`, and changes nothing, if a schedule is already armed.
    pub fn start_scheduled_cleanup(&self) -> bool {
        let mut schedule = self.inner.lock_schedule();
        if schedule.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            debug!("scheduled cleanup already armed");
            return false;
        }

        let period = self.inner.config.interval();
        let Some(first_tick) = Instant::now().checked_add(period).filter(|_| !period.is_zero()) else {
            warn!(interval_hours = self.inner.config.interval_hours, "invalid cleanup interval, schedule not armed");
            return false;
        };
        let shutdown = Arc::new(Notify::new());
        let this = self.clone();
        let signal = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        info!("scheduled cleanup stopped");
                        break;
                    }
                    _ = ticker.tick() => this.scheduled_run().await,
                }
            }
        });

        info!(interval_hours = self.inner.config.interval_hours, "scheduled cleanup armed");
        *schedule = Some(Schedule { shutdown, handle });
        true
    }

    /// Disarm the periodic run and wait for its task to exit. A run already
    /// in flight completes first.
    ///
    /// Returns `false` if nothing was armed.
    pub async fn stop_scheduled_cleanup(&self) -> bool {
        let armed = self.inner.lock_schedule().take();
        let Some(schedule) = armed else {
            return false;
        };
        schedule.shutdown.notify_one();
        if let Err(err) = schedule.handle.await {
            warn!(error = %err, "scheduled cleanup task did not exit cleanly");
        }
        true
    }

    async fn scheduled_run(&self) {
        match self.storage_usage().await {
            Ok(usage) => info!(
                prefix = %usage.prefix,
                objects = usage.objects,
                bytes = usage.bytes,
                "temp storage usage"
            ),
            Err(err) => warn!(error = %err, "could not measure temp storage usage"),
        }

        match self.cleanup().await {
            Ok(_) => {}
            Err(CleanupError::InProgress) => warn!("previous cleanup still running, skipping scheduled run"),
            Err(err) => error!(error = %err, "scheduled cleanup failed"),
        }
    }
}

impl Inner {
    fn lock_report(&self) -> std::sync::MutexGuard<'_, CleanupReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_schedule(&self) -> std::sync::MutexGuard<'_, Option<Schedule>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sweep_temp_files(&self) -> Result<CleanupStats, CleanupError> {
        let now = self.clock.now();
        let mut stats = CleanupStats::started(now);
        let Some(cutoff) = now.checked_sub_signed(self.config.temp_file_max_age()) else {
            return Ok(stats);
        };

        let expired: Vec<_> = self
            .storage
            .list(&self.config.temp_prefix)
            .await?
            .into_iter()
            .filter(|object| object.last_modified < cutoff)
            .collect();
        debug!(candidates = expired.len(), "temp files past max age");

        for object in expired {
            if let Err(err) = self.storage.delete(std::slice::from_ref(&object.path)).await {
                warn!(path = %object.path, error = %err, "failed to delete temp file");
                stats.record_error(CleanupCategory::TempFile, object.path, err);
                continue;
            }
            stats.temp_files_removed += 1;
            stats.total_bytes_recovered += object.size;

            if let (Some(user_id), Some(project_id)) = (object.user_id, project_from_path(&object.path)) {
                if let Err(err) = self.uploads.delete_for_object(user_id, project_id, &object.path).await {
                    warn!(path = %object.path, error = %err, "failed to delete upload row for temp file");
                    stats.record_error(CleanupCategory::TempFile, object.path, err);
                }
            }
        }

        stats.finished_at = self.clock.now();
        Ok(stats)
    }

    async fn sweep_stale_uploads(&self) -> Result<CleanupStats, CleanupError> {
        let now = self.clock.now();
        let mut stats = CleanupStats::started(now);
        let Some(cutoff) = now.checked_sub_signed(self.config.stale_upload_max_age()) else {
            return Ok(stats);
        };
        let rows = self.uploads.stale_uploads(cutoff).await?;
        debug!(candidates = rows.len(), "stale uploads");

        for row in rows {
            let target = row.id.to_string();
            if let Some(path) = &row.object_path {
                // The row stays when its object survives, so the next run retries both.
                if let Err(err) = self.storage.delete(std::slice::from_ref(path)).await {
                    warn!(upload_id = %row.id, path = %path, error = %err, "failed to delete stale upload object");
                    stats.record_error(CleanupCategory::StaleUpload, target, err);
                    continue;
                }
            }
            match self.uploads.delete_upload(row.id).await {
                Ok(true) => {
                    stats.stale_uploads_removed += 1;
                    stats.total_bytes_recovered += row.size_bytes.unwrap_or(0);
                }
                // Already gone; whoever removed it accounts for it.
                Ok(false) => {}
                Err(err) => {
                    warn!(upload_id = %row.id, error = %err, "failed to delete stale upload row");
                    stats.record_error(CleanupCategory::StaleUpload, target, err);
                }
            }
        }

        stats.finished_at = self.clock.now();
        Ok(stats)
    }

    async fn sweep_failed_uploads(&self) -> Result<CleanupStats, CleanupError> {
        let now = self.clock.now();
        let mut stats = CleanupStats::started(now);
        let Some(cutoff) = now.checked_sub_signed(self.config.failed_upload_max_age()) else {
            return Ok(stats);
        };
        let rows = self.uploads.failed_uploads(cutoff).await?;
        debug!(candidates = rows.len(), "failed uploads");

        for row in rows {
            match self.uploads.delete_upload(row.id).await {
                Ok(true) => stats.failed_uploads_removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(upload_id = %row.id, error = %err, "failed to delete failed upload row");
                    stats.record_error(CleanupCategory::FailedUpload, row.id.to_string(), err);
                }
            }
        }

        stats.finished_at = self.clock.now();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;

    use clipcredit_core::{ProjectId, UploadId, UserId};

    use crate::clock::ManualClock;
    use crate::storage::{ObjectStoreStorage, StorageError, StorageObject, upload_path};
    use crate::store::{InMemoryUploadStore, StoreError, UploadRow};

    /// Storage whose listing blocks until the test opens the gate.
    struct GatedStorage {
        inner: ObjectStoreStorage,
        entered: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl ObjectStorage for GatedStorage {
        async fn upload(&self, bytes: Bytes, path: &str, content_type: &str) -> Result<String, StorageError> {
            self.inner.upload(bytes, path, content_type).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.list(prefix).await
        }

        async fn delete(&self, paths: &[String]) -> Result<(), StorageError> {
            self.inner.delete(paths).await
        }

        async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
            self.inner.download(path).await
        }
    }

    /// Storage that refuses to delete one particular path.
    struct StubbornStorage {
        inner: ObjectStoreStorage,
        stuck: String,
    }

    #[async_trait]
    impl ObjectStorage for StubbornStorage {
        async fn upload(&self, bytes: Bytes, path: &str, content_type: &str) -> Result<String, StorageError> {
            self.inner.upload(bytes, path, content_type).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
            self.inner.list(prefix).await
        }

        async fn delete(&self, paths: &[String]) -> Result<(), StorageError> {
            if paths.iter().any(|p| *p == self.stuck) {
                return Err(StorageError::Permission(format!("{} is locked", self.stuck)));
            }
            self.inner.delete(paths).await
        }

        async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
            self.inner.download(path).await
        }
    }

    /// Upload store whose rows vanish underneath the sweep, as when another
    /// instance removes them first.
    struct RacedUploadStore {
        inner: Arc<InMemoryUploadStore>,
    }

    #[async_trait]
    impl UploadStore for RacedUploadStore {
        async fn insert(&self, row: &UploadRow) -> Result<(), StoreError> {
            self.inner.insert(row).await
        }

        async fn stale_uploads(&self, cutoff: chrono::DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError> {
            self.inner.stale_uploads(cutoff).await
        }

        async fn failed_uploads(&self, cutoff: chrono::DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError> {
            self.inner.failed_uploads(cutoff).await
        }

        async fn delete_upload(&self, id: UploadId) -> Result<bool, StoreError> {
            self.inner.delete_upload(id).await?;
            Ok(false)
        }

        async fn delete_for_object(
            &self,
            user_id: UserId,
            project_id: ProjectId,
            object_path: &str,
        ) -> Result<u64, StoreError> {
            self.inner.delete_for_object(user_id, project_id, object_path).await
        }
    }

    /// Clock a day and an hour ahead of the objects just written.
    fn clock_past_temp_age() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now() + chrono::Duration::hours(25)))
    }

    async fn put(storage: &dyn ObjectStorage, path: &str, bytes: &'static [u8]) {
        storage.upload(Bytes::from_static(bytes), path, "image/png").await.unwrap();
    }

    fn upload_row(user_id: UserId, object_path: Option<String>, age: chrono::Duration, now: chrono::DateTime<Utc>) -> UploadRow {
        UploadRow {
            id: UploadId::new(),
            user_id,
            project_id: Some(ProjectId::new()),
            size_bytes: object_path.as_ref().map(|_| 42),
            object_path,
            created_at: now - age,
        }
    }

    #[tokio::test]
    async fn concurrent_cleanup_is_refused() {
        let storage = Arc::new(GatedStorage {
            inner: ObjectStoreStorage::in_memory(),
            entered: Notify::new(),
            gate: Notify::new(),
        });
        let scheduler = StorageCleanupScheduler::new(
            storage.clone(),
            InMemoryUploadStore::arc(),
            clock_past_temp_age(),
            CleanupConfig::default(),
        );

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.cleanup().await })
        };
        storage.entered.notified().await;

        assert!(scheduler.is_running());
        assert_eq!(scheduler.cleanup().await, Err(CleanupError::InProgress));
        assert_eq!(scheduler.cleanup_temp_files().await, Err(CleanupError::InProgress));

        storage.gate.notify_one();
        let stats = first.await.unwrap().unwrap();
        assert!(stats.is_clean());
        assert!(!scheduler.is_running());

        // The refused call is not a run.
        assert_eq!(scheduler.get_stats().total_runs, 1);
    }

    #[tokio::test]
    async fn one_failed_delete_does_not_stop_the_sweep() {
        let inner = ObjectStoreStorage::in_memory();
        for name in ["a", "b", "c", "d", "e"] {
            put(&inner, &format!("temp/{name}.png"), b"12345").await;
        }
        let storage = Arc::new(StubbornStorage {
            inner,
            stuck: "temp/c.png".to_string(),
        });
        let scheduler = StorageCleanupScheduler::new(
            storage.clone(),
            InMemoryUploadStore::arc(),
            clock_past_temp_age(),
            CleanupConfig::default(),
        );

        let stats = scheduler.cleanup().await.unwrap();

        assert_eq!(stats.temp_files_removed, 4);
        assert_eq!(stats.total_bytes_recovered, 20);
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].category, CleanupCategory::TempFile);
        assert_eq!(stats.errors[0].target, "temp/c.png");

        let left = storage.list("temp").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].path, "temp/c.png");

        let report = scheduler.get_stats();
        assert_eq!(report.failed_runs, 1);
        assert_eq!(report.successful_runs, 0);
    }

    #[tokio::test]
    async fn young_temp_files_are_kept() {
        let storage = Arc::new(ObjectStoreStorage::in_memory());
        put(storage.as_ref(), "temp/fresh.png", b"abc").await;
        let scheduler = StorageCleanupScheduler::new(
            storage.clone(),
            InMemoryUploadStore::arc(),
            Arc::new(ManualClock::default()),
            CleanupConfig::default(),
        );

        let stats = scheduler.cleanup_temp_files().await.unwrap();

        assert_eq!(stats.temp_files_removed, 0);
        assert_eq!(storage.list("temp").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_temp_file_takes_its_upload_row_along() {
        let storage = Arc::new(ObjectStoreStorage::in_memory());
        let uploads = InMemoryUploadStore::arc();
        let user = UserId::new();
        let project = ProjectId::new();
        let path = upload_path("temp", user, project, "frame.png");
        put(storage.as_ref(), &path, b"frame").await;
        uploads
            .insert(&UploadRow {
                id: UploadId::new(),
                user_id: user,
                project_id: Some(project),
                object_path: Some(path.clone()),
                size_bytes: Some(5),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let scheduler = StorageCleanupScheduler::new(
            storage.clone(),
            uploads.clone(),
            clock_past_temp_age(),
            CleanupConfig::default(),
        );
        let stats = scheduler.cleanup_temp_files().await.unwrap();

        assert_eq!(stats.temp_files_removed, 1);
        assert!(uploads.is_empty());
        assert!(matches!(storage.download(&path).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn stale_and_failed_uploads_are_swept_by_age() {
        let storage = Arc::new(ObjectStoreStorage::in_memory());
        let uploads = InMemoryUploadStore::arc();
        let clock = Arc::new(ManualClock::default());
        let now = clock.now();
        let user = UserId::new();

        put(storage.as_ref(), "uploads/old.png", b"old").await;
        put(storage.as_ref(), "uploads/new.png", b"new").await;
        let rows = [
            upload_row(user, Some("uploads/old.png".into()), chrono::Duration::days(8), now),
            upload_row(user, Some("uploads/new.png".into()), chrono::Duration::days(1), now),
            upload_row(user, None, chrono::Duration::days(2), now),
            upload_row(user, None, chrono::Duration::hours(1), now),
        ];
        for row in &rows {
            uploads.insert(row).await.unwrap();
        }

        let scheduler = StorageCleanupScheduler::new(storage.clone(), uploads.clone(), clock, CleanupConfig::default());
        let stats = scheduler.cleanup().await.unwrap();

        assert_eq!(stats.temp_files_removed, 0);
        assert_eq!(stats.stale_uploads_removed, 1);
        assert_eq!(stats.failed_uploads_removed, 1);
        assert_eq!(stats.total_bytes_recovered, 42);
        assert!(stats.is_clean());
        assert_eq!(uploads.len(), 2);
        assert!(matches!(storage.download("uploads/old.png").await, Err(StorageError::NotFound(_))));
        assert!(storage.download("uploads/new.png").await.is_ok());
    }

    #[tokio::test]
    async fn stale_row_survives_when_its_object_cannot_be_deleted() {
        let inner = ObjectStoreStorage::in_memory();
        put(&inner, "uploads/locked.png", b"locked").await;
        let storage = Arc::new(StubbornStorage {
            inner,
            stuck: "uploads/locked.png".to_string(),
        });
        let uploads = InMemoryUploadStore::arc();
        let clock = Arc::new(ManualClock::default());
        let row = upload_row(UserId::new(), Some("uploads/locked.png".into()), chrono::Duration::days(30), clock.now());
        uploads.insert(&row).await.unwrap();

        let scheduler = StorageCleanupScheduler::new(storage, uploads.clone(), clock, CleanupConfig::default());
        let stats = scheduler.cleanup_stale_uploads().await.unwrap();

        assert_eq!(stats.stale_uploads_removed, 0);
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].target, row.id.to_string());
        assert_eq!(uploads.len(), 1);
    }

    #[tokio::test]
    async fn rows_removed_elsewhere_recover_no_bytes() {
        let storage = Arc::new(ObjectStoreStorage::in_memory());
        put(storage.as_ref(), "uploads/gone.png", b"gone").await;
        let inner = InMemoryUploadStore::arc();
        let clock = Arc::new(ManualClock::default());
        let row = upload_row(UserId::new(), Some("uploads/gone.png".into()), chrono::Duration::days(30), clock.now());
        inner.insert(&row).await.unwrap();
        let uploads = Arc::new(RacedUploadStore { inner: inner.clone() });

        let scheduler = StorageCleanupScheduler::new(storage, uploads, clock, CleanupConfig::default());
        let stats = scheduler.cleanup_stale_uploads().await.unwrap();

        assert_eq!(stats.stale_uploads_removed, 0);
        assert_eq!(stats.total_bytes_recovered, 0);
        assert!(stats.is_clean());
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn ages_past_the_calendar_remove_nothing() {
        let storage = Arc::new(ObjectStoreStorage::in_memory());
        put(storage.as_ref(), "temp/old.png", b"old").await;
        let uploads = InMemoryUploadStore::arc();
        let clock = clock_past_temp_age();
        uploads
            .insert(&upload_row(UserId::new(), None, chrono::Duration::days(365), clock.now()))
            .await
            .unwrap();
        let config = CleanupConfig {
            temp_file_max_age_hours: 3_000_000_000,
            stale_upload_max_age_hours: u64::MAX,
            failed_upload_max_age_hours: 3_000_000_000,
            ..CleanupConfig::default()
        };

        let scheduler = StorageCleanupScheduler::new(storage.clone(), uploads.clone(), clock, config);
        let stats = scheduler.cleanup().await.unwrap();

        assert_eq!(stats.total_removed(), 0);
        assert!(stats.is_clean());
        assert_eq!(storage.list("temp").await.unwrap().len(), 1);
        assert_eq!(uploads.len(), 1);
    }

    #[tokio::test]
    async fn storage_usage_reports_temp_prefix_only() {
        let storage = Arc::new(ObjectStoreStorage::in_memory());
        put(storage.as_ref(), "temp/a.png", b"1234").await;
        put(storage.as_ref(), "temp/b.png", b"123456").await;
        put(storage.as_ref(), "uploads/c.png", b"12").await;
        let scheduler = StorageCleanupScheduler::new(
            storage,
            InMemoryUploadStore::arc(),
            Arc::new(ManualClock::default()),
            CleanupConfig::default(),
        );

        let usage = scheduler.storage_usage().await.unwrap();

        assert_eq!(usage.objects, 2);
        assert_eq!(usage.bytes, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_runs_every_interval_until_stopped() {
        let storage = Arc::new(ObjectStoreStorage::in_memory());
        put(storage.as_ref(), "temp/old.png", b"old").await;
        let scheduler = StorageCleanupScheduler::new(
            storage.clone(),
            InMemoryUploadStore::arc(),
            clock_past_temp_age(),
            CleanupConfig::default(),
        );
        let interval = scheduler.config().interval();

        assert!(scheduler.start_scheduled_cleanup());
        assert!(!scheduler.start_scheduled_cleanup());
        assert!(scheduler.is_scheduled());

        tokio::time::sleep(interval - Duration::from_secs(1)).await;
        assert_eq!(scheduler.get_stats().total_runs, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let report = scheduler.get_stats();
        assert_eq!(report.total_runs, 1);
        assert_eq!(report.last_run.map(|s| s.temp_files_removed), Some(1));

        tokio::time::sleep(interval).await;
        assert_eq!(scheduler.get_stats().total_runs, 2);

        assert!(scheduler.stop_scheduled_cleanup().await);
        assert!(!scheduler.stop_scheduled_cleanup().await);
        assert!(!scheduler.is_scheduled());

        tokio::time::sleep(interval * 3).await;
        assert_eq!(scheduler.get_stats().total_runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_not_armed() {
        let scheduler = StorageCleanupScheduler::new(
            Arc::new(ObjectStoreStorage::in_memory()),
            InMemoryUploadStore::arc(),
            Arc::new(ManualClock::default()),
            CleanupConfig {
                interval_hours: 0,
                ..CleanupConfig::default()
            },
        );
        assert!(!scheduler.start_scheduled_cleanup());
        assert!(!scheduler.is_scheduled());
    }
}
