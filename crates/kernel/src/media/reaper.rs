//! Expiry reaper.
//!
//! Reclaims uploaded media that was never linked. A record is only ever
//! deleted after its file is gone; a record whose file could not be removed
//! is marked instead, so the anomaly stays visible.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::MediaError;
use super::model::{MediaRecord, MediaStatus};
use super::storage::MediaStorage;
use crate::metrics::Metrics;
use crate::repository::{CasOutcome, MediaRepository};

/// Default time between sweeps (6 hours).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Default number of records examined per sweep.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired records fetched.
    pub examined: usize,
    /// File and row both removed.
    pub reclaimed: usize,
    /// File removal failed, row marked `failed_cleanup_file`.
    pub failed_file: usize,
    /// File removed, row deletion failed and row marked `failed_cleanup_db`.
    pub failed_db: usize,
}

/// Periodic reclamation of expired, unlinked media.
#[derive(Clone)]
pub struct Reaper {
    repo: Arc<dyn MediaRepository>,
    storage: Arc<dyn MediaStorage>,
    metrics: Option<Arc<Metrics>>,
    interval: Duration,
    batch_size: i64,
}

impl Reaper {
    pub fn new(repo: Arc<dyn MediaRepository>, storage: Arc<dyn MediaStorage>) -> Self {
        Self {
            repo,
            storage,
            metrics: None,
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the reaper on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Sweep on every interval tick until `cancel` fires.
    ///
    /// The first tick fires immediately. A sweep in progress when `cancel`
    /// fires is abandoned at its next await point.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "media reaper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the first sweep waits a full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("media reaper cancelled mid-sweep");
                    break;
                }
                result = self.sweep() => match result {
                    Ok(report) => {
                        if report.examined > 0 {
                            info!(
                                examined = report.examined,
                                reclaimed = report.reclaimed,
                                failed_file = report.failed_file,
                                failed_db = report.failed_db,
                                "media reaper sweep finished"
                            );
                        } else {
                            debug!("media reaper found nothing to reclaim");
                        }
                    }
                    Err(e) => error!(error = %e, "media reaper sweep failed"),
                },
            }
        }

        info!("media reaper stopped");
    }

    /// Run one sweep over up to one batch of expired records.
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let expired = self
            .repo
            .expired_media(Utc::now(), self.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };

        for record in &expired {
            match self.reclaim(record).await {
                Ok(()) => report.reclaimed += 1,
                Err(MediaError::CleanupFailure(MediaStatus::FailedCleanupFile)) => {
                    report.failed_file += 1
                }
                Err(MediaError::CleanupFailure(_)) => report.failed_db += 1,
                Err(e) => {
                    warn!(media_id = %record.id, error = %e, "unexpected reaper failure");
                    report.failed_db += 1;
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(&report);
        }
        Ok(report)
    }

    /// Remove one record: file first, row second.
    async fn reclaim(&self, record: &MediaRecord) -> Result<(), MediaError> {
        if let Err(e) = self.storage.delete(&record.storage_path).await {
            warn!(media_id = %record.id, path = %record.storage_path, error = %e, "failed to delete expired media file");
            self.mark(record, MediaStatus::FailedCleanupFile).await;
            return Err(MediaError::CleanupFailure(MediaStatus::FailedCleanupFile));
        }

        match self
            .repo
            .delete_media(record.id, MediaStatus::Uploaded)
            .await
        {
            Ok(CasOutcome::Applied) => {
                debug!(media_id = %record.id, "expired media reclaimed");
                Ok(())
            }
            Ok(CasOutcome::PreconditionFailed) => {
                // Expired rows can no longer be linked, so this is a row
                // another sweep already handled.
                warn!(media_id = %record.id, "expired media changed before deletion");
                Ok(())
            }
            Err(e) => {
                warn!(media_id = %record.id, error = %e, "failed to delete expired media row");
                self.mark(record, MediaStatus::FailedCleanupDb).await;
                Err(MediaError::CleanupFailure(MediaStatus::FailedCleanupDb))
            }
        }
    }

    async fn mark(&self, record: &MediaRecord, status: MediaStatus) {
        match self
            .repo
            .transition_media(record.id, MediaStatus::Uploaded, status, Utc::now())
            .await
        {
            Ok(CasOutcome::Applied) => info!(media_id = %record.id, %status, "media marked"),
            Ok(CasOutcome::PreconditionFailed) => {
                warn!(media_id = %record.id, %status, "media no longer uploaded, not marked")
            }
            Err(e) => error!(media_id = %record.id, %status, error = %e, "failed to mark media"),
        }
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use chrono::Duration as TimeDelta;
    use uuid::Uuid;

    use super::*;
    use crate::media::{LocalMediaStorage, StorageWriter};
    use crate::repository::InMemoryMediaRepository;

    /// Storage that refuses to delete anything.
    struct StuckStorage;

    #[async_trait]
    impl MediaStorage for StuckStorage {
        async fn create(&self, _path: &str) -> Result<StorageWriter> {
            bail!("read-only")
        }
        async fn read(&self, _path: &str) -> Result<Vec<u8>> {
            bail!("read-only")
        }
        async fn delete(&self, _path: &str) -> Result<()> {
            bail!("permission denied")
        }
        async fn exists(&self, _path: &str) -> Result<bool> {
            Ok(true)
        }
        fn public_url(&self, path: &str) -> String {
            format!("/uploads/{path}")
        }
    }

    fn uploaded(expires_in: TimeDelta) -> MediaRecord {
        let now = Utc::now();
        let id = Uuid::now_v7();
        MediaRecord {
            id,
            user_id: Uuid::now_v7(),
            original_filename: "old.jpg".into(),
            stored_filename: format!("{}.jpg", id.simple()),
            storage_path: format!("{}.jpg", id.simple()),
            declared_type: "image/jpeg".into(),
            file_type: "image/jpeg".into(),
            file_size_bytes: 3,
            status: MediaStatus::Uploaded,
            created_at: now - TimeDelta::hours(1),
            updated_at: now - TimeDelta::hours(1),
            expires_at: Some(now + expires_in),
            consumer: None,
        }
    }

    #[tokio::test]
    async fn test_only_expired_media_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemoryMediaRepository::new();
        let expired = uploaded(TimeDelta::minutes(-1));
        let live = uploaded(TimeDelta::minutes(10));
        for record in [&expired, &live] {
            repo.insert_media(record).await.unwrap();
            std::fs::write(dir.path().join(&record.storage_path), b"abc").unwrap();
        }

        let reaper = Reaper::new(
            Arc::new(repo.clone()),
            Arc::new(LocalMediaStorage::new(dir.path(), "/uploads")),
        );
        let report = reaper.sweep().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.reclaimed, 1);
        assert!(repo.find_media(expired.id).await.unwrap().is_none());
        assert!(!dir.path().join(&expired.storage_path).exists());
        assert!(repo.find_media(live.id).await.unwrap().is_some());
        assert!(dir.path().join(&live.storage_path).exists());
    }

    #[tokio::test]
    async fn test_file_failure_keeps_row() {
        let repo = InMemoryMediaRepository::new();
        let expired = uploaded(TimeDelta::minutes(-1));
        repo.insert_media(&expired).await.unwrap();

        let reaper = Reaper::new(Arc::new(repo.clone()), Arc::new(StuckStorage));
        let report = reaper.sweep().await.unwrap();

        assert_eq!(report.failed_file, 1);
        let record = repo.find_media(expired.id).await.unwrap().unwrap();
        assert_eq!(record.status, MediaStatus::FailedCleanupFile);

        // Marked rows are out of the reaper's reach.
        assert_eq!(reaper.sweep().await.unwrap().examined, 0);
    }

    #[tokio::test]
    async fn test_row_failure_is_marked() {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemoryMediaRepository::new();
        let expired = uploaded(TimeDelta::minutes(-1));
        repo.insert_media(&expired).await.unwrap();
        repo.fail_deletes(true);

        let reaper = Reaper::new(
            Arc::new(repo.clone()),
            Arc::new(LocalMediaStorage::new(dir.path(), "/uploads")),
        );
        let report = reaper.sweep().await.unwrap();

        assert_eq!(report.failed_db, 1);
        let record = repo.find_media(expired.id).await.unwrap().unwrap();
        assert_eq!(record.status, MediaStatus::FailedCleanupDb);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_a_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemoryMediaRepository::new();
        for _ in 0..5 {
            repo.insert_media(&uploaded(TimeDelta::minutes(-1)))
                .await
                .unwrap();
        }

        let reaper = Reaper::new(
            Arc::new(repo.clone()),
            Arc::new(LocalMediaStorage::new(dir.path(), "/uploads")),
        )
        .with_batch_size(2);

        assert_eq!(reaper.sweep().await.unwrap().reclaimed, 2);
        assert_eq!(repo.media().await.len(), 3);
    }

    #[tokio::test]
    async fn test_first_sweep_waits_one_interval() {
        let repo = InMemoryMediaRepository::new();
        let dir = tempfile::tempdir().unwrap();
        let record = uploaded(TimeDelta::minutes(-5));
        repo.insert_media(&record).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = Reaper::new(
            Arc::new(repo.clone()),
            Arc::new(LocalMediaStorage::new(dir.path(), "/uploads")),
        )
        .with_interval(Duration::from_secs(3600))
        .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(repo.media().await.len(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let repo = InMemoryMediaRepository::new();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let handle = Reaper::new(
            Arc::new(repo),
            Arc::new(LocalMediaStorage::new(dir.path(), "/uploads")),
        )
        .with_interval(Duration::from_millis(10))
        .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
