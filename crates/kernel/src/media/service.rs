//! Media lifecycle operations.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cleanup::detach;
use super::error::{MediaError, MediaResult};
use super::model::{
    MediaInfo, MediaRecord, MediaStatus, UploadResponse, media_id_of, stored_filename_for,
};
use super::storage::{MediaStorage, StorageWriter};
use super::MediaSettings;
use crate::repository::{CasOutcome, MediaRepository};

/// Message returned with every successful upload.
pub const UPLOAD_MESSAGE: &str = "File uploaded. Keep this ID for post creation.";

/// Owns the media lifecycle: staging, finalize, ownership-checked reads and
/// failure marking.
pub struct MediaService {
    repo: Arc<dyn MediaRepository>,
    storage: Arc<dyn MediaStorage>,
    settings: MediaSettings,
}

impl MediaService {
    pub fn new(
        repo: Arc<dyn MediaRepository>,
        storage: Arc<dyn MediaStorage>,
        settings: MediaSettings,
    ) -> Self {
        Self {
            repo,
            storage,
            settings,
        }
    }

    pub fn settings(&self) -> &MediaSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<dyn MediaStorage> {
        &self.storage
    }

    pub fn repository(&self) -> &Arc<dyn MediaRepository> {
        &self.repo
    }

    /// Reserve an id and storage path for a new upload.
    ///
    /// Opens the storage target exclusively, then persists a pending record.
    /// If the record cannot be persisted the empty target is removed.
    pub async fn stage(
        &self,
        owner: Uuid,
        original_filename: &str,
        declared_type: &str,
    ) -> MediaResult<(MediaRecord, StorageWriter)> {
        let id = Uuid::now_v7();
        let stored_filename = stored_filename_for(id, original_filename);
        let now = Utc::now();

        let writer = self
            .storage
            .create(&stored_filename)
            .await
            .map_err(MediaError::WriteFailure)?;

        let record = MediaRecord {
            id,
            user_id: owner,
            original_filename: original_filename.to_string(),
            stored_filename: stored_filename.clone(),
            storage_path: stored_filename,
            declared_type: declared_type.to_string(),
            file_type: declared_type.to_string(),
            file_size_bytes: 0,
            status: MediaStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: Some(now + self.settings.ttl),
            consumer: None,
        };

        if let Err(e) = self.repo.insert_media(&record).await {
            drop(writer);
            if let Err(cleanup) = self.storage.delete(&record.storage_path).await {
                warn!(media_id = %id, error = %cleanup, "failed to remove unused storage target");
            }
            return Err(MediaError::Internal(e));
        }

        debug!(media_id = %id, owner = %owner, path = %record.storage_path, "staged upload");
        Ok((record, writer))
    }

    /// `pending -> uploaded` with the confirmed size and type.
    pub async fn finalize(
        &self,
        id: Uuid,
        owner: Uuid,
        size: u64,
        file_type: &str,
    ) -> MediaResult<MediaRecord> {
        let mut record = self.owned(id, owner).await?;
        if record.status != MediaStatus::Pending {
            return Err(MediaError::InvalidState {
                expected: MediaStatus::Pending,
                actual: record.status,
            });
        }

        let size = i64::try_from(size).map_err(|e| MediaError::Internal(e.into()))?;
        let now = Utc::now();
        match self
            .repo
            .finalize_media(id, owner, size, file_type, now)
            .await?
        {
            CasOutcome::Applied => {}
            CasOutcome::PreconditionFailed => {
                // Lost a race with another writer; report what it left behind.
                let actual = self
                    .repo
                    .find_media(id)
                    .await?
                    .ok_or(MediaError::NotFoundOrForbidden)?
                    .status;
                return Err(MediaError::InvalidState {
                    expected: MediaStatus::Pending,
                    actual,
                });
            }
        }

        record.status = MediaStatus::Uploaded;
        record.file_size_bytes = size;
        record.file_type = file_type.to_string();
        record.updated_at = now;

        info!(media_id = %id, size, file_type, "media uploaded");
        Ok(record)
    }

    /// The only read used before linking: an owned, uploaded, unexpired
    /// record.
    pub async fn get_for_consumption(&self, id: Uuid, owner: Uuid) -> MediaResult<MediaRecord> {
        let record = self.owned(id, owner).await?;
        if !record.is_linkable_at(Utc::now()) {
            debug!(media_id = %id, status = %record.status, "media not linkable");
            return Err(MediaError::NotReady);
        }
        Ok(record)
    }

    /// Public view of any record owned by `owner`.
    pub async fn media_info(&self, id: Uuid, owner: Uuid) -> MediaResult<MediaInfo> {
        let record = self.owned(id, owner).await?;
        Ok(MediaInfo {
            file_url: self.public_url(&record),
            id: record.id,
            original_filename: record.original_filename,
            file_type: record.file_type,
            size: record.file_size_bytes,
            status: record.status,
            created_at: record.created_at,
            expires_at: record.expires_at,
            consumer: record.consumer,
        })
    }

    /// Access URL of a record's stored file.
    pub fn public_url(&self, record: &MediaRecord) -> String {
        self.storage.public_url(&record.stored_filename)
    }

    /// Response body for a finalized upload.
    pub fn upload_response(&self, record: &MediaRecord) -> UploadResponse {
        UploadResponse {
            id: record.id,
            original_filename: record.original_filename.clone(),
            file_type: record.file_type.clone(),
            size: record.file_size_bytes,
            file_url: self.public_url(record),
            expires_at: record.expires_at,
            message: UPLOAD_MESSAGE.to_string(),
        }
    }

    /// Mark a pending record failed on a detached task.
    pub fn mark_failed(&self, id: Uuid, status: MediaStatus) -> JoinHandle<()> {
        let repo = self.repo.clone();
        detach("mark_failed", id, async move {
            let outcome = repo
                .transition_media(id, MediaStatus::Pending, status, Utc::now())
                .await?;
            if !outcome.is_applied() {
                anyhow::bail!("record no longer pending, not marked {status}");
            }
            info!(media_id = %id, %status, "media marked failed");
            Ok(())
        })
    }

    /// Remove a stored file on a detached task.
    pub fn remove_file(&self, id: Uuid, path: String) -> JoinHandle<()> {
        let storage = self.storage.clone();
        detach("remove_file", id, async move { storage.delete(&path).await })
    }

    /// Remove an over-cap upload entirely: its partial file and its pending
    /// record. The row goes even when the file cannot be removed.
    pub async fn discard(&self, record: &MediaRecord) -> MediaResult<()> {
        if let Err(e) = self.storage.delete(&record.storage_path).await {
            warn!(media_id = %record.id, path = %record.storage_path, error = %e, "failed to remove discarded upload file");
        }

        if !self
            .repo
            .delete_media(record.id, MediaStatus::Pending)
            .await?
            .is_applied()
        {
            warn!(media_id = %record.id, "discarded upload was no longer pending");
        }

        debug!(media_id = %record.id, "discarded upload");
        Ok(())
    }

    /// The record behind a stored filename, if its file is complete.
    ///
    /// Files of pending and failed records are never served.
    pub async fn servable(&self, stored_filename: &str) -> MediaResult<Option<MediaRecord>> {
        let Some(id) = media_id_of(stored_filename) else {
            return Ok(None);
        };
        Ok(self
            .repo
            .find_media(id)
            .await?
            .filter(|r| r.stored_filename == stored_filename && r.is_servable()))
    }

    /// Fetch a record, hiding it from anyone but its owner.
    async fn owned(&self, id: Uuid, owner: Uuid) -> MediaResult<MediaRecord> {
        match self.repo.find_media(id).await? {
            Some(record) if record.user_id == owner => Ok(record),
            _ => Err(MediaError::NotFoundOrForbidden),
        }
    }
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::media::LocalMediaStorage;
    use crate::repository::InMemoryMediaRepository;

    fn service() -> (MediaService, InMemoryMediaRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemoryMediaRepository::new();
        let storage = LocalMediaStorage::new(dir.path(), "/uploads");
        let service = MediaService::new(
            Arc::new(repo.clone()),
            Arc::new(storage),
            MediaSettings::default(),
        );
        (service, repo, dir)
    }

    #[tokio::test]
    async fn test_stage_persists_pending_record_with_expiry() {
        let (service, repo, dir) = service();
        let owner = Uuid::now_v7();
        let (record, mut writer) = service.stage(owner, "cat.png", "image/png").await.unwrap();
        writer.shutdown().await.unwrap();

        let stored = repo.find_media(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MediaStatus::Pending);
        assert_eq!(stored.user_id, owner);
        assert!(stored.expires_at.unwrap() > stored.created_at);
        assert!(dir.path().join(&stored.storage_path).exists());
    }

    #[tokio::test]
    async fn test_finalize_twice_is_invalid_state() {
        let (service, repo, _dir) = service();
        let owner = Uuid::now_v7();
        let (record, _writer) = service.stage(owner, "a.jpg", "image/jpeg").await.unwrap();

        service
            .finalize(record.id, owner, 50, "image/jpeg")
            .await
            .unwrap();
        let err = service
            .finalize(record.id, owner, 999, "image/png")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MediaError::InvalidState {
                actual: MediaStatus::Uploaded,
                ..
            }
        ));

        let stored = repo.find_media(record.id).await.unwrap().unwrap();
        assert_eq!(stored.file_size_bytes, 50);
        assert_eq!(stored.file_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_finalize_by_stranger_is_hidden() {
        let (service, _repo, _dir) = service();
        let (record, _writer) = service
            .stage(Uuid::now_v7(), "a.jpg", "image/jpeg")
            .await
            .unwrap();
        let err = service
            .finalize(record.id, Uuid::now_v7(), 50, "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NotFoundOrForbidden));
    }

    #[tokio::test]
    async fn test_pending_media_is_not_ready() {
        let (service, _repo, _dir) = service();
        let owner = Uuid::now_v7();
        let (record, _writer) = service.stage(owner, "a.jpg", "image/jpeg").await.unwrap();
        let err = service
            .get_for_consumption(record.id, owner)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NotReady));
    }

    #[tokio::test]
    async fn test_mark_failed_only_moves_pending() {
        let (service, repo, _dir) = service();
        let owner = Uuid::now_v7();
        let (record, _writer) = service.stage(owner, "a.sh", "").await.unwrap();

        service
            .mark_failed(record.id, MediaStatus::FailedSniff)
            .await
            .unwrap();
        let stored = repo.find_media(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MediaStatus::FailedSniff);

        service
            .mark_failed(record.id, MediaStatus::FailedCopy)
            .await
            .unwrap();
        let stored = repo.find_media(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MediaStatus::FailedSniff);
    }

    #[tokio::test]
    async fn test_discard_removes_file_and_row() {
        let (service, repo, dir) = service();
        let (record, _writer) = service
            .stage(Uuid::now_v7(), "big.mp4", "video/mp4")
            .await
            .unwrap();
        service.discard(&record).await.unwrap();

        assert!(repo.find_media(record.id).await.unwrap().is_none());
        assert!(!dir.path().join(&record.storage_path).exists());
    }

    #[tokio::test]
    async fn test_only_complete_files_are_servable() {
        let (service, _repo, _dir) = service();
        let owner = Uuid::now_v7();
        let (record, _writer) = service.stage(owner, "a.jpg", "image/jpeg").await.unwrap();
        assert!(
            service
                .servable(&record.stored_filename)
                .await
                .unwrap()
                .is_none()
        );

        service
            .finalize(record.id, owner, 50, "image/jpeg")
            .await
            .unwrap();
        let served = service.servable(&record.stored_filename).await.unwrap();
        assert_eq!(served.map(|r| r.id), Some(record.id));

        let (failed, _writer) = service.stage(owner, "b.jpg", "image/jpeg").await.unwrap();
        service
            .mark_failed(failed.id, MediaStatus::FailedCopy)
            .await
            .unwrap();
        assert!(
            service
                .servable(&failed.stored_filename)
                .await
                .unwrap()
                .is_none()
        );
    }

    /// Local storage whose deletes always fail.
    struct Undeletable(LocalMediaStorage);

    #[async_trait::async_trait]
    impl MediaStorage for Undeletable {
        async fn create(&self, path: &str) -> anyhow::Result<StorageWriter> {
            self.0.create(path).await
        }
        async fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
            self.0.read(path).await
        }
        async fn delete(&self, _path: &str) -> anyhow::Result<()> {
            anyhow::bail!("permission denied")
        }
        async fn exists(&self, path: &str) -> anyhow::Result<bool> {
            self.0.exists(path).await
        }
        fn public_url(&self, path: &str) -> String {
            self.0.public_url(path)
        }
    }

    #[tokio::test]
    async fn test_discard_removes_row_when_file_delete_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemoryMediaRepository::new();
        let service = MediaService::new(
            Arc::new(repo.clone()),
            Arc::new(Undeletable(LocalMediaStorage::new(dir.path(), "/uploads"))),
            MediaSettings::default(),
        );
        let (record, _writer) = service
            .stage(Uuid::now_v7(), "big.mp4", "video/mp4")
            .await
            .unwrap();

        service.discard(&record).await.unwrap();
        assert!(repo.media().await.is_empty());
    }

    #[tokio::test]
    async fn test_media_info_url() {
        let (service, _repo, _dir) = service();
        let owner = Uuid::now_v7();
        let (record, _writer) = service.stage(owner, "a.png", "image/png").await.unwrap();
        let info = service.media_info(record.id, owner).await.unwrap();
        assert_eq!(info.file_url, format!("/uploads/{}", record.stored_filename));
        assert_eq!(info.status, MediaStatus::Pending);
    }
}
