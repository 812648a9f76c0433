//! In-memory persistence.
//!
//! Mirrors the PostgreSQL semantics, including compare-and-swap writes and
//! all-or-nothing units of work, without a database. Units of work are
//! serialized: a unit holds the store lock from `begin` until it commits or
//! is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CasOutcome, LinkUnit, MediaRepository, ensure_transition};
use crate::media::{MediaConsumer, MediaRecord, MediaStatus};
use crate::post::{PostRecord, ProfilePicture};

#[derive(Debug, Clone, Default)]
struct Tables {
    media: HashMap<Uuid, MediaRecord>,
    posts: HashMap<Uuid, PostRecord>,
    profile_pictures: HashMap<Uuid, ProfilePicture>,
}

/// Media repository holding everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMediaRepository {
    tables: Arc<Mutex<Tables>>,
    fail_deletes: Arc<AtomicBool>,
}

impl InMemoryMediaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `delete_media` call fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// All media records.
    pub async fn media(&self) -> Vec<MediaRecord> {
        self.tables.lock().await.media.values().cloned().collect()
    }

    /// All posts.
    pub async fn posts(&self) -> Vec<PostRecord> {
        self.tables.lock().await.posts.values().cloned().collect()
    }

    /// Current profile picture of `user_id`.
    pub async fn profile_picture(&self, user_id: Uuid) -> Option<ProfilePicture> {
        self.tables
            .lock()
            .await
            .profile_pictures
            .get(&user_id)
            .cloned()
    }
}

#[async_trait]
impl MediaRepository for InMemoryMediaRepository {
    async fn insert_media(&self, record: &MediaRecord) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.media.contains_key(&record.id) {
            bail!("duplicate media id {}", record.id);
        }
        tables.media.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_media(&self, id: Uuid) -> Result<Option<MediaRecord>> {
        Ok(self.tables.lock().await.media.get(&id).cloned())
    }

    async fn finalize_media(
        &self,
        id: Uuid,
        owner: Uuid,
        size: i64,
        file_type: &str,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(record) = tables
            .media
            .get_mut(&id)
            .filter(|r| r.user_id == owner && r.status == MediaStatus::Pending)
        else {
            return Ok(CasOutcome::PreconditionFailed);
        };

        record.status = MediaStatus::Uploaded;
        record.file_size_bytes = size;
        record.file_type = file_type.to_string();
        record.updated_at = at;
        Ok(CasOutcome::Applied)
    }

    async fn transition_media(
        &self,
        id: Uuid,
        from: MediaStatus,
        to: MediaStatus,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome> {
        ensure_transition(from, to)?;

        let mut tables = self.tables.lock().await;
        let Some(record) = tables.media.get_mut(&id).filter(|r| r.status == from) else {
            return Ok(CasOutcome::PreconditionFailed);
        };

        record.status = to;
        record.updated_at = at;
        Ok(CasOutcome::Applied)
    }

    async fn delete_media(&self, id: Uuid, expected: MediaStatus) -> Result<CasOutcome> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("injected delete failure");
        }

        let mut tables = self.tables.lock().await;
        if !tables.media.get(&id).is_some_and(|r| r.status == expected) {
            return Ok(CasOutcome::PreconditionFailed);
        }
        tables.media.remove(&id);
        Ok(CasOutcome::Applied)
    }

    async fn expired_media(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<MediaRecord>> {
        let tables = self.tables.lock().await;
        let mut expired: Vec<MediaRecord> = tables
            .media
            .values()
            .filter(|r| r.status == MediaStatus::Uploaded && r.expires_at.is_some_and(|at| at < now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(expired)
    }

    async fn begin(&self) -> Result<Box<dyn LinkUnit>> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryLinkUnit { guard, staged }))
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Unit of work holding the store lock and a staged copy of the tables.
struct MemoryLinkUnit {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl LinkUnit for MemoryLinkUnit {
    async fn insert_post(&mut self, post: &PostRecord) -> Result<()> {
        if self.staged.posts.contains_key(&post.id) {
            bail!("duplicate post id {}", post.id);
        }
        self.staged.posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn upsert_profile_picture(&mut self, picture: &ProfilePicture) -> Result<()> {
        self.staged
            .profile_pictures
            .insert(picture.user_id, picture.clone());
        Ok(())
    }

    async fn link_media(
        &mut self,
        id: Uuid,
        owner: Uuid,
        consumer: MediaConsumer,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome> {
        let Some(record) = self
            .staged
            .media
            .get_mut(&id)
            .filter(|r| r.user_id == owner && r.is_linkable_at(at))
        else {
            return Ok(CasOutcome::PreconditionFailed);
        };

        record.status = MediaStatus::Used;
        record.consumer = Some(consumer);
        record.expires_at = None;
        record.updated_at = at;
        Ok(CasOutcome::Applied)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryLinkUnit { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
