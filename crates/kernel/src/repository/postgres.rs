//! PostgreSQL persistence.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{CasOutcome, LinkUnit, MediaRepository, ensure_transition};
use crate::media::{MediaConsumer, MediaRecord, MediaStatus};
use crate::post::{PostRecord, ProfilePicture};

const MEDIA_COLUMNS: &str = "id, user_id, original_filename, stored_filename, storage_path, \
     declared_type, file_type, file_size_bytes, status, created_at, updated_at, expires_at, \
     post_id, profile_picture_user_id";

/// Database row for media.
#[derive(sqlx::FromRow)]
struct MediaRow {
    id: Uuid,
    user_id: Uuid,
    original_filename: String,
    stored_filename: String,
    storage_path: String,
    declared_type: String,
    file_type: String,
    file_size_bytes: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    post_id: Option<Uuid>,
    profile_picture_user_id: Option<Uuid>,
}

impl TryFrom<MediaRow> for MediaRecord {
    type Error = anyhow::Error;

    fn try_from(row: MediaRow) -> Result<Self> {
        let consumer = match (row.post_id, row.profile_picture_user_id) {
            (Some(post), None) => Some(MediaConsumer::Post(post)),
            (None, Some(user)) => Some(MediaConsumer::ProfilePicture(user)),
            (None, None) => None,
            (Some(_), Some(_)) => anyhow::bail!("media {} has two consumers", row.id),
        };

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            original_filename: row.original_filename,
            stored_filename: row.stored_filename,
            storage_path: row.storage_path,
            declared_type: row.declared_type,
            file_type: row.file_type,
            file_size_bytes: row.file_size_bytes,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            consumer,
        })
    }
}

/// Media repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgMediaRepository {
    pool: PgPool,
}

impl PgMediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaRepository for PgMediaRepository {
    async fn insert_media(&self, record: &MediaRecord) -> Result<()> {
        let (post_id, profile_picture_user_id) = consumer_columns(record.consumer);

        sqlx::query(
            r#"
            INSERT INTO media (id, user_id, original_filename, stored_filename, storage_path,
                declared_type, file_type, file_size_bytes, status, created_at, updated_at,
                expires_at, post_id, profile_picture_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.original_filename)
        .bind(&record.stored_filename)
        .bind(&record.storage_path)
        .bind(&record.declared_type)
        .bind(&record.file_type)
        .bind(record.file_size_bytes)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .bind(post_id)
        .bind(profile_picture_user_id)
        .execute(&self.pool)
        .await
        .context("failed to create media record")?;

        Ok(())
    }

    async fn find_media(&self, id: Uuid) -> Result<Option<MediaRecord>> {
        let row: Option<MediaRow> =
            sqlx::query_as(&format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to fetch media")?;

        row.map(MediaRecord::try_from).transpose()
    }

    async fn finalize_media(
        &self,
        id: Uuid,
        owner: Uuid,
        size: i64,
        file_type: &str,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE media
            SET status = $4, file_size_bytes = $5, file_type = $6, updated_at = $7
            WHERE id = $1 AND user_id = $2 AND status = $3
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(MediaStatus::Pending.as_str())
        .bind(MediaStatus::Uploaded.as_str())
        .bind(size)
        .bind(file_type)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("failed to finalize media")?;

        Ok(CasOutcome::from_rows(result.rows_affected()))
    }

    async fn transition_media(
        &self,
        id: Uuid,
        from: MediaStatus,
        to: MediaStatus,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome> {
        ensure_transition(from, to)?;

        let result = sqlx::query(
            "UPDATE media SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .context("failed to update media status")?;

        Ok(CasOutcome::from_rows(result.rows_affected()))
    }

    async fn delete_media(&self, id: Uuid, expected: MediaStatus) -> Result<CasOutcome> {
        let result = sqlx::query("DELETE FROM media WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await
            .context("failed to delete media record")?;

        Ok(CasOutcome::from_rows(result.rows_affected()))
    }

    async fn expired_media(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<MediaRecord>> {
        let rows: Vec<MediaRow> = sqlx::query_as(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media \
             WHERE status = $1 AND expires_at < $2 \
             ORDER BY expires_at ASC LIMIT $3"
        ))
        .bind(MediaStatus::Uploaded.as_str())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch expired media")?;

        rows.into_iter().map(MediaRecord::try_from).collect()
    }

    async fn begin(&self) -> Result<Box<dyn LinkUnit>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to start transaction")?;
        Ok(Box::new(PgLinkUnit { tx }))
    }

    async fn ping(&self) -> bool {
        crate::db::check_health(&self.pool).await
    }
}

/// Unit of work over a PostgreSQL transaction.
struct PgLinkUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LinkUnit for PgLinkUnit {
    async fn insert_post(&mut self, post: &PostRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, description, image_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(post.id)
        .bind(post.user_id)
        .bind(&post.description)
        .bind(&post.image_url)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&mut *self.tx)
        .await
        .context("failed to insert post")?;

        Ok(())
    }

    async fn upsert_profile_picture(&mut self, picture: &ProfilePicture) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profile_pictures (user_id, media_id, image_url, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET media_id = EXCLUDED.media_id,
                image_url = EXCLUDED.image_url,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(picture.user_id)
        .bind(picture.media_id)
        .bind(&picture.image_url)
        .bind(picture.updated_at)
        .execute(&mut *self.tx)
        .await
        .context("failed to save profile picture")?;

        Ok(())
    }

    async fn link_media(
        &mut self,
        id: Uuid,
        owner: Uuid,
        consumer: MediaConsumer,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome> {
        let (post_id, profile_picture_user_id) = consumer_columns(Some(consumer));

        let result = sqlx::query(
            r#"
            UPDATE media
            SET status = $4, post_id = $5, profile_picture_user_id = $6,
                expires_at = NULL, updated_at = $7
            WHERE id = $1 AND user_id = $2 AND status = $3 AND expires_at > $7
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(MediaStatus::Uploaded.as_str())
        .bind(MediaStatus::Used.as_str())
        .bind(post_id)
        .bind(profile_picture_user_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .context("failed to link media")?;

        Ok(CasOutcome::from_rows(result.rows_affected()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("failed to roll back transaction")
    }
}

fn consumer_columns(consumer: Option<MediaConsumer>) -> (Option<Uuid>, Option<Uuid>) {
    match consumer {
        Some(MediaConsumer::Post(id)) => (Some(id), None),
        Some(MediaConsumer::ProfilePicture(user)) => (None, Some(user)),
        None => (None, None),
    }
}

impl std::fmt::Debug for PgMediaRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMediaRepository").finish()
    }
}
