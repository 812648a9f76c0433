//! Persistence gateway for media records and their consumers.
//!
//! Every status change is a compare-and-swap keyed on the expected source
//! status. A write that matches no row reports
//! [`CasOutcome::PreconditionFailed`]; callers decide what that means and
//! never treat it as success.

mod memory;
mod postgres;

pub use memory::InMemoryMediaRepository;
pub use postgres::PgMediaRepository;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::media::{MediaConsumer, MediaRecord, MediaStatus};
use crate::post::{PostRecord, ProfilePicture};

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum CasOutcome {
    /// The row matched and was written.
    Applied,
    /// No row matched the expected state.
    PreconditionFailed,
}

impl CasOutcome {
    /// Map an affected-row count.
    pub fn from_rows(rows: u64) -> Self {
        if rows > 0 {
            CasOutcome::Applied
        } else {
            CasOutcome::PreconditionFailed
        }
    }

    pub fn is_applied(self) -> bool {
        self == CasOutcome::Applied
    }
}

/// Persistence for media records.
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Insert a new record.
    async fn insert_media(&self, record: &MediaRecord) -> Result<()>;

    /// Fetch a record by id.
    async fn find_media(&self, id: Uuid) -> Result<Option<MediaRecord>>;

    /// `pending -> uploaded` for `owner`, writing the confirmed size and type.
    async fn finalize_media(
        &self,
        id: Uuid,
        owner: Uuid,
        size: i64,
        file_type: &str,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome>;

    /// Move a record from `from` to `to`.
    ///
    /// Fails without touching the store if the transition is not legal.
    async fn transition_media(
        &self,
        id: Uuid,
        from: MediaStatus,
        to: MediaStatus,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome>;

    /// Delete a record that is still in `expected` status.
    async fn delete_media(&self, id: Uuid, expected: MediaStatus) -> Result<CasOutcome>;

    /// Uploaded records whose expiry is before `now`, oldest first.
    async fn expired_media(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<MediaRecord>>;

    /// Open a unit of work for linking media to a new consumer.
    async fn begin(&self) -> Result<Box<dyn LinkUnit>>;

    /// Whether the store is reachable.
    async fn ping(&self) -> bool;
}

/// An open unit of work. Nothing is visible to other callers until
/// [`LinkUnit::commit`]; dropping without committing rolls back.
#[async_trait]
pub trait LinkUnit: Send {
    /// Insert a post.
    async fn insert_post(&mut self, post: &PostRecord) -> Result<()>;

    /// Insert or replace a user's profile picture.
    async fn upsert_profile_picture(&mut self, picture: &ProfilePicture) -> Result<()>;

    /// `uploaded -> used` for `owner`, attaching `consumer` and clearing the
    /// expiry. Only matches records that have not expired at `at`.
    async fn link_media(
        &mut self,
        id: Uuid,
        owner: Uuid,
        consumer: MediaConsumer,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome>;

    /// Make all writes visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Reject transitions the lifecycle does not allow.
fn ensure_transition(from: MediaStatus, to: MediaStatus) -> Result<()> {
    if !from.can_transition_to(to) {
        bail!("illegal media transition {from} -> {to}");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_from_rows() {
        assert_eq!(CasOutcome::from_rows(0), CasOutcome::PreconditionFailed);
        assert_eq!(CasOutcome::from_rows(1), CasOutcome::Applied);
        assert!(CasOutcome::from_rows(3).is_applied());
    }

    #[test]
    fn test_ensure_transition() {
        assert!(ensure_transition(MediaStatus::Pending, MediaStatus::FailedSniff).is_ok());
        assert!(ensure_transition(MediaStatus::Used, MediaStatus::Pending).is_err());
    }
}
