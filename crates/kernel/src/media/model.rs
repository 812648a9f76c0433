//! Media record and lifecycle status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a media record.
///
/// Transitions only move forward:
///
/// ```text
/// pending  -> uploaded | failed_sniff | failed_copy
/// uploaded -> used | failed_cleanup_file | failed_cleanup_db
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    /// Staged at intake, body not yet confirmed.
    Pending,
    /// Written and type-confirmed, waiting to be linked. Subject to expiry.
    Uploaded,
    /// Attached to a consuming entity. Never reclaimed.
    Used,
    /// Sniffed content was not an allowed media type.
    FailedSniff,
    /// Writing the body to storage failed.
    FailedCopy,
    /// The reaper could not delete the stored file.
    FailedCleanupFile,
    /// The reaper deleted the file but not the row.
    FailedCleanupDb,
}

impl MediaStatus {
    /// Database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            MediaStatus::Pending => "pending",
            MediaStatus::Uploaded => "uploaded",
            MediaStatus::Used => "used",
            MediaStatus::FailedSniff => "failed_sniff",
            MediaStatus::FailedCopy => "failed_copy",
            MediaStatus::FailedCleanupFile => "failed_cleanup_file",
            MediaStatus::FailedCleanupDb => "failed_cleanup_db",
        }
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(self, next: MediaStatus) -> bool {
        use MediaStatus::*;
        matches!(
            (self, next),
            (Pending, Uploaded | FailedSniff | FailedCopy)
                | (Uploaded, Used | FailedCleanupFile | FailedCleanupDb)
        )
    }

    /// Terminal failure statuses, kept visible for operators.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            MediaStatus::FailedSniff
                | MediaStatus::FailedCopy
                | MediaStatus::FailedCleanupFile
                | MediaStatus::FailedCleanupDb
        )
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => MediaStatus::Pending,
            "uploaded" => MediaStatus::Uploaded,
            "used" => MediaStatus::Used,
            "failed_sniff" => MediaStatus::FailedSniff,
            "failed_copy" => MediaStatus::FailedCopy,
            "failed_cleanup_file" => MediaStatus::FailedCleanupFile,
            "failed_cleanup_db" => MediaStatus::FailedCleanupDb,
            other => anyhow::bail!("unknown media status: {other}"),
        })
    }
}

/// The entity a used media record is attached to.
///
/// A record references at most one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MediaConsumer {
    /// Image of a post.
    Post(Uuid),
    /// Profile picture of a user.
    ProfilePicture(Uuid),
}

/// A persisted media record.
#[derive(Debug, Clone, Serialize)]
pub struct MediaRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Client-supplied name. Display only.
    pub original_filename: String,
    pub stored_filename: String,
    /// Path relative to the storage root.
    pub storage_path: String,
    /// Content type declared by the client, possibly empty.
    pub declared_type: String,
    /// Sniffed content type. Provisional until uploaded.
    pub file_type: String,
    /// Byte size. Zero until uploaded.
    pub file_size_bytes: i64,
    pub status: MediaStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub consumer: Option<MediaConsumer>,
}

impl MediaRecord {
    /// Whether the stored file is complete and may be served.
    pub fn is_servable(&self) -> bool {
        matches!(self.status, MediaStatus::Uploaded | MediaStatus::Used)
    }

    /// Whether the record can still be linked at `now`.
    pub fn is_linkable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MediaStatus::Uploaded && self.expires_at.is_some_and(|at| at > now)
    }
}

/// Response to a completed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub original_filename: String,
    pub file_type: String,
    pub size: i64,
    pub file_url: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
}

/// Owner-facing view of a media record.
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub id: Uuid,
    pub original_filename: String,
    pub file_type: String,
    pub size: i64,
    pub status: MediaStatus,
    pub file_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<MediaConsumer>,
}

/// Stored filename for a media id: the id plus the sanitized extension of the
/// original name.
pub fn stored_filename_for(id: Uuid, original_filename: &str) -> String {
    match extension_of(original_filename) {
        Some(ext) => format!("{}.{}", id.simple(), ext),
        None => id.simple().to_string(),
    }
}

/// Media id encoded in a stored filename.
pub fn media_id_of(stored_filename: &str) -> Option<Uuid> {
    let stem = stored_filename
        .split_once('.')
        .map_or(stored_filename, |(stem, _)| stem);
    Uuid::try_parse(stem).ok()
}

fn extension_of(filename: &str) -> Option<String> {
    let name = std::path::Path::new(filename).file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
