//! Media lifecycle: intake, sniffing, storage and expiry.

mod cleanup;
mod error;
mod model;
mod reaper;
mod service;
mod sniff;
mod storage;
mod stream;
mod upload;

pub use cleanup::{DETACHED_TIMEOUT, detach};
pub use error::{MediaError, MediaResult};
pub use model::{
    MediaConsumer, MediaInfo, MediaRecord, MediaStatus, UploadResponse, media_id_of,
    stored_filename_for,
};
pub use reaper::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL, Reaper, SweepReport};
pub use service::{MediaService, UPLOAD_MESSAGE};
pub use sniff::{SNIFF_LEN, is_allowed_media_type, sniff};
pub use storage::{LocalMediaStorage, MediaStorage, StorageWriter};
pub use stream::{BodyError, BodyStream, PrefixedStream, read_prefix};
pub use upload::{IncomingFile, MAX_UPLOAD_BYTES, UPLOAD_FIELD, ingest};

/// Tunables for intake.
#[derive(Debug, Clone, Copy)]
pub struct MediaSettings {
    /// Time an uploaded record may wait to be linked.
    pub ttl: chrono::Duration,
    /// Cap on a single upload body.
    pub max_upload_bytes: u64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::minutes(30),
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}
