//! Upload streaming pipeline.
//!
//! Stages a pending record, sniffs the first bytes of the body, then streams
//! the whole body (sniffed prefix included) to storage under the size cap.

use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{MediaError, MediaResult};
use super::model::{MediaRecord, MediaStatus, UploadResponse};
use super::service::MediaService;
use super::sniff::{SNIFF_LEN, is_allowed_media_type, sniff};
use super::storage::StorageWriter;
use super::stream::{BodyError, BodyStream, PrefixedStream, read_prefix};

/// Multipart field carrying the upload.
pub const UPLOAD_FIELD: &str = "file_upload";

/// Default cap on upload size.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// The file part of an upload request.
pub struct IncomingFile<S> {
    /// Client-supplied filename.
    pub original_filename: String,
    /// Client-declared content type, if any.
    pub declared_type: Option<String>,
    pub body: S,
}

/// Run the pipeline for one file part owned by `owner`.
pub async fn ingest<S: BodyStream>(
    media: &MediaService,
    owner: Uuid,
    file: IncomingFile<S>,
) -> MediaResult<UploadResponse> {
    let IncomingFile {
        original_filename,
        declared_type,
        mut body,
    } = file;
    let declared_type = declared_type.unwrap_or_default();

    // The declared type only filters. It never confirms.
    if !declared_type.is_empty() && !is_allowed_media_type(&declared_type) {
        return Err(MediaError::DisallowedType(declared_type));
    }

    let (record, mut writer) = media
        .stage(owner, &original_filename, &declared_type)
        .await?;

    let prefix = match read_prefix(&mut body, SNIFF_LEN).await {
        Ok(prefix) => prefix,
        Err(e) => return Err(abort_copy(media, &record, writer, e).await),
    };

    let file_type = sniff(&prefix);
    if !is_allowed_media_type(&file_type) {
        drop(writer);
        debug!(media_id = %record.id, %file_type, "sniffed type rejected");
        media.mark_failed(record.id, MediaStatus::FailedSniff);
        media.remove_file(record.id, record.storage_path.clone());
        return Err(MediaError::DisallowedType(file_type));
    }

    let max = media.settings().max_upload_bytes;
    let mut stream = PrefixedStream::new(prefix, body);
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return Err(abort_copy(media, &record, writer, e).await),
        };

        written += chunk.len() as u64;
        if written > max {
            return Err(abort_copy(media, &record, writer, BodyError::LengthLimit).await);
        }

        if let Err(e) = writer.write_all(&chunk).await {
            return Err(copy_failed(media, &record, e.into()));
        }
    }

    if let Err(e) = writer.shutdown().await {
        return Err(copy_failed(media, &record, e.into()));
    }
    drop(writer);

    let record = media
        .finalize(record.id, owner, written, &file_type)
        .await?;
    Ok(media.upload_response(&record))
}

/// Handle a body error after staging.
///
/// An overrun removes every trace of the upload before reporting it. Any
/// other read error is a failed copy.
async fn abort_copy(
    media: &MediaService,
    record: &MediaRecord,
    mut writer: StorageWriter,
    error: BodyError,
) -> MediaError {
    match error {
        BodyError::LengthLimit => {
            drop(writer);
            let max = media.settings().max_upload_bytes;
            if let Err(e) = media.discard(record).await {
                warn!(media_id = %record.id, error = %e, "failed to discard oversized upload");
            }
            MediaError::PayloadTooLarge { max }
        }
        BodyError::Read(reason) => {
            // Keep what arrived so far.
            if let Err(e) = writer.shutdown().await {
                warn!(media_id = %record.id, error = %e, "failed to flush partial upload");
            }
            copy_failed(media, record, anyhow::anyhow!(reason))
        }
    }
}

fn copy_failed(media: &MediaService, record: &MediaRecord, error: anyhow::Error) -> MediaError {
    warn!(media_id = %record.id, error = %error, "upload copy failed");
    media.mark_failed(record.id, MediaStatus::FailedCopy);
    MediaError::WriteFailure(error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::media::{LocalMediaStorage, MediaSettings};
    use crate::repository::{InMemoryMediaRepository, MediaRepository};

    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    struct Harness {
        media: MediaService,
        repo: InMemoryMediaRepository,
        dir: tempfile::TempDir,
    }

    fn harness(max_upload_bytes: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemoryMediaRepository::new();
        let media = MediaService::new(
            Arc::new(repo.clone()),
            Arc::new(LocalMediaStorage::new(dir.path(), "/uploads")),
            MediaSettings {
                max_upload_bytes,
                ..MediaSettings::default()
            },
        );
        Harness { media, repo, dir }
    }

    fn body(chunks: Vec<Result<Bytes, BodyError>>) -> impl BodyStream {
        tokio_stream::iter(chunks)
    }

    fn file(
        name: &str,
        declared: Option<&str>,
        chunks: Vec<Result<Bytes, BodyError>>,
    ) -> IncomingFile<impl BodyStream> {
        IncomingFile {
            original_filename: name.to_string(),
            declared_type: declared.map(str::to_string),
            body: body(chunks),
        }
    }

    #[tokio::test]
    async fn test_png_split_across_chunks_is_stored_intact() {
        let h = harness(MAX_UPLOAD_BYTES);
        let owner = Uuid::now_v7();
        let mut tail = vec![0u8; 600];
        tail[0] = 1;
        let chunks = vec![
            Ok(Bytes::from_static(&PNG[..3])),
            Ok(Bytes::from_static(&PNG[3..])),
            Ok(Bytes::from(tail.clone())),
        ];

        let response = ingest(&h.media, owner, file("cat.png", Some("image/png"), chunks))
            .await
            .unwrap();
        assert_eq!(response.file_type, "image/png");
        assert_eq!(response.size, (PNG.len() + tail.len()) as i64);

        let record = h.repo.find_media(response.id).await.unwrap().unwrap();
        assert_eq!(record.status, MediaStatus::Uploaded);
        let stored = std::fs::read(h.dir.path().join(&record.storage_path)).unwrap();
        assert_eq!(&stored[..PNG.len()], PNG);
        assert_eq!(stored.len(), PNG.len() + tail.len());
    }

    #[tokio::test]
    async fn test_declared_type_filters_before_staging() {
        let h = harness(MAX_UPLOAD_BYTES);
        let err = ingest(
            &h.media,
            Uuid::now_v7(),
            file("doc.pdf", Some("application/pdf"), vec![Ok(Bytes::from_static(PNG))]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::DisallowedType(_)));
        assert!(h.repo.media().await.is_empty());
    }

    #[tokio::test]
    async fn test_lying_declared_type_is_sniffed_out() {
        let h = harness(MAX_UPLOAD_BYTES);
        let err = ingest(
            &h.media,
            Uuid::now_v7(),
            file(
                "evil.png",
                Some("image/png"),
                vec![Ok(Bytes::from_static(b"#!/bin/sh\nrm -rf /\n"))],
            ),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::DisallowedType(t) if t.starts_with("text/")));

        // Detached bookkeeping runs on its own task.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let records = h.repo.media().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, MediaStatus::FailedSniff);
    }

    #[tokio::test]
    async fn test_overrun_leaves_no_record() {
        let h = harness(16);
        let chunks = vec![Ok(Bytes::from_static(PNG)), Ok(Bytes::from_static(b"more"))];
        let err = ingest(&h.media, Uuid::now_v7(), file("big.png", None, chunks))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::PayloadTooLarge { max: 16 }));
        assert!(h.repo.media().await.is_empty());
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_transport_limit_leaves_no_record() {
        let h = harness(MAX_UPLOAD_BYTES);
        let chunks = vec![Ok(Bytes::from_static(PNG)), Err(BodyError::LengthLimit)];
        let err = ingest(&h.media, Uuid::now_v7(), file("big.png", None, chunks))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::PayloadTooLarge { .. }));
        assert!(h.repo.media().await.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_marks_failed_copy_and_keeps_bytes() {
        let h = harness(MAX_UPLOAD_BYTES);
        let mut head = PNG.to_vec();
        head.resize(SNIFF_LEN, 0);
        let chunks = vec![
            Ok(Bytes::from(head)),
            Err(BodyError::Read("connection reset".into())),
        ];
        let err = ingest(&h.media, Uuid::now_v7(), file("cut.png", None, chunks))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::WriteFailure(_)));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let records = h.repo.media().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, MediaStatus::FailedCopy);
        let kept = std::fs::read(h.dir.path().join(&records[0].storage_path)).unwrap();
        assert_eq!(kept.len(), SNIFF_LEN);
    }

    #[tokio::test]
    async fn test_empty_body_is_disallowed() {
        let h = harness(MAX_UPLOAD_BYTES);
        let err = ingest(&h.media, Uuid::now_v7(), file("empty.png", None, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DisallowedType(t) if t == "application/octet-stream"));
    }
}
