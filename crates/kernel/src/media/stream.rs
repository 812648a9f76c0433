//! Byte stream helpers for the upload pipeline.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use tokio_stream::StreamExt;

/// Error produced by an inbound upload body stream.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    /// The body exceeded the configured size limit.
    #[error("body exceeded the size limit")]
    LengthLimit,

    /// Any other read failure (client disconnect, malformed part, ...).
    #[error("failed to read body: {0}")]
    Read(String),
}

/// A stream of body chunks, as produced by a multipart field.
pub trait BodyStream: Stream<Item = Result<Bytes, BodyError>> + Send + Unpin {}

impl<T> BodyStream for T where T: Stream<Item = Result<Bytes, BodyError>> + Send + Unpin {}

/// Read from `stream` until at least `len` bytes are buffered or the stream
/// ends.
///
/// Whole chunks are buffered, so the returned prefix may be longer than
/// `len`. Nothing is dropped: replaying the prefix in front of the rest of
/// the stream yields the original byte sequence.
pub async fn read_prefix<S: BodyStream>(stream: &mut S, len: usize) -> Result<Bytes, BodyError> {
    let mut buf = BytesMut::new();
    while buf.len() < len {
        match stream.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => break,
        }
    }
    Ok(buf.freeze())
}

/// A stream that yields a pushed-back prefix before the remainder of the
/// underlying stream.
#[derive(Debug)]
pub struct PrefixedStream<S> {
    prefix: Option<Bytes>,
    inner: S,
}

impl<S> PrefixedStream<S> {
    /// Replay `prefix`, then continue with `inner`.
    pub fn new(prefix: Bytes, inner: S) -> Self {
        let prefix = (!prefix.is_empty()).then_some(prefix);
        Self { prefix, inner }
    }
}

impl<S: BodyStream> Stream for PrefixedStream<S> {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(prefix) = self.prefix.take() {
            return Poll::Ready(Some(Ok(prefix)));
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let extra = usize::from(self.prefix.is_some());
        let (lower, upper) = self.inner.size_hint();
        (
            lower.saturating_add(extra),
            upper.and_then(|u| u.checked_add(extra)),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> impl BodyStream {
        tokio_stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect<S: BodyStream>(mut s: S) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_prefix_then_rest_is_lossless() {
        let mut body = chunks(&[b"hel", b"lo ", b"wor", b"ld"]);
        let prefix = read_prefix(&mut body, 4).await.unwrap();
        assert_eq!(&prefix[..], b"hello ");

        let replayed = collect(PrefixedStream::new(prefix, body)).await;
        assert_eq!(replayed, b"hello world");
    }

    #[tokio::test]
    async fn test_short_stream() {
        let mut body = chunks(&[b"ab"]);
        let prefix = read_prefix(&mut body, 512).await.unwrap();
        assert_eq!(&prefix[..], b"ab");
        assert_eq!(collect(PrefixedStream::new(prefix, body)).await, b"ab");
    }

    #[tokio::test]
    async fn test_empty_prefix_is_not_yielded() {
        let body = chunks(&[]);
        let mut stream = PrefixedStream::new(Bytes::new(), body);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_prefix_read_error_propagates() {
        let mut body = tokio_stream::iter(vec![
            Ok(Bytes::from_static(b"x")),
            Err(BodyError::Read("reset".into())),
        ]);
        let err = read_prefix(&mut body, 512).await.unwrap_err();
        assert!(matches!(err, BodyError::Read(_)));
    }
}
