use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::Bytes;
use futures::Stream;
use keel_common::{BodyStream, DataLocation, KeelError, error::Result};
use keel_crypto::CipherBundle;
use keel_storage::{DataBackend, KeyContext};
use md5::{Digest, Md5};
use pin_project_lite::pin_project;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pin_project! {
    /// Computes the MD5 of everything that flows through it. The hex digest
    /// is sent once, when the inner stream ends cleanly; an error item or an
    /// early drop closes the channel without a value.
    pub struct HashingStream<S> {
        #[pin]
        inner: S,
        hasher: Md5,
        digest_tx: Option<oneshot::Sender<String>>,
    }
}

impl<S> HashingStream<S> {
    pub fn new(inner: S) -> (Self, oneshot::Receiver<String>) {
        let (digest_tx, digest_rx) = oneshot::channel();
        let stream = Self {
            inner,
            hasher: Md5::new(),
            digest_tx: Some(digest_tx),
        };
        (stream, digest_rx)
    }
}

impl<S> Stream for HashingStream<S>
where
    S: Stream<Item = Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.hasher.update(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => {
                this.digest_tx.take();
                Poll::Ready(Some(Err(err)))
            }
            None => {
                if let Some(tx) = this.digest_tx.take() {
                    let digest = std::mem::take(this.hasher).finalize();
                    let _ = tx.send(hex::encode(digest));
                }
                Poll::Ready(None)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub location: DataLocation,
    /// Lowercase hex MD5 of the bytes handed to the backend.
    pub content_md5: String,
}

/// Streams `body` into `backend`, hashing in the same pass. When
/// `expected_md5` is given and differs from the computed digest, the written
/// blob is deleted before `BadDigest` is returned.
pub async fn write_object(
    backend: &dyn DataBackend,
    cipher: Option<&CipherBundle>,
    body: BodyStream,
    size: u64,
    context: &KeyContext,
    expected_md5: Option<&str>,
) -> Result<StoredObject> {
    let (hashing, digest_rx) = HashingStream::new(body);
    let location = backend
        .put(cipher, Box::pin(hashing), size, context)
        .await?
        .ok_or_else(|| KeelError::InternalError("data backend stored no location".to_string()))?;

    let content_md5 = match digest_rx.await {
        Ok(digest) => digest,
        Err(_) => {
            discard(backend, &location).await;
            return Err(KeelError::InternalError(
                "data backend did not consume the whole body".to_string(),
            ));
        }
    };

    if let Some(expected) = expected_md5 {
        if !expected.eq_ignore_ascii_case(&content_md5) {
            debug!(expected, computed = %content_md5, key = %location.key, "content digest mismatch");
            discard(backend, &location).await;
            return Err(KeelError::BadDigest {
                expected: expected.to_string(),
                computed: content_md5,
            });
        }
    }

    Ok(StoredObject {
        location,
        content_md5,
    })
}

/// The caller's error takes precedence over a failed delete.
async fn discard(backend: &dyn DataBackend, location: &DataLocation) {
    if let Err(err) = backend.batch_delete(std::slice::from_ref(location)).await {
        warn!(key = %location.key, error = %err, "failed to delete orphaned blob");
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use keel_common::stream::{body_from_bytes, body_from_chunks};
    use keel_storage::MemoryDataBackend;

    use super::*;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    fn context() -> KeyContext {
        KeyContext {
            bucket: "photos".to_string(),
            owner: "owner-id".to_string(),
            namespace: "default".to_string(),
            object_key: "cat.jpg".to_string(),
            upload_id: "u1".to_string(),
            part_number: 1,
        }
    }

    #[tokio::test]
    async fn digest_fires_once_at_end_of_stream() {
        let body = body_from_chunks(vec![Bytes::from_static(b"he"), Bytes::from_static(b"llo")]);
        let (mut stream, digest_rx) = HashingStream::new(body);

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello");
        assert_eq!(digest_rx.await.unwrap(), HELLO_MD5);
    }

    #[tokio::test]
    async fn failed_stream_yields_no_digest() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"he")),
            Err(KeelError::SignatureDoesNotMatch),
        ]);
        let (stream, digest_rx) = HashingStream::new(body);
        let items: Vec<_> = stream.collect().await;
        assert!(items[1].is_err());
        assert!(digest_rx.await.is_err());
    }

    #[tokio::test]
    async fn matching_digest_keeps_blob() {
        let backend = MemoryDataBackend::new();
        let stored = write_object(
            &backend,
            None,
            body_from_bytes(&b"hello"[..]),
            5,
            &context(),
            Some(HELLO_MD5),
        )
        .await
        .unwrap();
        assert_eq!(stored.content_md5, HELLO_MD5);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_digest_removes_blob() {
        let backend = MemoryDataBackend::new();
        let err = write_object(
            &backend,
            None,
            body_from_bytes(&b"hello"[..]),
            5,
            &context(),
            Some("00000000000000000000000000000000"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KeelError::BadDigest { .. }));
        assert!(backend.is_empty());
    }
}
