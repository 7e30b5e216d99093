use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use keel_common::{BodyStream, DataLocation, KeelError, error::Result};
use keel_crypto::{CipherBundle, cipher};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::SYS_DIR_NAME;
use crate::traits::{DataBackend, KeyContext};

pub const FILE_STORE_NAME: &str = "file";
const DATA_DIR_NAME: &str = "data";
const TEMP_SUFFIX: &str = ".partial";

/// Stores each blob as one file named by a random id. Bytes land in a
/// temporary file that is renamed into place only after the whole body has
/// been received; any failure removes it.
#[derive(Debug, Clone)]
pub struct FsDataBackend {
    root: PathBuf,
}

impl FsDataBackend {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let root = data_dir.as_ref().join(SYS_DIR_NAME).join(DATA_DIR_NAME);
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Raw stored bytes; sealed frames for encrypted blobs.
    pub async fn read(&self, location: &DataLocation) -> Result<Bytes> {
        Ok(Bytes::from(fs::read(self.blob_path(&location.key)?).await?))
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(KeelError::InternalError(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }

    async fn write_body(
        &self,
        file: &mut fs::File,
        cipher: Option<&CipherBundle>,
        mut body: BodyStream,
        size: u64,
    ) -> Result<()> {
        let mut received = 0_u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            if received > size {
                return Err(KeelError::IncompleteBody {
                    expected: size,
                    received,
                });
            }
            match cipher {
                Some(bundle) => {
                    file.write_all(&cipher::seal_frame(bundle.data_key(), &chunk)?)
                        .await?
                }
                None => file.write_all(&chunk).await?,
            }
        }
        if received != size {
            return Err(KeelError::IncompleteBody {
                expected: size,
                received,
            });
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl DataBackend for FsDataBackend {
    async fn put(
        &self,
        cipher: Option<&CipherBundle>,
        body: BodyStream,
        size: u64,
        context: &KeyContext,
    ) -> Result<Option<DataLocation>> {
        let key = Uuid::new_v4().simple().to_string();
        let path = self.blob_path(&key)?;
        let tmp = self.root.join(format!("{key}{TEMP_SUFFIX}"));

        let mut file = fs::File::create(&tmp).await?;
        let written = self.write_body(&mut file, cipher, body, size).await;
        drop(file);

        if let Err(err) = written {
            debug!(
                bucket = %context.bucket,
                upload_id = %context.upload_id,
                error = %err,
                "discarding partial blob"
            );
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "failed to remove partial blob");
            }
            return Err(err);
        }
        fs::rename(&tmp, &path).await?;

        Ok(Some(DataLocation {
            key,
            data_store_name: FILE_STORE_NAME.to_string(),
            start: 0,
            size,
            sse_algorithm: None,
            sse_master_key_id: None,
            sse_crypto_scheme: None,
            sse_ciphered_data_key: None,
        }))
    }

    async fn batch_delete(&self, locations: &[DataLocation]) -> Result<()> {
        for location in locations {
            match fs::remove_file(self.blob_path(&location.key)?).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keel_common::stream::body_from_chunks;
    use keel_crypto::{KeyManager, LocalKms, MasterKey};
    use keel_common::types::SseConfig;

    use super::*;

    fn context() -> KeyContext {
        KeyContext {
            bucket: "photos".to_string(),
            owner: "owner".to_string(),
            namespace: "default".to_string(),
            object_key: "cat.jpg".to_string(),
            upload_id: "u1".to_string(),
            part_number: 1,
        }
    }

    async fn backend() -> (FsDataBackend, PathBuf) {
        let dir = std::env::temp_dir().join(format!("keel-data-{}", Uuid::new_v4()));
        (FsDataBackend::new(&dir).await.unwrap(), dir)
    }

    async fn leftover_files(backend: &FsDataBackend) -> usize {
        let mut count = 0;
        let mut entries = fs::read_dir(&backend.root).await.unwrap();
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let (backend, dir) = backend().await;
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"prefix")),
            Err(KeelError::SignatureDoesNotMatch),
        ])
        .boxed();

        let err = backend.put(None, body, 12, &context()).await.unwrap_err();
        assert!(matches!(err, KeelError::SignatureDoesNotMatch));
        assert_eq!(leftover_files(&backend).await, 0);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn encrypted_blob_opens_with_bundle_key() {
        let (backend, dir) = backend().await;
        let kms = LocalKms::new(MasterKey::generate()).unwrap();
        let bundle = kms
            .create_cipher_bundle(&SseConfig {
                algorithm: "AES256".to_string(),
                master_key_id: String::new(),
            })
            .await
            .unwrap();

        let body = body_from_chunks(vec![Bytes::from_static(b"top "), Bytes::from_static(b"secret")]);
        let location = backend
            .put(Some(&bundle), body, 10, &context())
            .await
            .unwrap()
            .unwrap();

        let stored = backend.read(&location).await.unwrap();
        assert_ne!(&stored[..], b"top secret");
        assert_eq!(
            cipher::open_frames(bundle.data_key(), &stored).unwrap(),
            b"top secret"
        );

        backend.batch_delete(&[location.clone()]).await.unwrap();
        backend.batch_delete(&[location]).await.unwrap();
        assert_eq!(leftover_files(&backend).await, 0);

        let _ = fs::remove_dir_all(&dir).await;
    }
}
