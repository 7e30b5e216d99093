use std::{
    collections::{BTreeMap, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use keel_common::{
    BodyStream, Bucket, DataLocation, KeelError, MetadataRecord, error::Result,
};
use keel_crypto::{CipherBundle, cipher};
use uuid::Uuid;

use crate::traits::{DataBackend, KeyContext, ListOptions, ListedRecord, MetadataStore};

pub const MEMORY_STORE_NAME: &str = "mem";

#[derive(Debug)]
struct Namespace {
    bucket: Bucket,
    records: BTreeMap<String, MetadataRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Namespace>>> {
        self.namespaces
            .read()
            .map_err(|_| KeelError::InternalError("metadata lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Namespace>>> {
        self.namespaces
            .write()
            .map_err(|_| KeelError::InternalError("metadata lock poisoned".to_string()))
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_bucket(&self, bucket: Bucket) -> Result<()> {
        let mut namespaces = self.write()?;
        if namespaces.contains_key(&bucket.name) {
            return Err(KeelError::BucketAlreadyExists(bucket.name));
        }
        namespaces.insert(
            bucket.name.clone(),
            Namespace {
                bucket,
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        self.read()?
            .get(name)
            .map(|ns| ns.bucket.clone())
            .ok_or_else(|| KeelError::BucketNotFound(name.to_string()))
    }

    async fn get_object(&self, namespace: &str, key: &str) -> Result<MetadataRecord> {
        let namespaces = self.read()?;
        let ns = namespaces
            .get(namespace)
            .ok_or_else(|| KeelError::BucketNotFound(namespace.to_string()))?;
        ns.records
            .get(key)
            .cloned()
            .ok_or_else(|| KeelError::RecordNotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    }

    async fn list_objects(
        &self,
        namespace: &str,
        options: &ListOptions,
    ) -> Result<Vec<ListedRecord>> {
        let namespaces = self.read()?;
        let ns = namespaces
            .get(namespace)
            .ok_or_else(|| KeelError::BucketNotFound(namespace.to_string()))?;
        Ok(ns
            .records
            .range(options.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&options.prefix))
            .take(options.max_keys)
            .map(|(key, record)| ListedRecord {
                key: key.clone(),
                record: record.clone(),
            })
            .collect())
    }

    async fn put_object(&self, namespace: &str, key: &str, record: MetadataRecord) -> Result<()> {
        let mut namespaces = self.write()?;
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| KeelError::BucketNotFound(namespace.to_string()))?;
        ns.records.insert(key.to_string(), record);
        Ok(())
    }
}

/// Keeps blobs in memory; encrypted blobs are stored as sealed frames.
#[derive(Debug, Default)]
pub struct MemoryDataBackend {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryDataBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob(&self, key: &str) -> Option<Bytes> {
        self.blobs.read().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DataBackend for MemoryDataBackend {
    async fn put(
        &self,
        cipher: Option<&CipherBundle>,
        mut body: BodyStream,
        size: u64,
        _context: &KeyContext,
    ) -> Result<Option<DataLocation>> {
        let mut stored = Vec::new();
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
                Some(bundle) => stored.extend(cipher::seal_frame(bundle.data_key(), &chunk)?),
                None => stored.extend_from_slice(&chunk),
            }
        }
        if received != size {
            return Err(KeelError::IncompleteBody {
                expected: size,
                received,
            });
        }

        let key = Uuid::new_v4().simple().to_string();
        self.blobs
            .write()
            .map_err(|_| KeelError::InternalError("blob lock poisoned".to_string()))?
            .insert(key.clone(), Bytes::from(stored));

        Ok(Some(DataLocation {
            key,
            data_store_name: MEMORY_STORE_NAME.to_string(),
            start: 0,
            size,
            sse_algorithm: None,
            sse_master_key_id: None,
            sse_crypto_scheme: None,
            sse_ciphered_data_key: None,
        }))
    }

    async fn batch_delete(&self, locations: &[DataLocation]) -> Result<()> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| KeelError::InternalError("blob lock poisoned".to_string()))?;
        for location in locations {
            blobs.remove(&location.key);
        }
        Ok(())
    }
}
