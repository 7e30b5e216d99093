use async_trait::async_trait;
use keel_common::{BodyStream, Bucket, DataLocation, MetadataRecord, error::Result};
use keel_crypto::CipherBundle;

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub prefix: String,
    pub max_keys: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedRecord {
    pub key: String,
    pub record: MetadataRecord,
}

/// Placement hints handed to the data backend with each write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyContext {
    pub bucket: String,
    pub owner: String,
    pub namespace: String,
    pub object_key: String,
    pub upload_id: String,
    pub part_number: u32,
}

/// Bucket and record metadata. Namespaces are bucket names, shadow buckets
/// included. Implementations must give single-key read-after-write.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_bucket(&self, bucket: Bucket) -> Result<()>;
    async fn get_bucket(&self, name: &str) -> Result<Bucket>;
    async fn get_object(&self, namespace: &str, key: &str) -> Result<MetadataRecord>;
    /// Records whose key starts with `options.prefix`, in key order.
    async fn list_objects(&self, namespace: &str, options: &ListOptions)
    -> Result<Vec<ListedRecord>>;
    async fn put_object(&self, namespace: &str, key: &str, record: MetadataRecord) -> Result<()>;
}

#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Streams `body` into storage. `size` is the declared length; a body
    /// that does not match it fails without leaving data behind.
    async fn put(
        &self,
        cipher: Option<&CipherBundle>,
        body: BodyStream,
        size: u64,
        context: &KeyContext,
    ) -> Result<Option<DataLocation>>;

    /// Removes stored blobs. Unknown locations are ignored.
    async fn batch_delete(&self, locations: &[DataLocation]) -> Result<()>;
}
