use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keel_common::{Bucket, KeelError, MetadataRecord, error::Result};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use super::SYS_DIR_NAME;
use crate::traits::{ListOptions, ListedRecord, MetadataStore};

const META_DIR_NAME: &str = "meta";
const BUCKET_FILE_NAME: &str = "bucket.json";
const RECORDS_DIR_NAME: &str = "records";
const RECORD_FILE_PREFIX: char = '_';
const RECORD_FILE_SUFFIX: &str = ".json";
/// Encoded key bytes that name the shard directory of a record.
const SHARD_WIDTH: usize = 8;
/// Longest encoded remainder kept verbatim in a file name. Longer keys keep
/// this much as a readable head followed by `~` and the SHA-256 of the key.
const MAX_NAME_HEAD: usize = 120;
const HASH_SEPARATOR: char = '~';

/// JSON-file metadata store: one directory per namespace, records sharded by
/// the first bytes of their percent-encoded key. Writes go through a rename
/// so a reader never observes a partially written record.
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    record: MetadataRecord,
}

/// Where a record lives under a namespace's records directory.
#[derive(Debug, PartialEq, Eq)]
struct RecordName {
    shard: String,
    file: String,
}

impl RecordName {
    fn for_key(key: &str) -> Self {
        let encoded = encode_name(key);
        let cut = token_boundary(&encoded, SHARD_WIDTH);
        let (shard, rest) = encoded.split_at(cut);
        let file = if rest.len() <= MAX_NAME_HEAD {
            format!("{RECORD_FILE_PREFIX}{rest}{RECORD_FILE_SUFFIX}")
        } else {
            let head = &rest[..token_boundary(rest, MAX_NAME_HEAD)];
            let digest = hex::encode(Sha256::digest(key.as_bytes()));
            format!("{RECORD_FILE_PREFIX}{head}{HASH_SEPARATOR}{digest}{RECORD_FILE_SUFFIX}")
        };
        Self {
            shard: format!("{RECORD_FILE_PREFIX}{shard}"),
            file,
        }
    }
}

/// Whether a file named `file_name` may hold a key whose encoded remainder
/// after the shard starts with `rest_prefix`.
fn may_hold_prefix(file_name: &str, rest_prefix: &str) -> bool {
    let Some(stem) = file_name
        .strip_prefix(RECORD_FILE_PREFIX)
        .and_then(|name| name.strip_suffix(RECORD_FILE_SUFFIX))
    else {
        return false;
    };
    match stem.split_once(HASH_SEPARATOR) {
        Some((head, _)) => head.starts_with(rest_prefix) || rest_prefix.starts_with(head),
        None => stem.starts_with(rest_prefix),
    }
}

/// Largest cut at or below `width` that does not split a `%XX` escape.
fn token_boundary(encoded: &str, width: usize) -> usize {
    let bytes = encoded.as_bytes();
    let mut cut = 0;
    while cut < bytes.len() {
        let step = if bytes[cut] == b'%' { 3 } else { 1 };
        if cut + step > width {
            break;
        }
        cut += step;
    }
    cut
}

impl FsMetadataStore {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let root = data_dir.as_ref().join(SYS_DIR_NAME).join(META_DIR_NAME);
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.root.join(encode_name(namespace))
    }

    fn records_path(&self, namespace: &str) -> PathBuf {
        self.namespace_path(namespace).join(RECORDS_DIR_NAME)
    }

    fn record_path(&self, namespace: &str, key: &str) -> PathBuf {
        let name = RecordName::for_key(key);
        self.records_path(namespace).join(name.shard).join(name.file)
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<PathBuf> {
        let path = self.namespace_path(namespace);
        match fs::metadata(path.join(BUCKET_FILE_NAME)).await {
            Ok(_) => Ok(path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(KeelError::BucketNotFound(namespace.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Shard directories that can hold keys starting with the encoded
    /// `prefix`, each paired with the part of the prefix left for file names.
    async fn candidate_shards(
        &self,
        records_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<(PathBuf, String)>> {
        let cut = token_boundary(prefix, SHARD_WIDTH);
        if cut < prefix.len() {
            let (shard, rest) = prefix.split_at(cut);
            let dir = records_dir.join(format!("{RECORD_FILE_PREFIX}{shard}"));
            return Ok(vec![(dir, rest.to_string())]);
        }

        let mut shards = Vec::new();
        let mut entries = match fs::read_dir(records_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(shards),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let matches = name
                .to_str()
                .and_then(|name| name.strip_prefix(RECORD_FILE_PREFIX))
                .is_some_and(|shard| shard.starts_with(prefix));
            if matches {
                shards.push((entry.path(), String::new()));
            }
        }
        Ok(shards)
    }
}

fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NON_ALPHANUMERIC).to_string()
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            KeelError::InternalError(format!("failed to parse {}: {err}", path.display()))
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| {
        KeelError::InternalError(format!("failed to serialize {}: {err}", path.display()))
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    fs::write(&tmp, bytes).await?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn create_bucket(&self, bucket: Bucket) -> Result<()> {
        let path = self.namespace_path(&bucket.name);
        let bucket_file = path.join(BUCKET_FILE_NAME);
        if fs::try_exists(&bucket_file).await? {
            return Err(KeelError::BucketAlreadyExists(bucket.name));
        }
        fs::create_dir_all(path.join(RECORDS_DIR_NAME)).await?;
        write_json(&bucket_file, &bucket).await
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        read_json(&self.namespace_path(name).join(BUCKET_FILE_NAME))
            .await?
            .ok_or_else(|| KeelError::BucketNotFound(name.to_string()))
    }

    async fn get_object(&self, namespace: &str, key: &str) -> Result<MetadataRecord> {
        self.ensure_namespace(namespace).await?;
        read_json::<StoredRecord>(&self.record_path(namespace, key))
            .await?
            .filter(|stored| stored.key == key)
            .map(|stored| stored.record)
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
        let records_dir = self.ensure_namespace(namespace).await?.join(RECORDS_DIR_NAME);
        let encoded_prefix = encode_name(&options.prefix);

        let mut listed = Vec::new();
        for (shard_dir, rest_prefix) in self.candidate_shards(&records_dir, &encoded_prefix).await? {
            let mut entries = match fs::read_dir(&shard_dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                if !file_name
                    .to_str()
                    .is_some_and(|name| may_hold_prefix(name, &rest_prefix))
                {
                    continue;
                }
                if let Some(stored) = read_json::<StoredRecord>(&entry.path()).await? {
                    if stored.key.starts_with(&options.prefix) {
                        listed.push(ListedRecord {
                            key: stored.key,
                            record: stored.record,
                        });
                    }
                }
            }
        }
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        listed.truncate(options.max_keys);
        Ok(listed)
    }

    async fn put_object(&self, namespace: &str, key: &str, record: MetadataRecord) -> Result<()> {
        self.ensure_namespace(namespace).await?;
        let stored = StoredRecord {
            key: key.to_string(),
            record,
        };
        write_json(&self.record_path(namespace, key), &stored).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use keel_common::{PartRecord, Requester};

    use super::*;

    fn part(number: &str) -> MetadataRecord {
        MetadataRecord::Part(PartRecord {
            part_number: number.to_string(),
            content_md5: "00".to_string(),
            size: 1,
            upload_id: "u1".to_string(),
            splitter: '|',
            data_location: Vec::new(),
            last_modified: Utc::now(),
        })
    }

    #[tokio::test]
    async fn records_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("keel-meta-{}", Uuid::new_v4()));
        let store = FsMetadataStore::new(&dir).await.unwrap();
        let owner = Requester::account("owner", "owner");

        store.create_bucket(Bucket::new("photos", &owner)).await.unwrap();
        assert!(matches!(
            store.create_bucket(Bucket::new("photos", &owner)).await,
            Err(KeelError::BucketAlreadyExists(_))
        ));

        store.put_object("photos", "u1|00002", part("00002")).await.unwrap();
        store.put_object("photos", "u1|00001", part("00001")).await.unwrap();
        store.put_object("photos", "u2|00001", part("00001")).await.unwrap();

        let listed = store
            .list_objects(
                "photos",
                &ListOptions {
                    prefix: "u1|".to_string(),
                    max_keys: 10,
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = listed.iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, vec!["u1|00001", "u1|00002"]);

        let record = store.get_object("photos", "u1|00002").await.unwrap();
        assert_eq!(record.as_part().unwrap().part_number, "00002");

        assert!(matches!(
            store.get_object("photos", "missing").await,
            Err(KeelError::RecordNotFound { .. })
        ));
        assert!(matches!(
            store.get_bucket("nope").await,
            Err(KeelError::BucketNotFound(_))
        ));

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn long_keys_fit_in_file_names() {
        let dir = std::env::temp_dir().join(format!("keel-meta-{}", Uuid::new_v4()));
        let store = FsMetadataStore::new(&dir).await.unwrap();
        store
            .create_bucket(Bucket::new("mpuShadowBucketphotos", &Requester::account("o", "o")))
            .await
            .unwrap();

        let object_key = "a/".repeat(512);
        let upload_id = "0830634db5394d39af19ebfb60b0080b";
        let overview_key = format!("overview|{object_key}|{upload_id}");
        let truncated_key = format!("overview|{object_key}|{}", &upload_id[..4]);
        store
            .put_object("mpuShadowBucketphotos", &overview_key, part("00001"))
            .await
            .unwrap();

        let name = RecordName::for_key(&overview_key);
        assert!(name.file.len() < 200, "{}", name.file.len());

        let record = store
            .get_object("mpuShadowBucketphotos", &overview_key)
            .await
            .unwrap();
        assert_eq!(record.as_part().unwrap().part_number, "00001");
        assert!(matches!(
            store.get_object("mpuShadowBucketphotos", &truncated_key).await,
            Err(KeelError::RecordNotFound { .. })
        ));

        let listed = store
            .list_objects(
                "mpuShadowBucketphotos",
                &ListOptions {
                    prefix: truncated_key,
                    max_keys: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, overview_key);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn shards_never_split_escapes() {
        assert_eq!(token_boundary("ab%7Ccdef", SHARD_WIDTH), 8);
        assert_eq!(token_boundary("abcdef%7Cgh", SHARD_WIDTH), 6);
        assert_eq!(token_boundary("ab", SHARD_WIDTH), 2);

        let part_name = RecordName::for_key("u1|00002");
        assert_eq!(part_name.shard, "_u1%7C000");
        assert_eq!(part_name.file, "_02.json");
        assert!(may_hold_prefix(&part_name.file, "0"));
        assert!(!may_hold_prefix(&part_name.file, "1"));
    }
}
