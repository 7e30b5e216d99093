use std::sync::Arc;

use chrono::Utc;
use keel_common::{
    BodyStream, Bucket, DataLocation, IngestConfig, MetadataRecord, PartRecord, Requester,
    error::Result,
};
use keel_crypto::{CipherBundle, KeyManager};
use keel_iam::BucketAuthorizer;
use keel_storage::{DataBackend, KeyContext, MetadataStore};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    gate::{self, UploadGrant},
    keys::part_key,
    validate::{pad_part_number, validate_part},
    writer::{self, StoredObject},
};

/// Data namespace handed to backends for multipart parts.
pub const DATA_NAMESPACE: &str = "default";

pub struct UploadPartRequest {
    pub request_id: String,
    pub bucket: String,
    pub object_key: String,
    pub upload_id: String,
    /// As received; validated before anything else happens.
    pub part_number: String,
    pub size: u64,
    /// Lowercase hex MD5 the body must match.
    pub content_md5: Option<String>,
    pub requester: Requester,
    pub body: BodyStream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartOutput {
    /// Hex MD5 of the stored part, used as its ETag.
    pub content_md5: String,
    pub sse_algorithm: Option<String>,
    pub sse_master_key_id: Option<String>,
}

/// Commits single parts of multipart uploads: validates, authorizes against
/// the bucket and the upload's shadow bucket, streams the body to the data
/// backend and records the part.
#[derive(Clone)]
pub struct PartIngestor {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) data: Arc<dyn DataBackend>,
    pub(crate) kms: Arc<dyn KeyManager>,
    pub(crate) authorizer: Arc<dyn BucketAuthorizer>,
    pub(crate) config: IngestConfig,
}

impl PartIngestor {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        data: Arc<dyn DataBackend>,
        kms: Arc<dyn KeyManager>,
        authorizer: Arc<dyn BucketAuthorizer>,
        config: IngestConfig,
    ) -> Self {
        Self {
            metadata,
            data,
            kms,
            authorizer,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub async fn upload_part(&self, request: UploadPartRequest) -> Result<UploadPartOutput> {
        let span = info_span!(
            "upload_part",
            request_id = %request.request_id,
            bucket = %request.bucket,
            key = %request.object_key,
            upload_id = %request.upload_id,
            part_number = %request.part_number,
        );
        async move {
            let result = self.run_upload_part(request).await;
            if let Err(err) = &result {
                warn!(error = %err, code = err.s3_error_code(), "upload part failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_upload_part(&self, request: UploadPartRequest) -> Result<UploadPartOutput> {
        let part_number = validate_part(&self.config, &request.part_number, request.size)?;

        let bucket = gate::authorize_bucket(
            self.metadata.as_ref(),
            self.authorizer.as_ref(),
            &request.bucket,
            &request.requester,
        )
        .await?;

        let cipher = self.cipher_bundle(&bucket).await?;

        let grant = gate::authorize_upload(
            self.metadata.as_ref(),
            &self.config,
            &request.bucket,
            &request.object_key,
            &request.upload_id,
            &request.requester,
        )
        .await?;

        let context = KeyContext {
            bucket: bucket.name.clone(),
            owner: bucket.owner.clone(),
            namespace: DATA_NAMESPACE.to_string(),
            object_key: request.object_key.clone(),
            upload_id: request.upload_id.clone(),
            part_number,
        };
        let stored = writer::write_object(
            self.data.as_ref(),
            cipher.as_ref(),
            request.body,
            request.size,
            &context,
            request.content_md5.as_deref(),
        )
        .await?;

        self.record_part(&request.upload_id, part_number, request.size, &grant, cipher.as_ref(), stored)
            .await
    }

    async fn cipher_bundle(&self, bucket: &Bucket) -> Result<Option<CipherBundle>> {
        let Some(sse) = &bucket.server_side_encryption else {
            return Ok(None);
        };
        let bundle = self.kms.create_cipher_bundle(sse).await?;
        debug!(master_key_id = %bundle.master_key_id, "encrypting part");
        Ok(Some(bundle))
    }

    async fn record_part(
        &self,
        upload_id: &str,
        part_number: u32,
        size: u64,
        grant: &UploadGrant,
        cipher: Option<&CipherBundle>,
        stored: StoredObject,
    ) -> Result<UploadPartOutput> {
        let padded = pad_part_number(part_number, self.config.part_number_width);
        let location = annotate_location(stored.location, cipher);

        let record = PartRecord {
            part_number: padded.clone(),
            content_md5: stored.content_md5.clone(),
            size,
            upload_id: upload_id.to_string(),
            splitter: grant.splitter,
            data_location: vec![location],
            last_modified: Utc::now(),
        };
        let key = part_key(upload_id, grant.splitter, &padded);
        self.metadata
            .put_object(&grant.shadow_bucket, &key, MetadataRecord::Part(record))
            .await?;
        info!(size, etag = %stored.content_md5, "stored part");

        Ok(UploadPartOutput {
            content_md5: stored.content_md5,
            sse_algorithm: cipher.map(|c| c.algorithm.clone()),
            sse_master_key_id: cipher.map(|c| c.master_key_id.clone()),
        })
    }
}

fn annotate_location(mut location: DataLocation, cipher: Option<&CipherBundle>) -> DataLocation {
    if let Some(bundle) = cipher {
        location.sse_algorithm = Some(bundle.algorithm.clone());
        location.sse_master_key_id = Some(bundle.master_key_id.clone());
        location.sse_crypto_scheme = Some(bundle.crypto_scheme);
        location.sse_ciphered_data_key = Some(bundle.ciphered_data_key.clone());
    }
    location
}
