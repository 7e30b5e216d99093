use chrono::Utc;
use keel_common::{
    Bucket, KeelError, MetadataRecord, OverviewRecord, Requester, error::Result,
    types::{CURRENT_SCHEMA_VERSION, Initiator},
};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::{gate, keys::overview_key, upload_part::PartIngestor};

#[derive(Debug, Clone)]
pub struct InitiateUploadRequest {
    pub request_id: String,
    pub bucket: String,
    pub object_key: String,
    pub requester: Requester,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateUploadOutput {
    pub bucket: String,
    pub object_key: String,
    pub upload_id: String,
}

impl PartIngestor {
    /// Records a new upload in the bucket's shadow bucket, creating the
    /// shadow bucket on first use.
    pub async fn initiate_upload(&self, request: InitiateUploadRequest) -> Result<InitiateUploadOutput> {
        let span = info_span!(
            "initiate_upload",
            request_id = %request.request_id,
            bucket = %request.bucket,
            key = %request.object_key,
        );
        async move {
            let bucket = gate::authorize_bucket(
                self.metadata.as_ref(),
                self.authorizer.as_ref(),
                &request.bucket,
                &request.requester,
            )
            .await?;
            let shadow = self.ensure_shadow_bucket(&bucket).await?;
            let splitter = self.config.splitter_for(shadow.schema_version);

            let upload_id = Uuid::new_v4().simple().to_string();
            let overview = OverviewRecord {
                key: request.object_key.clone(),
                upload_id: upload_id.clone(),
                initiator: Initiator {
                    id: request.requester.principal_id().to_string(),
                    display_name: request.requester.display_name.clone(),
                },
                owner_id: bucket.owner.clone(),
                initiated: Utc::now(),
            };
            let key = overview_key(&self.config, splitter, &request.object_key, &upload_id);
            self.metadata
                .put_object(&shadow.name, &key, MetadataRecord::Overview(overview))
                .await?;
            info!(upload_id = %upload_id, "initiated multipart upload");

            Ok(InitiateUploadOutput {
                bucket: request.bucket,
                object_key: request.object_key,
                upload_id,
            })
        }
        .instrument(span)
        .await
    }

    async fn ensure_shadow_bucket(&self, bucket: &Bucket) -> Result<Bucket> {
        let name = self.config.shadow_bucket_name(&bucket.name);
        match self.metadata.get_bucket(&name).await {
            Ok(shadow) => return Ok(shadow),
            Err(KeelError::BucketNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let owner = Requester::account(bucket.owner.clone(), bucket.owner_display_name.clone());
        let shadow = Bucket::new(name.clone(), &owner).with_schema_version(CURRENT_SCHEMA_VERSION);
        match self.metadata.create_bucket(shadow.clone()).await {
            Ok(()) => Ok(shadow),
            // Lost a race with a concurrent initiate.
            Err(KeelError::BucketAlreadyExists(_)) => self.metadata.get_bucket(&name).await,
            Err(err) => Err(err),
        }
    }
}
