use keel_common::{Bucket, IngestConfig, KeelError, Requester, error::Result};
use keel_iam::{BucketAuthorizer, RequestType};
use keel_storage::{ListOptions, MetadataStore};
use tracing::debug;

use crate::keys::overview_key;

/// Outcome of the shadow-bucket check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadGrant {
    pub shadow_bucket: String,
    pub splitter: char,
}

/// Fetches the destination bucket and checks that `requester` may put
/// objects into it.
pub async fn authorize_bucket(
    store: &dyn MetadataStore,
    authorizer: &dyn BucketAuthorizer,
    bucket_name: &str,
    requester: &Requester,
) -> Result<Bucket> {
    let bucket = store.get_bucket(bucket_name).await?;
    if !authorizer.is_bucket_authorized(&bucket, RequestType::ObjectPut, requester) {
        debug!(bucket = bucket_name, principal = requester.principal_id(), "bucket access denied");
        return Err(KeelError::AccessDenied(format!(
            "put denied on bucket {bucket_name}"
        )));
    }
    Ok(bucket)
}

/// Resolves the upload's overview record in the shadow bucket and checks
/// that `requester` initiated it.
pub async fn authorize_upload(
    store: &dyn MetadataStore,
    config: &IngestConfig,
    bucket_name: &str,
    object_key: &str,
    upload_id: &str,
    requester: &Requester,
) -> Result<UploadGrant> {
    let no_such_upload = || KeelError::NoSuchUpload {
        upload_id: upload_id.to_string(),
    };

    let shadow_bucket = config.shadow_bucket_name(bucket_name);
    let shadow = match store.get_bucket(&shadow_bucket).await {
        Ok(shadow) => shadow,
        Err(KeelError::BucketNotFound(_)) => return Err(no_such_upload()),
        Err(err) => return Err(err),
    };
    let splitter = config.splitter_for(shadow.schema_version);

    // Listed by prefix so that an ambiguous upload id is caught, but only the
    // record stored under the exact key names this upload.
    let expected_key = overview_key(config, splitter, object_key, upload_id);
    let listed = store
        .list_objects(
            &shadow_bucket,
            &ListOptions {
                prefix: expected_key.clone(),
                max_keys: config.overview_list_limit,
            },
        )
        .await?;
    let [entry] = listed.as_slice() else {
        debug!(upload_id, matches = listed.len(), "overview lookup did not yield one record");
        return Err(no_such_upload());
    };
    if entry.key != expected_key {
        debug!(upload_id, found = %entry.key, "overview lookup matched another upload");
        return Err(no_such_upload());
    }
    let overview = entry.record.as_overview().ok_or_else(no_such_upload)?;

    if overview.initiator.id != requester.principal_id() {
        debug!(
            upload_id,
            initiator = %overview.initiator.id,
            principal = requester.principal_id(),
            "requester did not initiate upload"
        );
        return Err(KeelError::AccessDenied(format!(
            "upload {upload_id} was initiated by another principal"
        )));
    }

    Ok(UploadGrant {
        shadow_bucket,
        splitter,
    })
}
