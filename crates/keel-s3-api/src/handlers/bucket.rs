use axum::{
    Extension,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode, header::LOCATION};
use keel_common::{
    Bucket, KeelError, Requester,
    error::Result,
    types::SseConfig,
};
use keel_crypto::KeyManager;
use tracing::info;

use super::{SSE_AES256, SSE_HEADER, SSE_KMS, SSE_KMS_KEY_ID_HEADER, header_value};
use crate::{error::S3Error, state::{AppState, RequestId}};

pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Extension(requester): Extension<Requester>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
) -> Response {
    let resource = format!("/{bucket}");
    match create_bucket_inner(&state, &bucket, &requester, &headers).await {
        Ok(response) => response,
        Err(err) => S3Error::new(err, resource, request_id.0).into_response(),
    }
}

async fn create_bucket_inner(
    state: &AppState,
    name: &str,
    requester: &Requester,
    headers: &HeaderMap,
) -> Result<Response> {
    if requester.is_anonymous() {
        return Err(KeelError::AccessDenied(
            "anonymous requests cannot create buckets".to_string(),
        ));
    }
    validate_bucket_name(name)?;

    let mut bucket = Bucket::new(name, requester);
    if let Some(sse) = parse_bucket_encryption(headers, state.kms.as_ref())? {
        bucket = bucket.with_encryption(sse);
    }
    state.metadata.create_bucket(bucket).await?;
    info!(bucket = name, owner = %requester.canonical_id, "created bucket");

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert(LOCATION, header_value(&format!("/{name}"))?);
    Ok(response)
}

fn parse_bucket_encryption(headers: &HeaderMap, kms: &dyn KeyManager) -> Result<Option<SseConfig>> {
    let Some(algorithm) = headers
        .get(SSE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
    else {
        return Ok(None);
    };

    match algorithm {
        SSE_AES256 => Ok(Some(SseConfig {
            algorithm: SSE_AES256.to_string(),
            master_key_id: kms.default_key_id().to_string(),
        })),
        SSE_KMS => {
            let key_id = headers
                .get(SSE_KMS_KEY_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(kms.default_key_id());
            if !kms.has_key(key_id) {
                return Err(KeelError::KmsKeyNotFound(key_id.to_string()));
            }
            Ok(Some(SseConfig {
                algorithm: SSE_KMS.to_string(),
                master_key_id: key_id.to_string(),
            }))
        }
        other => Err(KeelError::InvalidArgument(format!(
            "unsupported {SSE_HEADER} algorithm: {other}"
        ))),
    }
}

/// DNS-compatible names: 3 to 63 characters of lowercase letters, digits,
/// `.` and `-`, starting and ending with a letter or digit.
fn validate_bucket_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    let valid_len = (3..=63).contains(&bytes.len());
    let valid_chars = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'.' || *b == b'-');
    let valid_edges = bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric);
    if valid_len && valid_chars && valid_edges && !name.contains("..") {
        Ok(())
    } else {
        Err(KeelError::InvalidBucketName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use keel_crypto::{LocalKms, MasterKey};

    use super::*;

    #[test]
    fn bucket_names() {
        for name in ["photos", "my-bucket.v2", "abc"] {
            assert!(validate_bucket_name(name).is_ok(), "{name}");
        }
        for name in ["ab", "Photos", "-photos", "photos-", "a..b", "mpuShadowBucketphotos"] {
            assert!(validate_bucket_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn encryption_headers() {
        let kms = LocalKms::new(MasterKey::generate()).unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(parse_bucket_encryption(&headers, &kms).unwrap(), None);

        headers.insert(SSE_HEADER, "AES256".parse().unwrap());
        let sse = parse_bucket_encryption(&headers, &kms).unwrap().unwrap();
        assert_eq!(sse.algorithm, "AES256");
        assert_eq!(sse.master_key_id, "default");

        headers.insert(SSE_HEADER, "aws:kms".parse().unwrap());
        headers.insert(SSE_KMS_KEY_ID_HEADER, "unknown".parse().unwrap());
        assert!(matches!(
            parse_bucket_encryption(&headers, &kms),
            Err(KeelError::KmsKeyNotFound(_))
        ));

        headers.insert(SSE_HEADER, "rot13".parse().unwrap());
        assert!(matches!(
            parse_bucket_encryption(&headers, &kms),
            Err(KeelError::InvalidArgument(_))
        ));
    }
}
