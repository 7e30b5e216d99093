use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use futures::StreamExt;
use http::{
    HeaderMap, StatusCode,
    header::{CONTENT_LENGTH, ETAG},
};
use keel_auth::{StreamingV4Params, streaming::filter_body};
use keel_common::{BodyStream, KeelError, Requester, error::Result};
use keel_multipart::{InitiateUploadRequest, UploadPartOutput, UploadPartRequest};
use serde::Serialize;
use tracing::debug;

use super::{SSE_HEADER, SSE_KMS, SSE_KMS_KEY_ID_HEADER, header_value, quoted_etag, xml_response};
use crate::{
    error::S3Error,
    state::{AppState, RequestId},
};

const DECODED_CONTENT_LENGTH: &str = "x-amz-decoded-content-length";
const CONTENT_MD5: &str = "content-md5";

#[derive(Debug, Serialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
struct InitiateMultipartUploadResultXml {
    #[serde(rename = "Bucket")]
    bucket: String,
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "UploadId")]
    upload_id: String,
}

/// Per-request values taken out of the extensions the router's layers set.
struct RequestContext {
    requester: Requester,
    streaming: Option<StreamingV4Params>,
    request_id: String,
    resource: String,
}

impl RequestContext {
    fn from_request(request: &Request) -> Self {
        let extensions = request.extensions();
        Self {
            requester: extensions
                .get::<Requester>()
                .cloned()
                .unwrap_or_else(Requester::anonymous),
            streaming: extensions.get::<StreamingV4Params>().cloned(),
            request_id: extensions
                .get::<RequestId>()
                .map(|id| id.0.clone())
                .unwrap_or_default(),
            resource: request.uri().path().to_string(),
        }
    }

    fn fail(self, err: KeelError) -> Response {
        S3Error::new(err, self.resource, self.request_id).into_response()
    }
}

pub async fn post_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let ctx = RequestContext::from_request(&request);
    if !query.contains_key("uploads") {
        return ctx.fail(KeelError::NotImplemented(
            "POST object is only supported with ?uploads".to_string(),
        ));
    }

    let result = state
        .ingestor
        .initiate_upload(InitiateUploadRequest {
            request_id: ctx.request_id.clone(),
            bucket,
            object_key: key,
            requester: ctx.requester.clone(),
        })
        .await
        .and_then(|output| {
            xml_response(
                StatusCode::OK,
                &InitiateMultipartUploadResultXml {
                    bucket: output.bucket,
                    key: output.object_key,
                    upload_id: output.upload_id,
                },
            )
        });
    match result {
        Ok(response) => response,
        Err(err) => ctx.fail(err),
    }
}

pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let ctx = RequestContext::from_request(&request);
    let (Some(part_number), Some(upload_id)) = (query.get("partNumber"), query.get("uploadId"))
    else {
        return ctx.fail(KeelError::NotImplemented(
            "PUT object is only supported as a multipart part upload".to_string(),
        ));
    };
    if upload_id.is_empty() {
        return ctx.fail(KeelError::InvalidArgument("missing uploadId".to_string()));
    }

    let (parts, body) = request.into_parts();
    let prepared = declared_size(&parts.headers, ctx.streaming.is_some()).and_then(|size| {
        Ok((size, expected_md5(&parts.headers)?))
    });
    let (size, content_md5) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return ctx.fail(err),
    };

    let request = UploadPartRequest {
        request_id: ctx.request_id.clone(),
        bucket,
        object_key: key,
        upload_id: upload_id.clone(),
        part_number: part_number.clone(),
        size,
        content_md5,
        requester: ctx.requester.clone(),
        body: filter_body(body_stream(body, size), ctx.streaming.as_ref()),
    };
    match state
        .ingestor
        .upload_part(request)
        .await
        .and_then(|output| part_response(&output))
    {
        Ok(response) => response,
        Err(err) => ctx.fail(err),
    }
}

/// A client that drops or truncates its upload ends the body with an
/// error; that is reported as an incomplete body, not a server fault.
fn body_stream(body: Body, expected: u64) -> BodyStream {
    let mut received = 0u64;
    body.into_data_stream()
        .map(move |chunk| match chunk {
            Ok(bytes) => {
                received += bytes.len() as u64;
                Ok(bytes)
            }
            Err(err) => {
                debug!(error = %err, received, "request body read failed");
                Err(KeelError::IncompleteBody { expected, received })
            }
        })
        .boxed()
}

/// Payload size as the client declared it. Chunk-signed bodies carry the
/// payload size separately from the encoded length.
fn declared_size(headers: &HeaderMap, streaming: bool) -> Result<u64> {
    let name = if streaming {
        DECODED_CONTENT_LENGTH
    } else {
        CONTENT_LENGTH.as_str()
    };
    let value = headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or(KeelError::MissingContentLength)?;
    value
        .trim()
        .parse()
        .map_err(|_| KeelError::InvalidArgument(format!("invalid {name}: {value}")))
}

/// `Content-MD5` is base64 on the wire; the ingestion path compares hex.
fn expected_md5(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(CONTENT_MD5) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| KeelError::InvalidDigest("Content-MD5 is not ASCII".to_string()))?;
    let digest = BASE64_STANDARD
        .decode(value.trim())
        .map_err(|err| KeelError::InvalidDigest(format!("Content-MD5 is not base64: {err}")))?;
    if digest.len() != 16 {
        return Err(KeelError::InvalidDigest(format!(
            "Content-MD5 must be 16 bytes, got {}",
            digest.len()
        )));
    }
    Ok(Some(hex::encode(digest)))
}

fn part_response(output: &UploadPartOutput) -> Result<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(ETAG, header_value(&quoted_etag(&output.content_md5))?);
    if let Some(algorithm) = output.sse_algorithm.as_deref() {
        headers.insert(SSE_HEADER, header_value(algorithm)?);
        if algorithm == SSE_KMS {
            if let Some(key_id) = output.sse_master_key_id.as_deref() {
                headers.insert(SSE_KMS_KEY_ID_HEADER, header_value(key_id)?);
            }
        }
    }
    Ok((StatusCode::OK, headers).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_md5_becomes_hex() {
        let mut headers = HeaderMap::new();
        assert_eq!(expected_md5(&headers).unwrap(), None);

        headers.insert(CONTENT_MD5, "XUFAKrxLKna5cZ2REBfFkg==".parse().unwrap());
        assert_eq!(
            expected_md5(&headers).unwrap().as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );

        headers.insert(CONTENT_MD5, "not base64!".parse().unwrap());
        assert!(matches!(expected_md5(&headers), Err(KeelError::InvalidDigest(_))));

        headers.insert(CONTENT_MD5, "aGVsbG8=".parse().unwrap());
        assert!(matches!(expected_md5(&headers), Err(KeelError::InvalidDigest(_))));
    }

    #[tokio::test]
    async fn dropped_client_body_is_incomplete() {
        let chunks: Vec<std::result::Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut stream = body_stream(Body::from_stream(futures::stream::iter(chunks)), 10);

        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"abc");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            KeelError::IncompleteBody {
                expected: 10,
                received: 3
            }
        ));
        assert_eq!(err.s3_error_code(), "IncompleteBody");
    }

    #[test]
    fn streaming_bodies_use_decoded_length() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, "300".parse().unwrap());
        assert_eq!(declared_size(&headers, false).unwrap(), 300);
        assert!(matches!(
            declared_size(&headers, true),
            Err(KeelError::MissingContentLength)
        ));

        headers.insert(DECODED_CONTENT_LENGTH, "120".parse().unwrap());
        assert_eq!(declared_size(&headers, true).unwrap(), 120);

        assert!(matches!(
            declared_size(&HeaderMap::new(), false),
            Err(KeelError::MissingContentLength)
        ));
    }
}
