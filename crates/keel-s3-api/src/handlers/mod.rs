pub mod admin;
pub mod bucket;
pub mod multipart;

use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode};
use keel_common::{KeelError, error::Result};
use quick_xml::se::to_string as xml_to_string;
use serde::Serialize;

pub(crate) const SSE_HEADER: &str = "x-amz-server-side-encryption";
pub(crate) const SSE_KMS_KEY_ID_HEADER: &str = "x-amz-server-side-encryption-aws-kms-key-id";
pub(crate) const SSE_AES256: &str = "AES256";
pub(crate) const SSE_KMS: &str = "aws:kms";

pub(crate) fn xml_response<T: Serialize>(status: StatusCode, payload: &T) -> Result<Response> {
    let xml = xml_to_string(payload).map_err(|err| {
        KeelError::InternalError(format!("failed to serialize xml response: {err}"))
    })?;
    let body = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{xml}");
    Ok((status, [("Content-Type", "application/xml")], body).into_response())
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| KeelError::InvalidArgument(format!("invalid header value: {err}")))
}

pub(crate) fn quoted_etag(etag: &str) -> String {
    if etag.starts_with('"') && etag.ends_with('"') {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}
