use hmac::{Hmac, Mac};
use http::HeaderMap;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::parser::SIGNING_ALGORITHM;

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of the empty string.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
pub const STREAMING_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
const CHUNK_ALGORITHM: &str = "AWS4-HMAC-SHA256-PAYLOAD";

const AWS_URI_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']');

/// Everything needed to recompute the signature of a header-signed request.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub query_string: &'a str,
    pub headers: &'a HeaderMap,
    pub signed_headers: &'a [String],
    pub payload_hash: &'a str,
    pub date_time: &'a str,
    pub date: &'a str,
    pub region: &'a str,
}

pub fn get_signing_key(secret_key: &str, date: &str, region: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, b"s3");
    hmac_sha256(&service_key, b"aws4_request")
}

pub fn get_scope(date: &str, region: &str) -> String {
    format!("{date}/{region}/s3/aws4_request")
}

pub fn get_string_to_sign(canonical_request: &str, date_time: &str, scope: &str) -> String {
    let canonical_hash = sha256_hex(canonical_request.as_bytes());
    format!("{SIGNING_ALGORITHM}\n{date_time}\n{scope}\n{canonical_hash}")
}

/// String-to-sign for one chunk of a streaming upload; each chunk chains on
/// the signature of the one before it, starting from the request signature.
pub fn get_chunk_string_to_sign(
    date_time: &str,
    scope: &str,
    previous_signature: &str,
    chunk: &[u8],
) -> String {
    let chunk_hash = sha256_hex(chunk);
    format!(
        "{CHUNK_ALGORITHM}\n{date_time}\n{scope}\n{previous_signature}\n{EMPTY_SHA256}\n{chunk_hash}"
    )
}

pub fn get_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

/// Computes the signature a client should have produced for `request`.
pub fn compute_signature(secret_key: &str, request: &SignedRequest<'_>) -> Option<String> {
    let mut names = request
        .signed_headers
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();

    let canonical_headers = canonical_headers(request.headers, &names)?;
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        canonical_uri(request.uri),
        canonical_query_string(request.query_string),
        canonical_headers,
        names.join(";"),
        request.payload_hash,
    );

    let scope = get_scope(request.date, request.region);
    let string_to_sign = get_string_to_sign(&canonical_request, request.date_time, &scope);
    let signing_key = get_signing_key(secret_key, request.date, request.region);
    Some(get_signature(&signing_key, &string_to_sign))
}

pub fn verify_signature(secret_key: &str, request: &SignedRequest<'_>, signature: &str) -> bool {
    compute_signature(secret_key, request)
        .is_some_and(|computed| constant_time_eq(computed.as_bytes(), signature.as_bytes()))
}

pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let starts_with_slash = path.starts_with('/');
    let ends_with_slash = path.ends_with('/');
    let encoded_segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(percent_encode)
        .collect::<Vec<_>>();

    let mut out = String::new();
    if starts_with_slash {
        out.push('/');
    }
    out.push_str(&encoded_segments.join("/"));
    if ends_with_slash && !out.ends_with('/') {
        out.push('/');
    }
    if out.is_empty() { "/".to_string() } else { out }
}

pub fn canonical_query_string(query_string: &str) -> String {
    let mut params = query_string
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_encode(name), percent_encode(value))
        })
        .collect::<Vec<_>>();

    params.sort();

    params
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(left ^ right);
    }
    diff == 0
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_headers(headers: &HeaderMap, sorted_names: &[String]) -> Option<String> {
    let mut out = String::new();
    for name in sorted_names {
        let value = headers.get(name.as_str())?.to_str().ok()?;
        out.push_str(name);
        out.push(':');
        out.push_str(&normalize_header_value(value));
        out.push('\n');
    }
    Some(out)
}

fn normalize_header_value(value: &str) -> String {
    value.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, AWS_URI_ENCODE_SET).to_string()
}
