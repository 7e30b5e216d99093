use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use keel_common::{BodyStream, KeelError, Result};
use pin_project_lite::pin_project;
use tracing::debug;

use crate::signature_v4::{
    constant_time_eq, get_chunk_string_to_sign, get_signature, get_signing_key,
};

/// Largest chunk the filter will buffer before verifying it.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
const MAX_HEADER_LEN: usize = 4096;
const SIGNATURE_PREFIX: &str = ";chunk-signature=";
const SIGNATURE_HEX_LEN: usize = 64;

/// Parameters of a request whose body is sent as signed chunks.
#[derive(Clone)]
pub struct StreamingV4Params {
    pub access_key: String,
    pub secret_key: String,
    pub seed_signature: String,
    pub region: String,
    pub scope_date: String,
    pub timestamp: String,
    pub credential_scope: String,
}

impl std::fmt::Debug for StreamingV4Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingV4Params")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .field("timestamp", &self.timestamp)
            .field("credential_scope", &self.credential_scope)
            .finish_non_exhaustive()
    }
}

/// Wraps `body` in a [`ChunkSignatureFilter`] when the request carried
/// streaming parameters; otherwise returns it untouched.
pub fn filter_body(body: BodyStream, params: Option<&StreamingV4Params>) -> BodyStream {
    match params {
        Some(params) => ChunkSignatureFilter::new(body, params).boxed(),
        None => body,
    }
}

#[derive(Debug)]
enum State {
    Header,
    Data { size: usize, signature: String },
    Done,
    Failed,
}

pin_project! {
    /// Decodes an `aws-chunked` body, yielding each chunk's payload only once
    /// its signature has been verified against the chain started by the
    /// request signature.
    pub struct ChunkSignatureFilter<S> {
        #[pin]
        inner: S,
        buffer: BytesMut,
        state: State,
        previous_signature: String,
        signing_key: Vec<u8>,
        timestamp: String,
        scope: String,
    }
}

impl<S> ChunkSignatureFilter<S> {
    pub fn new(inner: S, params: &StreamingV4Params) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            state: State::Header,
            previous_signature: params.seed_signature.clone(),
            signing_key: get_signing_key(&params.secret_key, &params.scope_date, &params.region),
            timestamp: params.timestamp.clone(),
            scope: params.credential_scope.clone(),
        }
    }
}

fn parse_chunk_header(line: &[u8]) -> Option<(usize, String)> {
    let line = std::str::from_utf8(line).ok()?;
    let (size, signature) = line.split_once(SIGNATURE_PREFIX)?;
    let size = usize::from_str_radix(size.trim(), 16).ok()?;
    let signature = signature.trim();
    if signature.len() != SIGNATURE_HEX_LEN || !signature.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((size, signature.to_ascii_lowercase()))
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\r\n")
}

impl<S> Stream for ChunkSignatureFilter<S>
where
    S: Stream<Item = Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            let needs_input = match this.state {
                State::Done | State::Failed => return Poll::Ready(None),
                State::Header => match find_crlf(this.buffer) {
                    Some(end) => {
                        let line = this.buffer.split_to(end);
                        this.buffer.advance(2);
                        let Some((size, signature)) = parse_chunk_header(&line) else {
                            debug!("malformed chunk header");
                            *this.state = State::Failed;
                            return Poll::Ready(Some(Err(KeelError::SignatureDoesNotMatch)));
                        };
                        if size > MAX_CHUNK_SIZE {
                            debug!(size, "chunk exceeds maximum size");
                            *this.state = State::Failed;
                            return Poll::Ready(Some(Err(KeelError::SignatureDoesNotMatch)));
                        }
                        *this.state = State::Data { size, signature };
                        false
                    }
                    None if this.buffer.len() > MAX_HEADER_LEN => {
                        *this.state = State::Failed;
                        return Poll::Ready(Some(Err(KeelError::SignatureDoesNotMatch)));
                    }
                    None => true,
                },
                State::Data { size, signature } => {
                    let size = *size;
                    if this.buffer.len() < size + 2 {
                        true
                    } else {
                        let chunk = this.buffer.split_to(size).freeze();
                        let trailer = this.buffer.split_to(2);
                        let string_to_sign = get_chunk_string_to_sign(
                            this.timestamp,
                            this.scope,
                            this.previous_signature,
                            &chunk,
                        );
                        let expected = get_signature(this.signing_key, &string_to_sign);
                        if &trailer[..] != b"\r\n"
                            || !constant_time_eq(expected.as_bytes(), signature.as_bytes())
                        {
                            debug!(size, "chunk signature mismatch");
                            *this.state = State::Failed;
                            return Poll::Ready(Some(Err(KeelError::SignatureDoesNotMatch)));
                        }

                        *this.previous_signature = expected;
                        if size == 0 {
                            *this.state = State::Done;
                            return Poll::Ready(None);
                        }
                        *this.state = State::Header;
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
            };

            if needs_input {
                match this.inner.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                    Poll::Ready(Some(Err(err))) => {
                        *this.state = State::Failed;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        debug!("body ended before the final chunk");
                        *this.state = State::Failed;
                        return Poll::Ready(Some(Err(KeelError::SignatureDoesNotMatch)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}
