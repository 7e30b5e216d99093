use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};

use crate::error::{KeelError, Result};

/// Request body as it flows from the network towards the data backend.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub fn body_from_bytes(data: impl Into<Bytes>) -> BodyStream {
    let data = data.into();
    if data.is_empty() {
        return stream::empty().boxed();
    }
    stream::once(async move { Ok::<_, KeelError>(data) }).boxed()
}

pub fn body_from_chunks<I>(chunks: I) -> BodyStream
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    stream::iter(chunks.into_iter().map(Ok)).boxed()
}
