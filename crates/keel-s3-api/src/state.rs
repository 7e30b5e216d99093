use std::sync::Arc;

use keel_crypto::KeyManager;
use keel_iam::IAMSys;
use keel_multipart::PartIngestor;
use keel_storage::MetadataStore;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: PartIngestor,
    pub metadata: Arc<dyn MetadataStore>,
    pub kms: Arc<dyn KeyManager>,
    pub iam: Arc<IAMSys>,
}

/// Identifier echoed in `x-amz-request-id` and in error bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);
