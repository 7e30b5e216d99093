pub mod config;
pub mod error;
pub mod stream;
pub mod types;

pub use config::IngestConfig;
pub use error::{ErrorClass, KeelError, Result};
pub use stream::BodyStream;
pub use types::{Bucket, DataLocation, MetadataRecord, OverviewRecord, PartRecord, Requester};
