pub mod gate;
pub mod initiate;
pub mod keys;
pub mod upload_part;
pub mod validate;
pub mod writer;

pub use initiate::{InitiateUploadOutput, InitiateUploadRequest};
pub use upload_part::{PartIngestor, UploadPartOutput, UploadPartRequest};
pub use writer::{HashingStream, StoredObject, write_object};
