pub mod credentials;
pub mod middleware;
pub mod parser;
pub mod signature_v4;
pub mod streaming;

pub use credentials::{CredentialProvider, Credentials, IamCredentialProvider};
pub use middleware::AuthLayer;
pub use streaming::{ChunkSignatureFilter, StreamingV4Params};
