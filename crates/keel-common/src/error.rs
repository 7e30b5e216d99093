use thiserror::Error;

/// Coarse failure classes surfaced at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Authorization,
    Authentication,
    NotFound,
    Integrity,
    Internal,
}

#[derive(Debug, Error)]
pub enum KeelError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),
    #[error("record not found: {namespace}/{key}")]
    RecordNotFound { namespace: String, key: String },
    #[error("upload not found: {upload_id}")]
    NoSuchUpload { upload_id: String },
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("part number {part_number} exceeds the maximum of {max_part_number}")]
    TooManyParts {
        part_number: i64,
        max_part_number: u32,
    },
    #[error("entity too large: size={size}, max_size={max_size}")]
    EntityTooLarge { size: u64, max_size: u64 },
    #[error("missing content length")]
    MissingContentLength,
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("incomplete body: expected {expected} bytes, received {received}")]
    IncompleteBody { expected: u64, received: u64 },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("signature does not match")]
    SignatureDoesNotMatch,
    #[error("content digest mismatch: expected {expected}, computed {computed}")]
    BadDigest { expected: String, computed: String },
    #[error("master key not found: {0}")]
    KmsKeyNotFound(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KeelError {
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::RecordNotFound { .. } => "NoSuchKey",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::TooManyParts { .. } => "TooManyParts",
            Self::EntityTooLarge { .. } => "EntityTooLarge",
            Self::MissingContentLength => "MissingContentLength",
            Self::InvalidDigest(_) => "InvalidDigest",
            Self::IncompleteBody { .. } => "IncompleteBody",
            Self::AccessDenied(_) => "AccessDenied",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::BadDigest { .. } => "BadDigest",
            Self::KmsKeyNotFound(_) => "KMS.NotFoundException",
            Self::NotImplemented(_) => "NotImplemented",
            Self::InternalError(_) => "InternalError",
            Self::Io(_) => "InternalError",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidBucketName(_)
            | Self::BucketAlreadyExists(_)
            | Self::InvalidArgument(_)
            | Self::TooManyParts { .. }
            | Self::EntityTooLarge { .. }
            | Self::MissingContentLength
            | Self::InvalidDigest(_)
            | Self::IncompleteBody { .. }
            | Self::NotImplemented(_) => ErrorClass::Validation,
            Self::AccessDenied(_) => ErrorClass::Authorization,
            Self::SignatureDoesNotMatch => ErrorClass::Authentication,
            Self::BucketNotFound(_)
            | Self::RecordNotFound { .. }
            | Self::NoSuchUpload { .. }
            | Self::KmsKeyNotFound(_) => ErrorClass::NotFound,
            Self::BadDigest { .. } => ErrorClass::Integrity,
            Self::InternalError(_) | Self::Io(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, KeelError>;
