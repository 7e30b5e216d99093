pub mod cipher;
pub mod key;
pub mod kms;

pub use key::MasterKey;
pub use kms::{CipherBundle, KeyManager, LocalKms};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(&'static str),
    #[error("encryption failure")]
    Encrypt,
    #[error("decryption failure")]
    Decrypt,
    #[error("key derivation failure")]
    KeyDerivation,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

impl From<CryptoError> for keel_common::KeelError {
    fn from(err: CryptoError) -> Self {
        keel_common::KeelError::InternalError(err.to_string())
    }
}
