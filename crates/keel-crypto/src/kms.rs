use std::collections::HashMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use keel_common::{KeelError, types::SseConfig};
use tracing::debug;

use crate::{
    cipher,
    key::{KEY_SIZE, MasterKey, random_key},
};

pub const DEFAULT_KEY_ID: &str = "default";
pub const CRYPTO_SCHEME: u8 = 1;

/// Per-request encryption parameters. Only the descriptive fields are ever
/// persisted; the plaintext data key lives as long as the request.
#[derive(Clone)]
pub struct CipherBundle {
    pub algorithm: String,
    pub master_key_id: String,
    pub crypto_scheme: u8,
    pub ciphered_data_key: String,
    data_key: [u8; KEY_SIZE],
}

impl CipherBundle {
    pub fn data_key(&self) -> &[u8; KEY_SIZE] {
        &self.data_key
    }
}

impl std::fmt::Debug for CipherBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherBundle")
            .field("algorithm", &self.algorithm)
            .field("master_key_id", &self.master_key_id)
            .field("crypto_scheme", &self.crypto_scheme)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn create_cipher_bundle(&self, sse: &SseConfig) -> keel_common::Result<CipherBundle>;

    fn default_key_id(&self) -> &str;

    fn has_key(&self, key_id: &str) -> bool;
}

/// Key manager backed by master keys derived from one root secret.
#[derive(Debug, Clone)]
pub struct LocalKms {
    root: MasterKey,
    keys: HashMap<String, MasterKey>,
}

impl LocalKms {
    pub fn new(root: MasterKey) -> crate::Result<Self> {
        let default = root.derive(DEFAULT_KEY_ID)?;
        let mut keys = HashMap::new();
        keys.insert(DEFAULT_KEY_ID.to_string(), default);
        Ok(Self { root, keys })
    }

    pub fn with_key(mut self, key_id: &str) -> crate::Result<Self> {
        let key = self.root.derive(key_id)?;
        self.keys.insert(key_id.to_string(), key);
        Ok(self)
    }

    /// Recovers the plaintext data key recorded on a data location.
    pub fn decipher_data_key(
        &self,
        master_key_id: &str,
        ciphered_data_key: &str,
    ) -> keel_common::Result<[u8; KEY_SIZE]> {
        let master = self.master_key(master_key_id)?;
        let wrapped = BASE64_STANDARD.decode(ciphered_data_key).map_err(|err| {
            KeelError::InternalError(format!("ciphered data key is not base64: {err}"))
        })?;
        let plain = cipher::decrypt(master.as_bytes(), &wrapped)?;
        let mut key = [0_u8; KEY_SIZE];
        if plain.len() != KEY_SIZE {
            return Err(crate::CryptoError::InvalidKeyLength(plain.len()).into());
        }
        key.copy_from_slice(&plain);
        Ok(key)
    }

    fn master_key(&self, key_id: &str) -> keel_common::Result<&MasterKey> {
        self.keys
            .get(key_id)
            .ok_or_else(|| KeelError::KmsKeyNotFound(key_id.to_string()))
    }
}

#[async_trait]
impl KeyManager for LocalKms {
    async fn create_cipher_bundle(&self, sse: &SseConfig) -> keel_common::Result<CipherBundle> {
        let master_key_id = if sse.master_key_id.is_empty() {
            DEFAULT_KEY_ID
        } else {
            sse.master_key_id.as_str()
        };
        let master = self.master_key(master_key_id)?;

        let data_key = random_key();
        let wrapped = cipher::encrypt(master.as_bytes(), &data_key)?;
        debug!(master_key_id, algorithm = %sse.algorithm, "created cipher bundle");

        Ok(CipherBundle {
            algorithm: sse.algorithm.clone(),
            master_key_id: master_key_id.to_string(),
            crypto_scheme: CRYPTO_SCHEME,
            ciphered_data_key: BASE64_STANDARD.encode(wrapped),
            data_key,
        })
    }

    fn default_key_id(&self) -> &str {
        DEFAULT_KEY_ID
    }

    fn has_key(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }
}
