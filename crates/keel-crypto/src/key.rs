use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use crate::{CryptoError, Result};

pub const KEY_SIZE: usize = 32;
const HKDF_SALT: &[u8] = b"keel-kms-v1";

#[derive(Clone)]
pub struct MasterKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

impl MasterKey {
    pub fn generate() -> Self {
        Self {
            key: random_key(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }

        let mut key = [0_u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value.trim()).map_err(|_| CryptoError::InvalidKeyLength(0))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Derives the named master key from a root secret, so one configured
    /// secret can back any number of key ids.
    pub fn derive(&self, key_id: &str) -> Result<Self> {
        let mut output = [0_u8; KEY_SIZE];
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.key);
        hk.expand(format!("key-id={key_id}").as_bytes(), &mut output)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(Self { key: output })
    }
}

pub fn random_key() -> [u8; KEY_SIZE] {
    let mut key = [0_u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_stable_per_key_id() {
        let root = MasterKey::from_bytes(&[7_u8; KEY_SIZE]).unwrap();
        let a = root.derive("default").unwrap();
        let b = root.derive("default").unwrap();
        let c = root.derive("archive").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            MasterKey::from_bytes(&[0_u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(MasterKey::from_hex("zz").is_err());
    }
}
