use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::{CryptoError, Result};

const NONCE_SIZE: usize = 12;
const FRAME_HEADER_SIZE: usize = 4;

pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(32))?;
    let mut nonce_bytes = [0_u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(CryptoError::InvalidCiphertext("missing nonce"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(32))?;
    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| CryptoError::Decrypt)
}

/// Seals one chunk of a streamed object as `len (u32 BE) || nonce || ciphertext`.
pub fn seal_frame(key: &[u8; 32], chunk: &[u8]) -> Result<Vec<u8>> {
    let sealed = encrypt(key, chunk)?;
    let len = u32::try_from(sealed.len()).map_err(|_| CryptoError::Encrypt)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + sealed.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&sealed);
    Ok(frame)
}

/// Reverses a sequence of [`seal_frame`] outputs.
pub fn open_frames(key: &[u8; 32], mut data: &[u8]) -> Result<Vec<u8>> {
    let mut plaintext = Vec::new();
    while !data.is_empty() {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(CryptoError::InvalidCiphertext("truncated frame header"));
        }
        let (header, rest) = data.split_at(FRAME_HEADER_SIZE);
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if rest.len() < len {
            return Err(CryptoError::InvalidCiphertext("truncated frame"));
        }
        let (sealed, rest) = rest.split_at(len);
        plaintext.extend_from_slice(&decrypt(key, sealed)?);
        data = rest;
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_open_in_order() {
        let key = [3_u8; 32];
        let mut stored = seal_frame(&key, b"hello ").unwrap();
        stored.extend(seal_frame(&key, b"world").unwrap());
        assert_eq!(open_frames(&key, &stored).unwrap(), b"hello world");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = encrypt(&[1_u8; 32], b"secret").unwrap();
        assert!(matches!(
            decrypt(&[2_u8; 32], &sealed),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let key = [3_u8; 32];
        let frame = seal_frame(&key, b"payload").unwrap();
        assert!(open_frames(&key, &frame[..frame.len() - 1]).is_err());
    }
}
