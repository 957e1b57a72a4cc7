//! AES-256-GCM keysets
//!
//! One key type backs both the operator's global AEAD key (sealing private
//! headers) and the fresh per-chunk keys (sealing chunk payloads). Sealed
//! output is `nonce(12) || ciphertext+tag`, no associated data.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::anyhow;
use prost::Message;
use rand::RngCore;
use zeroize::Zeroize;

use dedu_core::{DeduError, DeduResult};

use crate::wire::ChunkKeyset;

pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

#[derive(Clone)]
pub struct AeadKey {
    bytes: [u8; KEY_SIZE],
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadKey").field("bytes", &"[REDACTED]").finish()
    }
}

impl AeadKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.bytes))
    }

    /// Encrypt; output is `nonce || ciphertext+tag`.
    pub fn seal(&self, plaintext: &[u8]) -> DeduResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| DeduError::InvalidCipher)?;

        let mut rv = Vec::with_capacity(NONCE_SIZE + sealed.len());
        rv.extend_from_slice(&nonce_bytes);
        rv.extend_from_slice(&sealed);
        Ok(rv)
    }

    /// Decrypt the output of `seal`.
    pub fn open(&self, cryptotext: &[u8]) -> DeduResult<Vec<u8>> {
        if cryptotext.len() < NONCE_SIZE {
            return Err(DeduError::InvalidCipher);
        }
        let (nonce_bytes, sealed) = cryptotext.split_at(NONCE_SIZE);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| DeduError::InvalidCipher)
    }

    /// Serialize as a `ChunkKeyset` message (stored inside private headers
    /// and, base64'd, in the operator's secrets file).
    pub fn to_keyset_bytes(&self) -> Vec<u8> {
        ChunkKeyset {
            aes256_gcm_key: self.bytes.to_vec(),
        }
        .encode_to_vec()
    }

    pub fn from_keyset_bytes(data: &[u8]) -> DeduResult<Self> {
        let keyset = ChunkKeyset::decode(data)
            .map_err(|e| anyhow!("error parsing keyset: {e}"))?;
        let bytes: [u8; KEY_SIZE] = keyset
            .aes256_gcm_key
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("keyset key has {} bytes, wanted {KEY_SIZE}", keyset.aes256_gcm_key.len()))?;
        Ok(Self::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = AeadKey::generate();
        let sealed = key.seal(b"chunk payload").unwrap();
        assert_eq!(key.open(&sealed).unwrap(), b"chunk payload");
    }

    #[test]
    fn generated_keys_differ() {
        let a = AeadKey::generate();
        let b = AeadKey::generate();
        assert_ne!(a.bytes, b.bytes);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = AeadKey::generate().seal(b"secret").unwrap();
        assert!(matches!(
            AeadKey::generate().open(&sealed).unwrap_err(),
            DeduError::InvalidCipher
        ));
    }

    #[test]
    fn keyset_roundtrip() {
        let key = AeadKey::generate();
        let serialized = key.to_keyset_bytes();
        let restored = AeadKey::from_keyset_bytes(&serialized).unwrap();

        let sealed = key.seal(b"cross-key check").unwrap();
        assert_eq!(restored.open(&sealed).unwrap(), b"cross-key check");
    }

    #[test]
    fn keyset_wrong_length_rejected() {
        let bad = ChunkKeyset {
            aes256_gcm_key: vec![0u8; 16],
        }
        .encode_to_vec();
        assert!(AeadKey::from_keyset_bytes(&bad).is_err());
    }

    #[test]
    fn keyset_garbage_rejected() {
        assert!(AeadKey::from_keyset_bytes(&[0xFF, 0xFF, 0xFF]).is_err());
    }
}
