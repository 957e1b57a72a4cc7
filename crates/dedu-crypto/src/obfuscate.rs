//! Structural obfuscation: PBKDF2-derived AES under well-known passwords
//!
//! Two forms share one key cache:
//! - `obfuscate_block`/`unobfuscate_block`: a single AES block carrying a
//!   length-tagged message of up to 15 bytes. Used for the outer magic,
//!   whose length readers must know bit-exactly (always 16 bytes).
//! - `obfuscate`/`unobfuscate`: AES-GCM with a random nonce, used for the
//!   variable-length public header, which the tag also authenticates.

use std::collections::HashMap;
use std::sync::Mutex;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes::Aes128;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;

use dedu_core::{DeduError, DeduResult};

const SALT: &[u8] = b"DEDUDEDU";
const ITERATION_COUNT: u32 = 4096;
const KEY_LENGTH: usize = 16;
const BLOCK_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

/// Derives and caches AES keys per password. The empty password is
/// pre-derived at construction since it covers almost every call.
pub struct Obfuscator {
    key_cache: Mutex<HashMap<String, [u8; KEY_LENGTH]>>,
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self::new()
    }
}

impl Obfuscator {
    pub fn new() -> Self {
        let rv = Self {
            key_cache: Mutex::new(HashMap::new()),
        };
        rv.derive_key("");
        rv
    }

    fn derive_key(&self, password: &str) -> [u8; KEY_LENGTH] {
        let mut cache = self.key_cache.lock().expect("obfuscator key cache poisoned");
        if let Some(key) = cache.get(password) {
            return *key;
        }
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha1>(password.as_bytes(), SALT, ITERATION_COUNT, &mut key);
        cache.insert(password.to_string(), key);
        key
    }

    /// Encrypt at most 15 bytes into one 16-byte AES block, prefixed by a
    /// length tag and zero-padded. Deterministic for a given password.
    pub fn obfuscate_block(&self, plaintext: &[u8], password: &str) -> DeduResult<Vec<u8>> {
        if plaintext.len() + 1 > BLOCK_SIZE {
            return Err(DeduError::TooLong(plaintext.len()));
        }

        let key = self.derive_key(password);
        let cipher = Aes128::new(GenericArray::from_slice(&key));

        let mut block = [0u8; BLOCK_SIZE];
        block[0] = plaintext.len() as u8;
        block[1..1 + plaintext.len()].copy_from_slice(plaintext);

        let mut ga = GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut ga);
        Ok(ga.to_vec())
    }

    /// Invert `obfuscate_block`. The length tag must fit the block.
    pub fn unobfuscate_block(&self, cryptotext: &[u8], password: &str) -> DeduResult<Vec<u8>> {
        if cryptotext.len() != BLOCK_SIZE {
            return Err(DeduError::InvalidBlock);
        }

        let key = self.derive_key(password);
        let cipher = Aes128::new(GenericArray::from_slice(&key));

        let mut block = GenericArray::clone_from_slice(cryptotext);
        cipher.decrypt_block(&mut block);

        let length = block[0] as usize;
        if length + 1 > BLOCK_SIZE {
            return Err(DeduError::InvalidBlock);
        }
        Ok(block[1..1 + length].to_vec())
    }

    /// AES-GCM with a fresh random nonce; output is `nonce || sealed`.
    pub fn obfuscate(&self, plaintext: &[u8], password: &str) -> DeduResult<Vec<u8>> {
        let key = self.derive_key(password);
        let cipher = Aes128Gcm::new(GenericArray::from_slice(&key));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| DeduError::InvalidCipher)?;

        let mut rv = Vec::with_capacity(NONCE_SIZE + sealed.len());
        rv.extend_from_slice(&nonce_bytes);
        rv.extend_from_slice(&sealed);
        Ok(rv)
    }

    /// Invert `obfuscate`. Truncation or tag mismatch is `InvalidCipher`.
    pub fn unobfuscate(&self, cryptotext: &[u8], password: &str) -> DeduResult<Vec<u8>> {
        if cryptotext.len() < NONCE_SIZE {
            return Err(DeduError::InvalidCipher);
        }
        let (nonce_bytes, sealed) = cryptotext.split_at(NONCE_SIZE);

        let key = self.derive_key(password);
        let cipher = Aes128Gcm::new(GenericArray::from_slice(&key));

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| DeduError::InvalidCipher)
    }
}
