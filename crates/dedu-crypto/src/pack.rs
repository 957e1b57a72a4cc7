//! Building and parsing the layered chunk container

use std::sync::Arc;

use anyhow::anyhow;
use md5::Md5;
use prost::Message;
use sha1::{Digest, Sha1};

use dedu_core::{DeduError, DeduResult};
use dedu_hash::Hasher;

use crate::keyset::AeadKey;
use crate::obfuscate::Obfuscator;
use crate::wire::{ChunkMetadata, Hashes, MagicHeader, PrivateHeader, PublicHeader, VirtualChunk};

const MAGIC_BLOCK_SIZE: usize = 16;
const PROTOCOL_VERSION: i32 = 1;
const EMPTY_PASSWORD: &str = "";

/// Optional extras packed into a chunk's private header.
#[derive(Debug, Clone, Default)]
pub struct ExtraData {
    pub virtual_chunk: Option<VirtualChunk>,
    pub metadata: Option<ChunkMetadata>,
}

/// All three parsed header layers of an unpacked chunk.
#[derive(Debug, Clone)]
pub struct Header {
    pub magic: MagicHeader,
    pub public: PublicHeader,
    pub private: PrivateHeader,
}

pub struct Packer {
    hasher: Arc<Hasher>,
    obfuscator: Arc<Obfuscator>,
    /// The operator's global AEAD key, sealing private headers only.
    encrypter: AeadKey,
}

fn calculate_hashes(content: &[u8]) -> Hashes {
    Hashes {
        md5: Md5::digest(content).to_vec(),
        sha1: Sha1::digest(content).to_vec(),
    }
}

impl Packer {
    pub fn new(hasher: Arc<Hasher>, obfuscator: Arc<Obfuscator>, encrypter: AeadKey) -> Self {
        Self {
            hasher,
            obfuscator,
            encrypter,
        }
    }

    /// Pack `plaintext` into the on-wire container.
    ///
    /// A fresh AES-256-GCM key is generated per call and sealed inside the
    /// private header; packing identical plaintexts twice therefore never
    /// yields identical bytes, but always the same chunk id. Virtual chunks
    /// must carry no plaintext and bring their own chunk id.
    pub fn pack(&self, plaintext: &[u8], extra: Option<&ExtraData>) -> DeduResult<Vec<u8>> {
        let chunk_id = match extra.and_then(|e| e.virtual_chunk.as_ref()) {
            Some(vchunk) => {
                if !plaintext.is_empty() {
                    return Err(anyhow!("virtual chunk cannot have data").into());
                }
                if vchunk.chunk_id.is_empty() {
                    return Err(anyhow!("virtual chunk ID not set").into());
                }
                vchunk.chunk_id.clone()
            }
            None => self.hasher.compute_hash(plaintext)?,
        };

        let chunk_key = AeadKey::generate();

        let mut private_header = PrivateHeader {
            chunk_specific_encryption_key: chunk_key.to_keyset_bytes(),
            plaintext_length: plaintext.len() as i32,
            plaintext_hashes: None,
            virtual_chunk: None,
            optional_metadata: None,
        };
        if !plaintext.is_empty() {
            private_header.plaintext_hashes = Some(calculate_hashes(plaintext));
        }
        if let Some(extra) = extra {
            private_header.virtual_chunk = extra.virtual_chunk.clone();
            private_header.optional_metadata = extra.metadata.clone();
        }

        let private_cryptotext = self.encrypter.seal(&private_header.encode_to_vec())?;

        let public_header = PublicHeader {
            chunk_id,
            private_header_length: private_cryptotext.len() as i32,
        };
        let public_obfuscated = self
            .obfuscator
            .obfuscate(&public_header.encode_to_vec(), EMPTY_PASSWORD)?;

        let magic_header = MagicHeader {
            dedu: "DEDU".into(),
            protocol_version: PROTOCOL_VERSION,
            public_header_length: public_obfuscated.len() as i32,
        };
        let magic_block = self
            .obfuscator
            .obfuscate_block(&magic_header.encode_to_vec(), EMPTY_PASSWORD)?;
        if magic_block.len() != MAGIC_BLOCK_SIZE {
            return Err(anyhow!(
                "sanity check failed: produced magic block of length {}",
                magic_block.len()
            )
            .into());
        }

        let mut packed = magic_block;
        packed.extend_from_slice(&public_obfuscated);
        packed.extend_from_slice(&private_cryptotext);
        if !plaintext.is_empty() {
            packed.extend_from_slice(&chunk_key.seal(plaintext)?);
        }
        Ok(packed)
    }

    /// Parse and decrypt a packed container.
    ///
    /// Parsing is strict and bit-exact; any framing, crypto, or parse
    /// failure surfaces as `InvalidChunk` with the cause nested in its
    /// message, except for an unknown protocol version, which stays
    /// `UnknownVersion`. No partial header is ever returned on error.
    pub fn unpack(&self, packed: &[u8]) -> DeduResult<(Vec<u8>, Header)> {
        match self.unpack_inner(packed) {
            Ok(rv) => Ok(rv),
            Err(e @ DeduError::UnknownVersion(_)) => Err(e),
            Err(e) => Err(DeduError::InvalidChunk(anyhow::Error::new(e))),
        }
    }

    fn unpack_inner(&self, packed: &[u8]) -> DeduResult<(Vec<u8>, Header)> {
        if packed.len() < MAGIC_BLOCK_SIZE {
            return Err(anyhow!("truncated before magic block").into());
        }
        let magic_bytes = self
            .obfuscator
            .unobfuscate_block(&packed[..MAGIC_BLOCK_SIZE], EMPTY_PASSWORD)
            .map_err(|_| anyhow!("bad magic block obfuscation"))?;
        let magic = MagicHeader::decode(magic_bytes.as_slice())
            .map_err(|e| anyhow!("unable to parse magic block: {e}"))?;
        if magic.protocol_version != PROTOCOL_VERSION {
            return Err(DeduError::UnknownVersion(magic.protocol_version.to_string()));
        }
        if magic.public_header_length <= 0 {
            return Err(anyhow!(
                "magic block had bad public header length: {}",
                magic.public_header_length
            )
            .into());
        }

        let public_end = MAGIC_BLOCK_SIZE + magic.public_header_length as usize;
        if packed.len() < public_end {
            return Err(anyhow!("truncated inside public header").into());
        }
        let public_bytes = self
            .obfuscator
            .unobfuscate(&packed[MAGIC_BLOCK_SIZE..public_end], EMPTY_PASSWORD)
            .map_err(|e| anyhow!("unable to unobfuscate public header: {e}"))?;
        let public = PublicHeader::decode(public_bytes.as_slice())
            .map_err(|e| anyhow!("unable to parse public header: {e}"))?;
        if public.private_header_length <= 0 {
            return Err(anyhow!(
                "public header had bad private header length: {}",
                public.private_header_length
            )
            .into());
        }

        let private_end = public_end + public.private_header_length as usize;
        if packed.len() < private_end {
            return Err(anyhow!("truncated inside private header").into());
        }
        let private_bytes = self
            .encrypter
            .open(&packed[public_end..private_end])
            .map_err(|e| anyhow!("failed to decrypt private header: {e}"))?;
        let private = PrivateHeader::decode(private_bytes.as_slice())
            .map_err(|e| anyhow!("error parsing private header: {e}"))?;

        let chunk_key = AeadKey::from_keyset_bytes(&private.chunk_specific_encryption_key)
            .map_err(|e| anyhow!("error loading chunk-specific encryption keys: {e}"))?;

        let rest = &packed[private_end..];
        let plaintext = if rest.is_empty() {
            Vec::new()
        } else {
            chunk_key
                .open(rest)
                .map_err(|e| anyhow!("error decrypting data: {e}"))?
        };

        if private.plaintext_length as usize != plaintext.len() {
            return Err(anyhow!(
                "private header claims {} plaintext bytes, decrypted {}",
                private.plaintext_length,
                plaintext.len()
            )
            .into());
        }

        if !plaintext.is_empty() {
            self.hasher
                .verify_hash(&plaintext[..], plaintext.len() as u64, &public.chunk_id)
                .map_err(|e| {
                    anyhow!(
                        "content chunk ID ({:?}) does not match decrypted data of {} bytes ({e})",
                        public.chunk_id,
                        plaintext.len()
                    )
                })?;
        }

        Ok((
            plaintext,
            Header {
                magic,
                public,
                private,
            },
        ))
    }
}
