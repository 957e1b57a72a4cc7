//! dedu-crypto: the encrypted chunk container and its supporting ciphers
//!
//! Container layout (see `pack`):
//! ```text
//! [16 B obfuscated magic  {literal "DEDU", version=1, pubLen}]
//! [pubLen B GCM-obfuscated public header {chunkId, privLen}]
//! [privLen B AEAD-encrypted private header {perChunkKey, plainLen, hashes?, vchunk?, meta?}]
//! [remainder AEAD-encrypted plaintext under perChunkKey (absent when empty)]
//! ```
//!
//! Obfuscation is symmetric encryption under a fixed empty password: it
//! hides structure from casual inspection, nothing more. Confidentiality
//! comes from the private-header AEAD key (from the operator's secrets) and
//! the fresh per-chunk key sealed inside each private header.

pub mod keyset;
pub mod obfuscate;
pub mod pack;
pub mod wire;

pub use keyset::AeadKey;
pub use obfuscate::Obfuscator;
pub use pack::{ExtraData, Header, Packer};
