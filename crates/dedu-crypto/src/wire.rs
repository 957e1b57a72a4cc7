//! On-wire messages of the chunk container
//!
//! Protobuf-encoded via prost; field tags are part of the wire format and
//! must never be renumbered.

/// The 16-byte leading block, obfuscated with the block cipher.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MagicHeader {
    /// Always the literal "DEDU".
    #[prost(string, tag = "1")]
    pub dedu: String,
    /// Always 1; everything else is rejected.
    #[prost(int32, tag = "2")]
    pub protocol_version: i32,
    #[prost(int32, tag = "3")]
    pub public_header_length: i32,
}

/// Readable (after unobfuscation) without any secret key material.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PublicHeader {
    #[prost(string, tag = "1")]
    pub chunk_id: String,
    #[prost(int32, tag = "2")]
    pub private_header_length: i32,
}

/// Legacy digests of the plaintext, matching what remote stores report.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Hashes {
    #[prost(bytes = "vec", tag = "1")]
    pub md5: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub sha1: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChunkReference {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(int64, tag = "2")]
    pub length: i64,
}

/// Manifest of a logical blob stored as the concatenation of other chunks.
/// Sub-chunks must themselves be non-virtual.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VirtualChunk {
    /// Content hash of the concatenated plaintext.
    #[prost(string, tag = "1")]
    pub chunk_id: String,
    #[prost(int64, tag = "2")]
    pub total_length: i64,
    #[prost(message, repeated, tag = "3")]
    pub chunks: Vec<ChunkReference>,
}

/// Optional provenance carried inside the private header.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChunkMetadata {
    #[prost(string, tag = "1")]
    pub source_name: String,
    #[prost(int64, tag = "2")]
    pub offset: i64,
    #[prost(int64, tag = "3")]
    pub length: i64,
}

/// Only readable with the operator's AEAD key.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PrivateHeader {
    /// Serialized `ChunkKeyset` for this chunk's payload.
    #[prost(bytes = "vec", tag = "1")]
    pub chunk_specific_encryption_key: Vec<u8>,
    #[prost(int32, tag = "2")]
    pub plaintext_length: i32,
    #[prost(message, optional, tag = "3")]
    pub plaintext_hashes: Option<Hashes>,
    #[prost(message, optional, tag = "4")]
    pub virtual_chunk: Option<VirtualChunk>,
    #[prost(message, optional, tag = "5")]
    pub optional_metadata: Option<ChunkMetadata>,
}

/// Serialized form of a per-chunk (or the global) AEAD key.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChunkKeyset {
    #[prost(bytes = "vec", tag = "1")]
    pub aes256_gcm_key: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn magic_header_fits_the_block() {
        // The obfuscated magic block holds at most 15 bytes of message, so
        // the encoded MagicHeader must stay under that for any plausible
        // public header length.
        for public_header_length in [1, 127, 16384] {
            let magic = MagicHeader {
                dedu: "DEDU".into(),
                protocol_version: 1,
                public_header_length,
            };
            let encoded = magic.encode_to_vec();
            assert!(
                encoded.len() <= 15,
                "magic encodes to {} bytes for pubLen {public_header_length}",
                encoded.len()
            );
        }
    }

    #[test]
    fn private_header_roundtrip() {
        let header = PrivateHeader {
            chunk_specific_encryption_key: vec![9u8; 34],
            plaintext_length: 1234,
            plaintext_hashes: Some(Hashes {
                md5: vec![1; 16],
                sha1: vec![2; 20],
            }),
            virtual_chunk: Some(VirtualChunk {
                chunk_id: "1-x".into(),
                total_length: 99,
                chunks: vec![ChunkReference {
                    hash: "1-y".into(),
                    length: 99,
                }],
            }),
            optional_metadata: None,
        };
        let decoded = PrivateHeader::decode(header.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn absent_optionals_decode_as_none() {
        let header = PrivateHeader {
            chunk_specific_encryption_key: vec![1, 2, 3],
            plaintext_length: 0,
            plaintext_hashes: None,
            virtual_chunk: None,
            optional_metadata: None,
        };
        let decoded = PrivateHeader::decode(header.encode_to_vec().as_slice()).unwrap();
        assert!(decoded.plaintext_hashes.is_none());
        assert!(decoded.virtual_chunk.is_none());
    }
}
