use std::path::PathBuf;

use thiserror::Error;

pub type DeduResult<T> = Result<T, DeduError>;

/// Error kinds surfaced to callers across the storage stack.
///
/// Cryptographic and integrity failures are never silently retried.
/// `AlreadyExists` is non-fatal and absorbed by the upload path as
/// deduplication success.
#[derive(Debug, Error)]
pub enum DeduError {
    #[error("hash mismatch")]
    Mismatch,

    #[error("unknown version {0:?}")]
    UnknownVersion(String),

    #[error("cannot hash directory: {0}")]
    IsDir(PathBuf),

    #[error("file size changed while hashing: {0}")]
    SizeRaced(PathBuf),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("lookup for {path:?} failed; would require hashing ({candidates} result(s))")]
    WouldHash { path: PathBuf, candidates: usize },

    #[error("invalid chunk: {0}")]
    InvalidChunk(anyhow::Error),

    #[error("invalid obfuscated block")]
    InvalidBlock,

    #[error("decryption failed")]
    InvalidCipher,

    #[error("plaintext too long ({0} bytes; block capacity is 15)")]
    TooLong(usize),

    #[error("blob already exists")]
    AlreadyExists,

    #[error("conflicting value for {attr:?} of entity {entity}")]
    Conflict { entity: String, attr: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeduError {
    /// True for the benign "blob was already stored" signal, which upload
    /// paths treat as success.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DeduError::AlreadyExists)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DeduError::NotFound(_))
    }
}
