//! dedu-storage: the remote blob store contract
//!
//! The storage stack only ever needs four operations plus two boot probes;
//! everything else about the remote is opaque. `put` must be idempotent: a
//! second `put` of an existing name returns `AlreadyExists` without
//! overwriting, which upload paths absorb as deduplication success.

pub mod operator;

pub use operator::{build_operator, OpendalStore, StorageConfig};

use dedu_core::DeduResult;

/// Remote digests and size of a stored blob.
#[derive(Debug, Clone)]
pub struct BlobChecksum {
    pub sha1: String,
    pub md5: String,
    pub size: u64,
}

/// The opaque blob service the rest of the stack is written against.
///
/// Calls may block on network I/O. Retries are the implementation's
/// business, not the caller's; no caller holds a lock across these calls.
#[allow(async_fn_in_trait)]
pub trait BlobStore {
    /// Store `data` under `name`. `AlreadyExists` if the name is taken
    /// (the existing blob is left untouched).
    async fn put(&self, name: &str, data: Vec<u8>) -> DeduResult<()>;

    /// Fetch the blob named `name`; `NotFound` if absent.
    async fn get(&self, name: &str) -> DeduResult<Vec<u8>>;

    /// Digests and size of the stored blob; `NotFound` if absent.
    async fn checksum(&self, name: &str) -> DeduResult<BlobChecksum>;

    /// Boot probe: is the remote reachable at all?
    async fn ping(&self) -> DeduResult<()>;

    /// Boot probe: does the configured target folder exist?
    async fn check_folder_exists(&self) -> DeduResult<()>;
}
