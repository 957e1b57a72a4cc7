use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Non-secret configuration (loaded from dedu.toml, or embedded in the
/// secrets file under `[config]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduConfig {
    /// Chunk size in bytes (default: 1 MiB when unset or zero)
    pub chunk_size: u64,
    /// Remote folder/prefix under which chunk blobs are stored
    pub target_folder: String,
    /// Root of the qmfs entity store mount
    pub qmfs_root: Option<PathBuf>,
    /// If set, startup fails unless the hash of the empty blob equals this.
    /// Guards against loading the wrong hashing key.
    pub empty_blob_hash_sanity_check: Option<String>,
}

/// S3-compatible object store credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Credentials {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Credentials {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && !self.bucket.is_empty()
    }
}
