//! OpenDAL-backed reference implementation of the blob store contract

use anyhow::{Context, Result};
use md5::Md5;
use opendal::Operator;
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use dedu_core::{DeduError, DeduResult};

use crate::{BlobChecksum, BlobStore};

/// Minimal config needed to build an operator.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for any S3-compatible endpoint.
///
/// Path-style addressing (the default) is what SeaweedFS and MinIO expect;
/// do not enable virtual-host style for those.
pub fn build_operator(cfg: &StorageConfig) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// A blob store over any OpenDAL operator, rooted at a target folder.
#[derive(Clone)]
pub struct OpendalStore {
    op: Operator,
    folder: String,
}

impl OpendalStore {
    pub fn new(op: Operator, folder: &str) -> Self {
        Self {
            op,
            folder: folder.trim_matches('/').to_string(),
        }
    }

    fn path(&self, name: &str) -> String {
        if self.folder.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.folder)
        }
    }

    fn map_err(name: &str, e: opendal::Error) -> DeduError {
        if e.kind() == opendal::ErrorKind::NotFound {
            DeduError::NotFound(name.to_string())
        } else {
            DeduError::Storage(e.to_string())
        }
    }
}

impl BlobStore for OpendalStore {
    async fn put(&self, name: &str, data: Vec<u8>) -> DeduResult<()> {
        let path = self.path(name);

        // Probe first: an existing blob is never overwritten.
        let exists = self
            .op
            .exists(&path)
            .await
            .map_err(|e| Self::map_err(name, e))?;
        if exists {
            return Err(DeduError::AlreadyExists);
        }

        let size = data.len();
        self.op
            .write(&path, data)
            .await
            .map_err(|e| Self::map_err(name, e))?;
        info!(name = %name, size, "uploaded blob");
        Ok(())
    }

    async fn get(&self, name: &str) -> DeduResult<Vec<u8>> {
        let path = self.path(name);
        let buf = self
            .op
            .read(&path)
            .await
            .map_err(|e| Self::map_err(name, e))?;
        let data = buf.to_vec();
        debug!(name = %name, size = data.len(), "fetched blob");
        Ok(data)
    }

    async fn checksum(&self, name: &str) -> DeduResult<BlobChecksum> {
        let data = self.get(name).await?;
        Ok(BlobChecksum {
            sha1: hex::encode(Sha1::digest(&data)),
            md5: hex::encode(Md5::digest(&data)),
            size: data.len() as u64,
        })
    }

    async fn ping(&self) -> DeduResult<()> {
        self.op
            .check()
            .await
            .map_err(|e| DeduError::Storage(e.to_string()))
    }

    async fn check_folder_exists(&self) -> DeduResult<()> {
        let prefix = if self.folder.is_empty() {
            String::new()
        } else {
            format!("{}/", self.folder)
        };
        self.op
            .list(&prefix)
            .await
            .map(|_| ())
            .map_err(|e| DeduError::Storage(e.to_string()))
    }
}
