//! dedu-secrets: key material on disk and the assembled component bundle
//!
//! The secrets file is TOML holding the HMAC hashing key, the global AEAD
//! keyset, and storage credentials, all base64; it may embed the non-secret
//! config or leave it to a separate file. Secrets are written `0o600` and
//! never overwrite an existing file.

pub mod discover;

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use dedu_chunks::Chunker;
use dedu_core::config::{DeduConfig, S3Credentials};
use dedu_core::DeduResult;
use dedu_crypto::{AeadKey, Obfuscator, Packer};
use dedu_hash::{Hasher, Quasihasher};

const HASHING_KEY_BYTES: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretsFile {
    /// base64; raw HMAC key bytes
    hashing_key: String,
    encryption_keys: EncryptionKeys,
    #[serde(default)]
    storage_creds: StorageCreds,
    /// Optional embedded non-secret config
    config: Option<DeduConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptionKeys {
    /// base64; serialized cleartext keyset
    unencrypted_keyset: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StorageCreds {
    s3: Option<S3Credentials>,
}

/// Generate fresh key material and write it to `path` (`O_EXCL`, `0o600`).
pub fn generate(path: &Path) -> DeduResult<()> {
    let mut hashing_key = vec![0u8; HASHING_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut hashing_key);

    let secrets = SecretsFile {
        hashing_key: BASE64.encode(&hashing_key),
        encryption_keys: EncryptionKeys {
            unencrypted_keyset: BASE64.encode(AeadKey::generate().to_keyset_bytes()),
        },
        storage_creds: StorageCreds::default(),
        config: None,
    };
    let data = toml::to_string_pretty(&secrets).map_err(|e| anyhow!("serializing secrets: {e}"))?;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut f = options
        .open(path)
        .map_err(|e| anyhow!("error opening {}: {e}", path.display()))?;
    use std::io::Write;
    f.write_all(data.as_bytes())
        .map_err(|e| anyhow!("error writing {}: {e}", path.display()))?;

    info!(path = %path.display(), bytes = data.len(), "wrote secrets");
    Ok(())
}

/// Every component of the storage stack, assembled from one secrets file.
pub struct Dedu {
    pub hasher: Arc<Hasher>,
    pub quasihasher: Quasihasher,
    pub obfuscator: Arc<Obfuscator>,
    pub packer: Packer,
    pub chunker: Chunker,
    pub config: DeduConfig,
    pub storage_creds: Option<S3Credentials>,
}

impl Dedu {
    /// Load and assemble from a secrets file, plus an optional separate
    /// non-secret config file. Exactly one source of config must be
    /// present: embedded or separate, not both, not neither.
    pub fn load(secrets_path: &Path, config_path: Option<&Path>) -> DeduResult<Self> {
        let data = std::fs::read_to_string(secrets_path)
            .map_err(|e| anyhow!("error reading {}: {e}", secrets_path.display()))?;
        let secrets: SecretsFile = toml::from_str(&data)
            .map_err(|e| anyhow!("error parsing {}: {e}", secrets_path.display()))?;

        let config = match (secrets.config, config_path) {
            (Some(_), Some(config_path)) => {
                return Err(anyhow!(
                    "secrets config ({}) contains regular config, but config filename provided ({})",
                    secrets_path.display(),
                    config_path.display()
                )
                .into());
            }
            (None, None) => return Err(anyhow!("no config provided").into()),
            (Some(embedded), None) => embedded,
            (None, Some(config_path)) => {
                let config_data = std::fs::read_to_string(config_path)
                    .map_err(|e| anyhow!("error reading {}: {e}", config_path.display()))?;
                toml::from_str(&config_data)
                    .map_err(|e| anyhow!("error parsing {}: {e}", config_path.display()))?
            }
        };

        let hashing_key = BASE64
            .decode(&secrets.hashing_key)
            .map_err(|e| anyhow!("bad hashing_key: {e}"))?;
        if hashing_key.is_empty() {
            return Err(anyhow!("no hashing_key set").into());
        }

        let keyset_bytes = BASE64
            .decode(&secrets.encryption_keys.unencrypted_keyset)
            .map_err(|e| anyhow!("bad encryption keyset: {e}"))?;
        let encrypter = AeadKey::from_keyset_bytes(&keyset_bytes)?;

        let hasher = Arc::new(Hasher::new(&hashing_key)?);
        let quasihasher = Quasihasher::new(&hashing_key);
        let obfuscator = Arc::new(Obfuscator::new());
        let packer = Packer::new(hasher.clone(), obfuscator.clone(), encrypter);
        let chunker = Chunker::new(hasher.clone(), config.chunk_size);

        if let Some(expected) = config
            .empty_blob_hash_sanity_check
            .as_ref()
            .filter(|h| !h.is_empty())
        {
            let empty_hash = hasher.compute_hash(&b""[..])?;
            if expected != &empty_hash {
                return Err(anyhow!(
                    "config mismatch: expected {expected:?} to be hash of empty blob, but got {empty_hash:?}"
                )
                .into());
            }
        }

        Ok(Self {
            hasher,
            quasihasher,
            obfuscator,
            packer,
            chunker,
            config,
            storage_creds: secrets.storage_creds.s3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("dedu.toml");
        std::fs::write(&path, "chunk_size = 65536\ntarget_folder = \"dedu\"\n").unwrap();
        path
    }

    #[test]
    fn generate_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let secrets = tmp.path().join("dedu.secret.toml");
        generate(&secrets).unwrap();
        let config = write_config(tmp.path());

        let dedu = Dedu::load(&secrets, Some(&config)).unwrap();
        assert_eq!(dedu.config.chunk_size, 65536);
        assert_eq!(dedu.chunker.chunk_size(), 65536);
        assert!(dedu.storage_creds.is_none());

        // The packer round-trips under the loaded keys.
        let packed = dedu.packer.pack(b"sanity", None).unwrap();
        let (plaintext, _) = dedu.packer.unpack(&packed).unwrap();
        assert_eq!(plaintext, b"sanity");
    }

    #[test]
    fn generate_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let secrets = tmp.path().join("dedu.secret.toml");
        generate(&secrets).unwrap();
        assert!(generate(&secrets).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn secrets_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let secrets = tmp.path().join("dedu.secret.toml");
        generate(&secrets).unwrap();
        let mode = std::fs::metadata(&secrets).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn config_must_come_from_exactly_one_place() {
        let tmp = tempfile::tempdir().unwrap();
        let secrets = tmp.path().join("dedu.secret.toml");
        generate(&secrets).unwrap();

        // Neither embedded nor separate: error.
        assert!(Dedu::load(&secrets, None).is_err());

        // Both: also an error.
        let mut content = std::fs::read_to_string(&secrets).unwrap();
        content.push_str("\n[config]\nchunk_size = 1024\n");
        let both = tmp.path().join("embedded.secret.toml");
        std::fs::write(&both, &content).unwrap();
        let config = write_config(tmp.path());
        assert!(Dedu::load(&both, Some(&config)).is_err());

        // Embedded only: fine.
        let dedu = Dedu::load(&both, None).unwrap();
        assert_eq!(dedu.config.chunk_size, 1024);
    }

    #[test]
    fn empty_blob_sanity_check_catches_wrong_key() {
        let tmp = tempfile::tempdir().unwrap();
        let secrets = tmp.path().join("dedu.secret.toml");
        generate(&secrets).unwrap();

        let config = tmp.path().join("dedu.toml");
        std::fs::write(
            &config,
            "empty_blob_hash_sanity_check = \"1-aaaaaaaaaaaaaaaaaaaa-bbb-cccccccccccccccccccc\"\n",
        )
        .unwrap();
        assert!(Dedu::load(&secrets, Some(&config)).is_err());

        // With the real hash of the empty blob, loading succeeds.
        let plain = write_config(tmp.path());
        let dedu = Dedu::load(&secrets, Some(&plain)).unwrap();
        let empty_hash = dedu.hasher.compute_hash(&b""[..]).unwrap();
        std::fs::write(
            &config,
            format!("empty_blob_hash_sanity_check = \"{empty_hash}\"\n"),
        )
        .unwrap();
        assert!(Dedu::load(&secrets, Some(&config)).is_ok());
    }
}
