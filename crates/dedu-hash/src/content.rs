//! The keyed whole-content hash (`deduhash`)
//!
//! String form: `1-<20hex>-<3hex>-<20hex>`. The outer fields are the first
//! 40 hex chars of HMAC-SHA256 over `"dedu.hash.2" || data`, split in half;
//! the middle field is a 3-hex fingerprint of the content *length*. Putting
//! high-entropy material at both ends keeps hashes visually distinguishable
//! by prefix or suffix alike.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::anyhow;
use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use zeroize::Zeroize;

use dedu_core::{DeduError, DeduResult};

type HmacSha256 = Hmac<Sha256>;

const FIXED_SALT: &[u8] = b"dedu.hash.2";
const BUFFER_SIZE: usize = 10 * 1024;
const PREFIX_LENGTH: usize = 20;
const SUFFIX_LENGTH: usize = 20;
const LENGTH_HASH_LENGTH: usize = 3;

static DEDUHASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^1-[0-9a-f]{20}-[0-9a-f]{3}-[0-9a-f]{20}$").expect("deduhash regex")
});

/// True iff `s` has the shape of a version-1 deduhash string.
pub fn looks_like_deduhash(s: &str) -> bool {
    DEDUHASH_RE.is_match(s)
}

struct ParsedHash {
    version: String,
    length_hash: String,
}

fn parse_hash(h: &str) -> DeduResult<ParsedHash> {
    let components: Vec<&str> = h.split('-').collect();
    match components.first() {
        Some(&"1") => {
            if components.len() != 4 {
                return Err(anyhow!("wrong number of dashed components in hash {h:?}").into());
            }
            Ok(ParsedHash {
                version: components[0].to_string(),
                length_hash: components[2].to_string(),
            })
        }
        Some(other) => Err(DeduError::UnknownVersion(other.to_string())),
        None => Err(anyhow!("no components in hash {h:?}").into()),
    }
}

fn format_hash_v1(mainhash: &str, lhash: &str) -> DeduResult<String> {
    if mainhash.len() < PREFIX_LENGTH + SUFFIX_LENGTH {
        return Err(anyhow!(
            "main hash {mainhash:?} too short (wanted {})",
            PREFIX_LENGTH + SUFFIX_LENGTH
        )
        .into());
    }
    let prefix = &mainhash[..PREFIX_LENGTH];
    let suffix = &mainhash[PREFIX_LENGTH..PREFIX_LENGTH + SUFFIX_LENGTH];
    Ok(format!("1-{prefix}-{lhash}-{suffix}"))
}

/// Keyed content hasher. Construction runs a self-test on the empty input
/// and fails if the round-trip disagrees.
pub struct Hasher {
    key: Vec<u8>,
}

impl Drop for Hasher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher").field("key", &"[REDACTED]").finish()
    }
}

impl Hasher {
    pub fn new(key: &[u8]) -> DeduResult<Self> {
        if key.is_empty() {
            return Err(anyhow!("hashing key must not be empty").into());
        }
        let rv = Self { key: key.to_vec() };
        rv.sanity_check()?;
        Ok(rv)
    }

    fn mac(&self) -> DeduResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| anyhow!("HMAC init failed: {e}"))?;
        mac.update(FIXED_SALT);
        Ok(mac)
    }

    /// Streams the reader through the MAC, returning the full 64-hex digest
    /// and the number of bytes read.
    fn compute_hash_v1<R: Read>(&self, mut r: R) -> DeduResult<(String, u64)> {
        let mut mac = self.mac()?;
        let mut buf = [0u8; BUFFER_SIZE];
        let mut sz: u64 = 0;
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            sz += n as u64;
            mac.update(&buf[..n]);
        }
        Ok((hex::encode(mac.finalize().into_bytes()), sz))
    }

    fn compute_length_hash_v1(&self, n: u64) -> DeduResult<String> {
        let data = n.to_string();
        let (digest, nn) = self.compute_hash_v1(data.as_bytes())?;
        if nn != data.len() as u64 {
            return Err(anyhow!("sanity check failed: {nn} != {}", data.len()).into());
        }
        Ok(digest[..LENGTH_HASH_LENGTH].to_string())
    }

    /// Compute the formatted deduhash of everything `r` yields.
    pub fn compute_hash<R: Read>(&self, r: R) -> DeduResult<String> {
        let (digest, length) = self.compute_hash_v1(r)?;
        let ldigest = self.compute_length_hash_v1(length)?;
        format_hash_v1(&digest, &ldigest)
    }

    /// Convenience wrapper hashing a file from disk.
    pub fn compute_file_hash(&self, path: &Path) -> DeduResult<String> {
        let f = File::open(path)
            .map_err(|e| anyhow!("failed to open {} for hashing: {e}", path.display()))?;
        self.compute_hash(f)
    }

    /// Verify that `r` (of known `size`) hashes to `hash`.
    ///
    /// The length fingerprint is recomputed from `size` first, rejecting
    /// with `Mismatch` before the reader is touched when it disagrees.
    /// Returns `Ok(())` on agreement, `Err(Mismatch)` otherwise.
    pub fn verify_hash<R: Read>(&self, r: R, size: u64, hash: &str) -> DeduResult<()> {
        let parsed = parse_hash(hash)?;
        if parsed.version != "1" {
            return Err(DeduError::UnknownVersion(parsed.version));
        }

        let lh = self.compute_length_hash_v1(size)?;
        if lh != parsed.length_hash {
            tracing::debug!(expected = %parsed.length_hash, computed = %lh, "length fingerprint mismatch");
            return Err(DeduError::Mismatch);
        }

        let computed = self.compute_hash(r)?;
        if computed != hash {
            return Err(DeduError::Mismatch);
        }
        Ok(())
    }

    fn sanity_check(&self) -> DeduResult<()> {
        let hash = self.compute_hash(&b""[..])?;
        self.verify_hash(&b""[..], 0, &hash)
            .map_err(|e| anyhow!("hasher self-test failed: {e}").into())
    }
}
