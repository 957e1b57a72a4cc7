//! The seek-sample quasi-hash (`q1-…` strings)
//!
//! Hashes a file in constant time by reading only parts of it: the MAC is
//! fed the file size, then either the whole file (small files) or nine
//! fixed-size windows sampled across it. Same size plus same sampled
//! windows means same quasi-hash, so collisions are possible by design;
//! callers resolve ambiguity with the full content hash.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::anyhow;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroize;

use dedu_core::{DeduError, DeduResult};

type HmacSha256 = Hmac<Sha256>;

const FIXED_SALT: &[u8] = b"dedu.quasihash.1";
const LENGTH_HASH_LENGTH: usize = 3;
const CONTENT_HASH_LENGTH: usize = 20;
const CHUNK_SIZE: u64 = 20 * 4096;
const NUM_CHUNKS: u64 = 8;

fn format_hash_v1(file_size_digest: &[u8], content_digest: &[u8]) -> String {
    // The length hash collides heavily, so it goes in the middle; both the
    // prefix and the suffix of the string stay high-entropy.
    let length_hex = &hex::encode(file_size_digest)[..LENGTH_HASH_LENGTH];
    let content_hex = &hex::encode(content_digest)[..CONTENT_HASH_LENGTH];

    let n = content_hex.len() / 2;
    format!("q1-{}-{}-{}", &content_hex[..n], length_hex, &content_hex[n..])
}

fn chunk_offsets(total_size: u64, chunk_size: u64, num_chunks: u64) -> DeduResult<Vec<u64>> {
    if chunk_size * num_chunks >= total_size {
        return Err(anyhow!("file too small for chunking").into());
    }
    if num_chunks < 2 {
        return Err(anyhow!("no strategy for only {num_chunks} chunks").into());
    }

    let last_chunk_offset = total_size - chunk_size;
    let skip = last_chunk_offset / (num_chunks - 1);

    let mut rv = vec![0];
    for i in 1..num_chunks {
        rv.push(skip * i);
    }
    rv.push(last_chunk_offset);
    Ok(rv)
}

/// Computes quasi-hashes keyed by the same secret as the content hasher.
pub struct Quasihasher {
    key: Vec<u8>,
}

impl Drop for Quasihasher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for Quasihasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quasihasher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Quasihasher {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    /// Quasi-hash a file. Fails with `IsDir` for directories and with
    /// `SizeRaced` if a small file's size changes between stat and read.
    pub fn quasihash_file(&self, path: &Path) -> DeduResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| anyhow!("HMAC init failed: {e}"))?;

        let info = std::fs::metadata(path)?;
        if info.is_dir() {
            return Err(DeduError::IsDir(path.to_path_buf()));
        }

        let total_size = info.len();
        mac.update(FIXED_SALT);
        mac.update(total_size.to_string().as_bytes());

        // The state after feeding only the size becomes the middle field.
        let file_size_only_digest = mac.clone().finalize().into_bytes();

        if total_size <= CHUNK_SIZE * NUM_CHUNKS {
            // Too small for the sampling strategy; read all of it.
            let data = std::fs::read(path)?;
            if data.len() as u64 != total_size {
                return Err(DeduError::SizeRaced(path.to_path_buf()));
            }
            debug!(bytes = data.len(), "quasi-hashing entire file");
            mac.update(&data);
        } else {
            let offsets = chunk_offsets(total_size, CHUNK_SIZE, NUM_CHUNKS)?;
            debug!(?offsets, total_size, "quasi-hash sample offsets");

            let mut f = File::open(path)?;
            let mut buf = vec![0u8; CHUNK_SIZE as usize];
            for offset in offsets {
                f.seek(SeekFrom::Start(offset))?;
                f.read_exact(&mut buf)?;
                mac.update(&buf);
            }
        }

        Ok(format_hash_v1(
            &file_size_only_digest,
            &mac.finalize().into_bytes(),
        ))
    }

    /// Recompute the quasi-hash of `path` and compare with `expected`.
    pub fn quasihash_verify_file(&self, path: &Path, expected: &str) -> DeduResult<bool> {
        let h = self.quasihash_file(path)?;
        Ok(h == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn qh() -> Quasihasher {
        Quasihasher::new(b"test-hashing-key")
    }

    #[test]
    fn offsets_cover_both_ends() {
        let total = 9 * CHUNK_SIZE + 12345;
        let offsets = chunk_offsets(total, CHUNK_SIZE, NUM_CHUNKS).unwrap();
        assert_eq!(offsets.len(), NUM_CHUNKS as usize + 1);
        assert_eq!(offsets[0], 0);
        assert_eq!(*offsets.last().unwrap(), total - CHUNK_SIZE);
        // All windows must lie within the file.
        for &o in &offsets {
            assert!(o + CHUNK_SIZE <= total, "window at {o} runs past EOF");
        }
    }

    #[test]
    fn offsets_reject_small_files() {
        assert!(chunk_offsets(CHUNK_SIZE * NUM_CHUNKS, CHUNK_SIZE, NUM_CHUNKS).is_err());
    }

    #[test]
    fn shape_and_determinism() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "f", b"some small file");
        let a = qh().quasihash_file(&path).unwrap();
        let b = qh().quasihash_file(&path).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("q1-"), "unexpected shape: {a}");
        let parts: Vec<&str> = a.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 10);
        assert_eq!(parts[2].len(), 3);
        assert_eq!(parts[3].len(), 10);
    }

    #[test]
    fn directory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = qh().quasihash_file(tmp.path()).unwrap_err();
        assert!(matches!(err, DeduError::IsDir(_)));
    }

    #[test]
    fn size_is_part_of_the_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write_file(tmp.path(), "a", b"xxxx");
        let b = write_file(tmp.path(), "b", b"xxxxx");
        let ha = qh().quasihash_file(&a).unwrap();
        let hb = qh().quasihash_file(&b).unwrap();
        assert_ne!(ha, hb);
        // Different length field too, not just different content field.
        assert_ne!(ha.split('-').nth(2), hb.split('-').nth(2));
    }

    #[test]
    fn large_files_ignore_unsampled_middles() {
        // Two files big enough for the sampling strategy, identical in
        // every sampled window, differing only in an unsampled gap.
        let total = (9 * CHUNK_SIZE) as usize; // 737280 > 655360
        let mut data_a = vec![0u8; total];
        for (i, b) in data_a.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let mut data_b = data_a.clone();

        // First gap lies between the end of window 0 (81920) and the start
        // of window 1 at skip = (total - 81920) / 7.
        let skip = (total as u64 - CHUNK_SIZE) / (NUM_CHUNKS - 1);
        let gap = CHUNK_SIZE as usize + 100;
        assert!((gap as u64) < skip, "test data does not leave a gap");
        data_b[gap] ^= 0xFF;

        let tmp = tempfile::tempdir().unwrap();
        let pa = write_file(tmp.path(), "a", &data_a);
        let pb = write_file(tmp.path(), "b", &data_b);

        let ha = qh().quasihash_file(&pa).unwrap();
        let hb = qh().quasihash_file(&pb).unwrap();
        assert_eq!(ha, hb, "unsampled middle bytes must not affect the hash");

        // A sampled byte, in contrast, must change it.
        let mut data_c = data_a.clone();
        data_c[0] ^= 0xFF;
        let pc = write_file(tmp.path(), "c", &data_c);
        let hc = qh().quasihash_file(&pc).unwrap();
        assert_ne!(ha, hc);
    }

    #[test]
    fn verify_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "f", b"verify me");
        let h = qh().quasihash_file(&path).unwrap();
        assert!(qh().quasihash_verify_file(&path, &h).unwrap());
        assert!(!qh().quasihash_verify_file(&path, "q1-0000000000-000-0000000000").unwrap());
    }

    #[test]
    fn append_only_write_keeps_prefix_windows() {
        // Regression-style check: the last window tracks EOF, so appending
        // to a large file must change the hash.
        let total = (9 * CHUNK_SIZE) as usize;
        let data = vec![7u8; total];
        let tmp = tempfile::tempdir().unwrap();
        let pa = write_file(tmp.path(), "a", &data);
        let ha = qh().quasihash_file(&pa).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&pa).unwrap();
        f.write_all(b"tail").unwrap();
        drop(f);

        let hb = qh().quasihash_file(&pa).unwrap();
        assert_ne!(ha, hb);
    }
}
