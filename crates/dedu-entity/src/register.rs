//! `register_or_get_entity`: the quasi-hash lookup → full-hash fallback
//! protocol that resolves a local file to its entity id, registering it on
//! the way when allowed.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use dedu_core::{DeduError, DeduResult};
use dedu_hash::{Hasher, Quasihasher};

use crate::store::EntityStore;

#[derive(Debug, Clone)]
pub struct RegisterOpts {
    /// Never write to the store.
    pub readonly: bool,
    /// Always compute the full hash, even on an unambiguous quasi-hash hit.
    pub always_verify: bool,
    /// Permit full hashing at all; when false, ambiguity is `WouldHash`.
    pub allow_hashing: bool,
}

impl Default for RegisterOpts {
    fn default() -> Self {
        Self {
            readonly: false,
            always_verify: false,
            allow_hashing: true,
        }
    }
}

/// Resolve symlinks one level, keeping both names: the entity should be
/// findable from the link and from its target alike.
fn resolve_paths(filename: &Path) -> DeduResult<(PathBuf, Vec<String>)> {
    let info = std::fs::symlink_metadata(filename)?;

    let target = if info.file_type().is_symlink() {
        let raw_target = std::fs::read_link(filename)?;
        let target = if raw_target.is_absolute() {
            raw_target
        } else {
            filename.parent().unwrap_or(Path::new(".")).join(raw_target)
        };
        info!(link = %filename.display(), target = %target.display(), "resolving symlink");
        target
    } else {
        filename.to_path_buf()
    };

    let abs_target = std::path::absolute(&target)?;
    let abs_original = std::path::absolute(filename)?;

    let mut recorded = vec![abs_original.display().to_string()];
    let target_str = abs_target.display().to_string();
    if !recorded.contains(&target_str) {
        recorded.push(target_str);
    }
    Ok((abs_target, recorded))
}

/// Return the entity id for `filename`, registering it if necessary.
///
/// The quasi-hash narrows the store down to candidate entities; a single
/// candidate already listing this path wins outright (unless
/// `always_verify`), everything else falls back to the full content hash.
/// Registration reconciles the store: the entity's recorded quasi-hash must
/// agree (`Conflict` otherwise), stale path tags on other candidates are
/// removed, and this file's paths are recorded on the canonical entity.
pub fn register_or_get_entity<S: EntityStore>(
    store: &S,
    hasher: &Hasher,
    quasihasher: &Quasihasher,
    filename: &Path,
    opts: &RegisterOpts,
) -> DeduResult<String> {
    let (path, recorded_paths) = resolve_paths(filename)?;

    let qh = quasihasher.quasihash_file(&path)?;

    let candidates = store.query(&format!("quasihash={qh}"))?;
    debug!(path = %path.display(), quasihash = %qh, candidates = candidates.len(), "queried store");

    let mut matching = Vec::new();
    for candidate in &candidates {
        let entity_paths = store.read_lines(candidate, "paths")?;
        if recorded_paths.iter().any(|p| entity_paths.contains(p)) {
            matching.push(candidate.clone());
        }
    }

    if !opts.always_verify && matching.len() == 1 {
        return Ok(matching.remove(0));
    }

    if !opts.allow_hashing {
        return Err(DeduError::WouldHash {
            path,
            candidates: candidates.len(),
        });
    }

    let dh = hasher.compute_file_hash(&path)?;

    if !opts.readonly {
        // We found the answer; now register it.
        store.create_or_expect(&dh, "quasihash", &[qh])?;

        for matching_entity in &matching {
            if matching_entity == &dh {
                continue;
            }
            // Stale tag: this path no longer carries that entity's content.
            store.remove_lines(matching_entity, "paths", &recorded_paths)?;
        }

        store.add_lines(&dh, "paths", &recorded_paths)?;
    }

    Ok(dh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::MemStore;

    fn hasher() -> Hasher {
        Hasher::new(b"register-test-key").unwrap()
    }

    fn quasihasher() -> Quasihasher {
        Quasihasher::new(b"register-test-key")
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn registers_a_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();
        let path = write_file(tmp.path(), "doc.txt", b"brand new content");

        let id = register_or_get_entity(&store, &h, &q, &path, &RegisterOpts::default()).unwrap();

        assert_eq!(id, h.compute_file_hash(&path).unwrap());
        let qh = q.quasihash_file(&path).unwrap();
        assert_eq!(store.read_lines(&id, "quasihash").unwrap(), vec![qh]);
        let abs = std::path::absolute(&path).unwrap().display().to_string();
        assert_eq!(store.read_lines(&id, "paths").unwrap(), vec![abs]);
    }

    #[test]
    fn second_lookup_hits_the_fast_path() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();
        let path = write_file(tmp.path(), "doc.txt", b"stable content");

        let id = register_or_get_entity(&store, &h, &q, &path, &RegisterOpts::default()).unwrap();

        // Forbid hashing: only the fast path can succeed now.
        let opts = RegisterOpts {
            allow_hashing: false,
            ..Default::default()
        };
        let again = register_or_get_entity(&store, &h, &q, &path, &opts).unwrap();
        assert_eq!(again, id);
    }

    #[test]
    fn same_content_under_two_names_is_one_entity() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();
        let a = write_file(tmp.path(), "a.bin", b"shared bytes");
        let b = write_file(tmp.path(), "b.bin", b"shared bytes");

        let id_a = register_or_get_entity(&store, &h, &q, &a, &RegisterOpts::default()).unwrap();
        let id_b = register_or_get_entity(&store, &h, &q, &b, &RegisterOpts::default()).unwrap();

        assert_eq!(id_a, id_b);
        let paths = store.read_lines(&id_a, "paths").unwrap();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn would_hash_when_hashing_forbidden() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();
        let path = write_file(tmp.path(), "unknown.bin", b"never seen before");

        let opts = RegisterOpts {
            allow_hashing: false,
            ..Default::default()
        };
        assert!(matches!(
            register_or_get_entity(&store, &h, &q, &path, &opts).unwrap_err(),
            DeduError::WouldHash { .. }
        ));
    }

    #[test]
    fn readonly_does_not_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();
        let path = write_file(tmp.path(), "doc.txt", b"look but don't touch");

        let opts = RegisterOpts {
            readonly: true,
            ..Default::default()
        };
        let id = register_or_get_entity(&store, &h, &q, &path, &opts).unwrap();
        assert!(store.read_lines(&id, "quasihash").unwrap().is_empty());
        assert!(store.read_lines(&id, "paths").unwrap().is_empty());
    }

    #[test]
    fn stale_path_tags_are_reconciled() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();

        // Register, then rewrite the file with different content of the
        // same size and sampled windows... small files sample everything,
        // so just change the content and re-register: the old entity's
        // stale path tag must be dropped.
        let path = write_file(tmp.path(), "mutable.bin", b"version one");
        let old_id =
            register_or_get_entity(&store, &h, &q, &path, &RegisterOpts::default()).unwrap();

        std::fs::write(&path, b"version two").unwrap();
        // Manually keep the stale tag discoverable: same-size content has a
        // different quasi-hash here, so seed the index the way a racing
        // writer would have.
        let new_qh = q.quasihash_file(&path).unwrap();
        let abs = std::path::absolute(&path).unwrap().display().to_string();
        store.seed_entity(&old_id, &new_qh, &[abs.clone()]);

        let new_id = register_or_get_entity(
            &store,
            &h,
            &q,
            &path,
            &RegisterOpts {
                always_verify: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_ne!(new_id, old_id);
        assert!(!store.read_lines(&old_id, "paths").unwrap().contains(&abs));
        assert!(store.read_lines(&new_id, "paths").unwrap().contains(&abs));
    }

    #[test]
    fn conflicting_quasihash_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();
        let path = write_file(tmp.path(), "doc.txt", b"conflicted");

        let dh = h.compute_file_hash(&path).unwrap();
        store.seed_entity(&dh, "q1-0000000000-000-0000000000", &[]);

        assert!(matches!(
            register_or_get_entity(&store, &h, &q, &path, &RegisterOpts::default()).unwrap_err(),
            DeduError::Conflict { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_record_both_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();
        let target = write_file(tmp.path(), "target.bin", b"linked content");
        let link = tmp.path().join("alias.bin");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let id = register_or_get_entity(&store, &h, &q, &link, &RegisterOpts::default()).unwrap();

        let paths = store.read_lines(&id, "paths").unwrap();
        let abs_link = std::path::absolute(&link).unwrap().display().to_string();
        let abs_target = std::path::absolute(&target).unwrap().display().to_string();
        assert!(paths.contains(&abs_link), "link path missing from {paths:?}");
        assert!(paths.contains(&abs_target), "target path missing from {paths:?}");
    }

    #[test]
    fn quasihash_collision_resolved_by_full_hash() {
        // Two large files with identical sampled windows but different
        // unsampled middles: same quasi-hash, different entities.
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let h = hasher();
        let q = quasihasher();

        let total = 9 * 81920usize;
        let mut data_a = vec![0u8; total];
        for (i, b) in data_a.iter_mut().enumerate() {
            *b = (i % 241) as u8;
        }
        let mut data_b = data_a.clone();
        data_b[81920 + 512] ^= 0xFF; // inside the first unsampled gap

        let a = write_file(tmp.path(), "a.bin", &data_a);
        let b = write_file(tmp.path(), "b.bin", &data_b);
        assert_eq!(
            q.quasihash_file(&a).unwrap(),
            q.quasihash_file(&b).unwrap(),
            "test files must collide on the quasi-hash"
        );

        let id_a = register_or_get_entity(&store, &h, &q, &a, &RegisterOpts::default()).unwrap();

        // b shares the quasi-hash but not the path: ambiguous, so hashing
        // is required.
        let no_hashing = RegisterOpts {
            allow_hashing: false,
            ..Default::default()
        };
        assert!(matches!(
            register_or_get_entity(&store, &h, &q, &b, &no_hashing).unwrap_err(),
            DeduError::WouldHash { .. }
        ));

        let id_b = register_or_get_entity(&store, &h, &q, &b, &RegisterOpts::default()).unwrap();
        assert_ne!(id_a, id_b, "full hash must disambiguate the collision");
    }
}
