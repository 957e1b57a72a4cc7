//! Reverse lookup: from an entity id to a live path carrying its content

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tracing::{debug, warn};

use dedu_core::{DeduError, DeduResult};
use dedu_hash::{Hasher, Quasihasher};

use crate::store::EntityStore;

#[derive(Debug, Clone)]
pub struct LocateOpts {
    /// Confirm candidates with the full content hash, not just the
    /// quasi-hash.
    pub verify: bool,
    /// Follow symlinked entries to targets not themselves listed.
    pub discover_symlinks: bool,
}

impl Default for LocateOpts {
    fn default() -> Self {
        Self {
            verify: false,
            discover_symlinks: true,
        }
    }
}

/// Does `path` currently carry content matching the given fingerprints?
///
/// Missing files and hash mismatches are a quiet "no"; anything else
/// propagates.
fn try_path(
    hasher: &Hasher,
    quasihasher: &Quasihasher,
    path: &Path,
    quasihash: Option<&str>,
    full_hash: Option<&str>,
) -> DeduResult<bool> {
    let info = match std::fs::metadata(path) {
        Ok(info) => info,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if let Some(quasihash) = quasihash {
        if !quasihasher.quasihash_verify_file(path, quasihash)? {
            return Ok(false);
        }
    }

    if let Some(full_hash) = full_hash {
        let f = std::fs::File::open(path)?;
        match hasher.verify_hash(f, info.len(), full_hash) {
            Ok(()) => {}
            Err(DeduError::Mismatch) => return Ok(false),
            Err(e) => return Err(e),
        }
    }

    Ok(true)
}

/// Find a path that still carries the entity's content.
///
/// Tries the recorded paths in order, accepting the first whose quasi-hash
/// (and, with `verify`, full hash) checks out. Symlinked entries are
/// skipped unless `discover_symlinks` is set, in which case their targets
/// are tried when not already listed.
pub fn locate_entity_file<S: EntityStore>(
    store: &S,
    hasher: &Hasher,
    quasihasher: &Quasihasher,
    entity_id: &str,
    opts: &LocateOpts,
) -> DeduResult<PathBuf> {
    let qhs = store.read_lines(entity_id, "quasihash")?;
    if qhs.len() != 1 {
        return Err(anyhow!("expected exactly 1 quasihash for {entity_id:?}, got {qhs:?}").into());
    }
    let quasihash = &qhs[0];

    let paths = store.read_lines(entity_id, "paths")?;

    for path_str in &paths {
        let path = Path::new(path_str);
        let info = match std::fs::symlink_metadata(path) {
            Ok(info) => info,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), "lstat error: {e}");
                continue;
            }
        };

        let candidate = if info.file_type().is_symlink() {
            if !opts.discover_symlinks {
                continue;
            }
            let Ok(raw_target) = std::fs::read_link(path) else {
                continue;
            };
            let target = if raw_target.is_absolute() {
                raw_target
            } else {
                path.parent().unwrap_or(Path::new(".")).join(raw_target)
            };
            let Ok(target) = std::path::absolute(&target) else {
                continue;
            };
            if paths.contains(&target.display().to_string()) {
                continue;
            }
            target
        } else {
            path.to_path_buf()
        };

        match try_path(
            hasher,
            quasihasher,
            &candidate,
            Some(quasihash),
            opts.verify.then_some(entity_id),
        ) {
            Ok(true) => {
                debug!(entity = %entity_id, path = %candidate.display(), "located");
                return Ok(candidate);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(path = %candidate.display(), "error probing candidate: {e}");
            }
        }
    }

    Err(DeduError::NotFound(format!(
        "no suitable path found for {entity_id:?} (tried {paths:?})"
    )))
}

/// Find a file by quasi-hash and/or full hash among an explicit list of
/// candidate paths, independent of any entity store.
///
/// At least one fingerprint must be given. Candidates are tried in list
/// order; symlinked entries whose targets are not themselves listed also
/// count as a match for the listed path. The first path whose content
/// checks out is returned.
pub fn find_file_among_paths(
    hasher: &Hasher,
    quasihasher: &Quasihasher,
    paths: &[String],
    quasihash: Option<&str>,
    full_hash: Option<&str>,
) -> DeduResult<PathBuf> {
    if quasihash.is_none() && full_hash.is_none() {
        return Err(anyhow!("must provide either a quasi-hash or a full hash").into());
    }

    for path_str in paths {
        let path = Path::new(path_str);
        let info = match std::fs::symlink_metadata(path) {
            Ok(info) => info,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), "lstat error: {e}");
                continue;
            }
        };

        if info.file_type().is_symlink() {
            let Ok(raw_target) = std::fs::read_link(path) else {
                continue;
            };
            let target = if raw_target.is_absolute() {
                raw_target
            } else {
                path.parent().unwrap_or(Path::new(".")).join(raw_target)
            };
            let Ok(target) = std::path::absolute(&target) else {
                continue;
            };
            if paths.contains(&target.display().to_string()) {
                continue;
            }
            match try_path(hasher, quasihasher, &target, quasihash, full_hash) {
                Ok(true) => return Ok(path.to_path_buf()),
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), target = %target.display(), "error probing target: {e}");
                    continue;
                }
            }
        }

        match try_path(hasher, quasihasher, path, quasihash, full_hash) {
            Ok(true) => return Ok(path.to_path_buf()),
            Ok(false) => {}
            Err(e) => {
                warn!(path = %path.display(), "error probing candidate: {e}");
            }
        }
    }

    Err(DeduError::NotFound("no valid path found".to_string()))
}
