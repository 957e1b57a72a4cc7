//! Standard config-directory discovery
//!
//! Used when no explicit `--secrets`/`--config` flags are given: the first
//! existing directory out of `~/.config/dedu`, `~/.dedu`, `/etc/dedu`
//! wins, and must contain at least one of the two well-known file names.

use std::path::{Path, PathBuf};

use anyhow::anyhow;

use dedu_core::DeduResult;

pub const CONFIG_DIRS: &[&str] = &["~/.config/dedu", "~/.dedu", "/etc/dedu"];
pub const SECRETS_CONFIG_NAME: &str = "dedu.secret.toml";
pub const CONFIG_NAME: &str = "dedu.toml";

fn expand_home(path: &str) -> Option<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var_os("HOME")?;
        Some(Path::new(&home).join(rest))
    } else {
        Some(PathBuf::from(path))
    }
}

fn path_if_file_exists(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

/// The first standard config dir that exists, if any.
pub fn find_config_dir() -> Option<PathBuf> {
    CONFIG_DIRS
        .iter()
        .filter_map(|d| expand_home(d))
        .find(|p| p.is_dir())
}

/// Resolve the secrets and config files to load: explicit flags win;
/// otherwise search the standard directories.
pub fn resolve(
    secrets_flag: Option<PathBuf>,
    config_flag: Option<PathBuf>,
) -> DeduResult<(PathBuf, Option<PathBuf>)> {
    if secrets_flag.is_some() || config_flag.is_some() {
        let secrets =
            secrets_flag.ok_or_else(|| anyhow!("--config given without --secrets"))?;
        return Ok((secrets, config_flag));
    }

    let dir = find_config_dir().ok_or_else(|| {
        anyhow!("no config flag and no standard config dir exists (out of: {CONFIG_DIRS:?})")
    })?;

    let secrets = path_if_file_exists(dir.join(SECRETS_CONFIG_NAME));
    let config = path_if_file_exists(dir.join(CONFIG_NAME));

    match secrets {
        Some(secrets) => Ok((secrets, config)),
        None => Err(anyhow!(
            "expected {SECRETS_CONFIG_NAME:?} to exist in config dir {}",
            dir.display()
        )
        .into()),
    }
}
