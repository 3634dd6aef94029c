//! Host identification helpers (`config.guess`, `config.sub`).
//!
//! Most upstream tarballs ship them. When one does not, the current copies
//! are fetched once into the helper cache and reused by every later build.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::process::Cmd;
use crate::source::download;

pub const HELPER_FILES: &[&str] = &["config.guess", "config.sub"];

/// Locations autotools packages keep their helpers in, relative to the source root.
const IN_TREE_LOCATIONS: &[&str] = &["config.guess", "build-aux/config.guess", "support/config.guess"];

/// `config.guess` shipped with the source tree, if any.
pub fn locate_config_guess(source_root: &Path) -> Option<PathBuf> {
    IN_TREE_LOCATIONS
        .iter()
        .map(|rel| source_root.join(rel))
        .find(|path| path.is_file())
}

/// Ensure both helpers are cached and executable; return the cached
/// `config.guess`.
pub fn ensure_cached_helpers(helpers_dir: &Path, base_url: &str) -> Result<PathBuf> {
    fs::create_dir_all(helpers_dir)
        .with_context(|| format!("creating helper cache '{}'", helpers_dir.display()))?;

    for helper in HELPER_FILES {
        let path = helpers_dir.join(helper);
        if path.is_file() {
            continue;
        }
        let url = format!("{}/{}", base_url.trim_end_matches('/'), helper);
        info!(%url, "fetching build helper");
        download(&url, &path).with_context(|| format!("fetching build helper '{helper}'"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("marking '{}' executable", path.display()))?;
    }

    Ok(helpers_dir.join("config.guess"))
}

/// Run `config.guess` and return the canonical build triple.
pub fn probe_build_triple(config_guess: &Path) -> Result<String> {
    let triple = Cmd::new("sh")
        .arg(config_guess)
        .error_msg("probing build triple failed")
        .run_stdout()?;
    if triple.is_empty() || triple.contains(char::is_whitespace) {
        bail!(
            "'{}' returned an unusable build triple: '{}'",
            config_guess.display(),
            triple
        );
    }
    Ok(triple)
}
