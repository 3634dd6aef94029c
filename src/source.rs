//! Source provider: one unpacked upstream tree per (name, version).
//!
//! Trees live at `<source_dir>/<name>-<version>/` and are reused across runs.
//! A tree counts as present only when it carries [`SOURCE_COMPLETE_MARKER`],
//! which is written after extraction finished and before the tree is renamed
//! into place. A directory without the marker is an interrupted extraction and
//! is fetched again.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::process::Cmd;

pub const SOURCE_COMPLETE_MARKER: &str = ".seiryo-source-complete";

const DOWNLOADS_SUBDIR: &str = ".downloads";

/// An unpacked, complete source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// Whether [`SourceProvider::ensure_source`] had to do any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Cached,
    Fetched,
}

#[derive(Debug, Clone)]
pub struct SourceProvider {
    source_dir: PathBuf,
}

impl SourceProvider {
    pub fn new(source_dir: &Path) -> Self {
        Self {
            source_dir: source_dir.to_path_buf(),
        }
    }

    pub fn tree_path(&self, name: &str, version: &str) -> PathBuf {
        self.source_dir.join(format!("{name}-{version}"))
    }

    pub fn is_complete(&self, name: &str, version: &str) -> bool {
        self.tree_path(name, version)
            .join(SOURCE_COMPLETE_MARKER)
            .is_file()
    }

    /// Make sure the source tree for `(name, version)` exists, fetching `url`
    /// only when it does not.
    pub fn ensure_source(
        &self,
        name: &str,
        version: &str,
        url: &str,
    ) -> Result<(SourceTree, FetchOutcome)> {
        let dest = self.tree_path(name, version);
        let tree = SourceTree {
            name: name.to_string(),
            version: version.to_string(),
            path: dest.clone(),
        };

        if self.is_complete(name, version) {
            debug!(pkg = name, path = %dest.display(), "source tree cached");
            return Ok((tree, FetchOutcome::Cached));
        }

        if dest.exists() {
            warn!(
                pkg = name,
                path = %dest.display(),
                "removing incomplete source tree from an interrupted extraction"
            );
            fs::remove_dir_all(&dest).with_context(|| {
                format!("removing incomplete source tree '{}'", dest.display())
            })?;
        }

        let extract_prefix = format!(".extract-{name}-{version}-");
        self.sweep_stale_extractions(&extract_prefix)?;

        let downloads = self.source_dir.join(DOWNLOADS_SUBDIR);
        fs::create_dir_all(&downloads)
            .with_context(|| format!("creating downloads directory '{}'", downloads.display()))?;
        let archive = downloads.join(archive_file_name(url)?);

        info!(pkg = name, %url, "fetching source");
        download(url, &archive)?;

        let staging = self.source_dir.join(tmp_name(&extract_prefix));
        let unpacked = unpack_into_place(&archive, &staging, &dest, url);

        // Neither the archive nor the extraction directory outlives the attempt.
        if staging.exists() {
            if let Err(err) = fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), "could not remove extraction directory: {err}");
            }
        }
        if let Err(err) = fs::remove_file(&archive) {
            warn!(path = %archive.display(), "could not remove downloaded archive: {err}");
        }
        unpacked?;

        info!(pkg = name, path = %dest.display(), "source ready");
        Ok((tree, FetchOutcome::Fetched))
    }
}

impl SourceProvider {
    /// Remove extraction directories left by a crashed earlier run.
    fn sweep_stale_extractions(&self, prefix: &str) -> Result<()> {
        let Ok(entries) = fs::read_dir(&self.source_dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let stale = entry.file_name().to_str().is_some_and(|n| n.starts_with(prefix));
            if stale {
                debug!(path = %entry.path().display(), "removing stale extraction directory");
                fs::remove_dir_all(entry.path()).with_context(|| {
                    format!("removing stale extraction directory '{}'", entry.path().display())
                })?;
            }
        }
        Ok(())
    }
}

/// Extract `archive` into `staging`, mark the tree complete and rename it to
/// `dest`.
fn unpack_into_place(archive: &Path, staging: &Path, dest: &Path, url: &str) -> Result<()> {
    fs::create_dir_all(staging)
        .with_context(|| format!("creating extraction directory '{}'", staging.display()))?;
    extract_archive(archive, staging)?;

    let root = single_top_level_dir(staging)?.unwrap_or_else(|| staging.to_path_buf());
    fs::write(root.join(SOURCE_COMPLETE_MARKER), url.as_bytes())
        .with_context(|| format!("writing source marker in '{}'", root.display()))?;
    fs::rename(&root, dest).with_context(|| {
        format!(
            "moving extracted source '{}' -> '{}'",
            root.display(),
            dest.display()
        )
    })
}

/// Download `url` to `dest`. `file://` URLs are copied from the local
/// filesystem (offline mirrors).
pub fn download(url: &str, dest: &Path) -> Result<()> {
    let partial = dest.with_file_name(format!(
        "{}.part",
        dest.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
    ));

    if let Some(local) = url.strip_prefix("file://") {
        fs::copy(local, &partial)
            .with_context(|| format!("copying local source '{}'", local))?;
    } else {
        let mut response = reqwest::blocking::get(url)
            .with_context(|| format!("requesting '{url}'"))?
            .error_for_status()
            .with_context(|| format!("downloading '{url}'"))?;
        let mut file = File::create(&partial)
            .with_context(|| format!("creating '{}'", partial.display()))?;
        response
            .copy_to(&mut file)
            .with_context(|| format!("writing '{}'", partial.display()))?;
    }

    fs::rename(&partial, dest).with_context(|| {
        format!(
            "moving download '{}' -> '{}'",
            partial.display(),
            dest.display()
        )
    })?;
    Ok(())
}

/// Unpack a source archive into `dest`.
///
/// gzip, zstd and plain tar are read in process; other compressions go
/// through the host `tar`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let file = open(archive)?;
        unpack_tar(GzDecoder::new(BufReader::new(file)), archive, dest)
    } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        let decoder = zstd::stream::Decoder::new(open(archive)?)?;
        unpack_tar(decoder, archive, dest)
    } else if name.ends_with(".tar") {
        unpack_tar(BufReader::new(open(archive)?), archive, dest)
    } else if name.contains(".tar.") {
        Cmd::new("tar")
            .arg("-xf")
            .arg(archive)
            .arg("-C")
            .arg(dest)
            .error_msg(format!("extracting '{}' failed", archive.display()))
            .run()?;
        Ok(())
    } else {
        bail!("unsupported source archive format: '{}'", archive.display())
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("opening archive '{}'", path.display()))
}

fn unpack_tar<R: Read>(reader: R, archive: &Path, dest: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .with_context(|| format!("unpacking '{}' into '{}'", archive.display(), dest.display()))
}

/// Upstream tarballs usually wrap everything in `<name>-<version>/`.
fn single_top_level_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("reading extraction directory '{}'", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    if entries.len() != 1 {
        return Ok(None);
    }
    let entry = entries.remove(0);
    if entry.file_type()?.is_dir() {
        Ok(Some(entry.path()))
    } else {
        Ok(None)
    }
}

fn archive_file_name(url: &str) -> Result<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| anyhow::anyhow!("cannot derive archive file name from '{url}'"))?;
    Ok(name.to_string())
}

fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{prefix}{n}")
}
