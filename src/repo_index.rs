//! Repository database generation.
//!
//! Scans a flat directory of `.kpkg` files and writes `<db>` (TOML, one
//! table per package name) plus `<db>.zst`. Packages whose descriptor cannot
//! be read are reported and left out.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact::{kpkg, ARTIFACT_EXTENSION};
use crate::descriptor::PackageDescriptor;
use crate::state::sha256_file;

pub const DEFAULT_DB_NAME: &str = "repo.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPackage {
    pub version: String,
    pub arch: String,
    pub flavour: String,
    pub filename: String,
    pub sha256: String,
    pub depends: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoDatabase {
    pub packages: BTreeMap<String, RepoPackage>,
}

/// A package left out of the database, with the reason.
#[derive(Debug)]
pub struct Skipped {
    pub path: PathBuf,
    pub error: anyhow::Error,
}

/// Index every `.kpkg` directly under `repo_dir`.
pub fn scan(repo_dir: &Path) -> Result<(RepoDatabase, Vec<Skipped>)> {
    let mut paths: Vec<PathBuf> = fs::read_dir(repo_dir)
        .with_context(|| format!("reading repository '{}'", repo_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
        })
        .collect();
    paths.sort();

    let mut db = RepoDatabase::default();
    let mut skipped = Vec::new();
    for path in paths {
        match index_package(&path) {
            Ok((name, entry)) => {
                db.packages.insert(name, entry);
            }
            Err(error) => {
                warn!(path = %path.display(), "skipping package: {error:#}");
                skipped.push(Skipped { path, error });
            }
        }
    }
    Ok((db, skipped))
}

fn index_package(path: &Path) -> Result<(String, RepoPackage)> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("non UTF-8 file name '{}'", path.display()))?
        .to_string();
    let descriptor = PackageDescriptor::from_kdl(&kpkg::read_descriptor(path)?)?;
    let (sha256, _) = sha256_file(path)?;
    Ok((
        descriptor.name,
        RepoPackage {
            version: descriptor.version,
            arch: descriptor.arch,
            flavour: descriptor.flavour,
            filename,
            sha256,
            depends: descriptor.depends,
        },
    ))
}

impl RepoDatabase {
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing repository database")
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing repository database")
    }

    /// Write `output` and `output.zst`. Returns the compressed path.
    pub fn write(&self, output: &Path) -> Result<PathBuf> {
        let text = self.to_toml()?;
        fs::write(output, &text)
            .with_context(|| format!("writing '{}'", output.display()))?;

        let mut zst_name = output.as_os_str().to_owned();
        zst_name.push(".zst");
        let zst_path = PathBuf::from(zst_name);
        let file = fs::File::create(&zst_path)
            .with_context(|| format!("creating '{}'", zst_path.display()))?;
        let mut encoder = zstd::stream::write::Encoder::new(file, 3)?;
        encoder.write_all(text.as_bytes())?;
        encoder.finish()?;

        info!(
            packages = self.packages.len(),
            db = %output.display(),
            "repository database written"
        );
        Ok(zst_path)
    }
}
