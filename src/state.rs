//! Per-package progress ledger.
//!
//! Each package-version-arch has one JSON record under `<output>/.state/`
//! holding its last reached [`PackageState`]. Records are written with
//! tmp + rename, so a crash leaves either the old or the new record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::artifact::ArtifactId;

pub const STATE_DIR: &str = ".state";

/// Progress of one package through the pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Absent,
    Fetched,
    Staged,
    Packaged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub state: PackageState,
    pub updated_at_utc: String,
    /// Set once the artifact is published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StateLedger {
    dir: PathBuf,
}

impl StateLedger {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            dir: output_dir.join(STATE_DIR),
        }
    }

    pub fn record_path(&self, id: &ArtifactId) -> PathBuf {
        self.dir.join(format!("{}.json", id.stem()))
    }

    /// Current state; `Absent` when no record exists.
    pub fn state(&self, id: &ArtifactId) -> Result<PackageState> {
        Ok(self
            .load(id)?
            .map(|record| record.state)
            .unwrap_or(PackageState::Absent))
    }

    pub fn load(&self, id: &ArtifactId) -> Result<Option<StateRecord>> {
        let path = self.record_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("reading state record '{}'", path.display()))?;
        let record = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing state record '{}'", path.display()))?;
        Ok(Some(record))
    }

    /// Record a state without artifact details.
    pub fn record(&self, id: &ArtifactId, state: PackageState) -> Result<StateRecord> {
        self.write(StateRecord {
            name: id.name.clone(),
            version: id.version.clone(),
            arch: id.arch.clone(),
            state,
            updated_at_utc: now_rfc3339()?,
            artifact_sha256: None,
            artifact_size: None,
        })
    }

    /// Record `Packaged` along with the digest of the published artifact.
    pub fn record_packaged(&self, id: &ArtifactId, artifact: &Path) -> Result<StateRecord> {
        let (sha256, size) = sha256_file(artifact)?;
        self.write(StateRecord {
            name: id.name.clone(),
            version: id.version.clone(),
            arch: id.arch.clone(),
            state: PackageState::Packaged,
            updated_at_utc: now_rfc3339()?,
            artifact_sha256: Some(sha256),
            artifact_size: Some(size),
        })
    }

    fn write(&self, record: StateRecord) -> Result<StateRecord> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating state directory '{}'", self.dir.display()))?;
        let id = ArtifactId::new(&record.name, &record.version, &record.arch);
        let path = self.record_path(&id);
        let tmp = self.dir.join(tmp_name(&format!(".{}", id.stem())));
        fs::write(&tmp, serde_json::to_vec_pretty(&record)?)
            .with_context(|| format!("writing state record '{}'", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| {
            format!("renaming '{}' -> '{}'", tmp.display(), path.display())
        })?;
        Ok(record)
    }
}

pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("formatting timestamp")
}

fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{prefix}.tmp-{n}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id() -> ArtifactId {
        ArtifactId::new("zlib", "1.3.1", "x86_64")
    }

    #[test]
    fn missing_record_is_absent() {
        let temp = TempDir::new().unwrap();
        let ledger = StateLedger::new(temp.path());
        assert_eq!(ledger.state(&id()).unwrap(), PackageState::Absent);
        assert!(ledger.load(&id()).unwrap().is_none());
    }

    #[test]
    fn records_progress_and_overwrites() {
        let temp = TempDir::new().unwrap();
        let ledger = StateLedger::new(temp.path());
        ledger.record(&id(), PackageState::Fetched).unwrap();
        assert_eq!(ledger.state(&id()).unwrap(), PackageState::Fetched);
        ledger.record(&id(), PackageState::Staged).unwrap();
        assert_eq!(ledger.state(&id()).unwrap(), PackageState::Staged);

        let path = ledger.record_path(&id());
        assert_eq!(path, temp.path().join(".state/zlib-1.3.1-x86_64.json"));
        let raw = fs::read_to_string(path).unwrap();
        assert!(raw.contains("\"state\": \"staged\""));

        // No temporaries left behind.
        let leftovers: Vec<_> = fs::read_dir(temp.path().join(STATE_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn packaged_record_carries_digest() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("zlib-1.3.1-x86_64.kpkg");
        fs::write(&artifact, b"abc").unwrap();
        let ledger = StateLedger::new(temp.path());

        let record = ledger.record_packaged(&id(), &artifact).unwrap();
        assert_eq!(record.state, PackageState::Packaged);
        assert_eq!(
            record.artifact_sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(record.artifact_size, Some(3));
        assert_eq!(ledger.load(&id()).unwrap(), Some(record));
    }

    #[test]
    fn states_are_ordered() {
        assert!(PackageState::Absent < PackageState::Fetched);
        assert!(PackageState::Staged < PackageState::Packaged);
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let temp = TempDir::new().unwrap();
        let record = StateLedger::new(temp.path())
            .record(&id(), PackageState::Fetched)
            .unwrap();
        assert!(OffsetDateTime::parse(&record.updated_at_utc, &Rfc3339).is_ok());
    }
}
