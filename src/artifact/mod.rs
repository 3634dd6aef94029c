//! Package artifacts and the archiving service that produces them.
//!
//! - [`filesystem`] - directory copying and atomic publish helpers
//! - [`kpkg`] - the in-process `.kpkg` archiver
//! - [`assemble`] - the package assembler (staging root + descriptor -> artifact)
//!
//! An artifact is identified by `(name, version, arch)` and stored in the
//! output repository as `<name>-<version>-<arch>.kpkg`. That file name is the
//! repository's only index.

pub mod assemble;
pub mod filesystem;
pub mod kpkg;

use anyhow::{bail, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::process::Cmd;
use crate::recipe::PackageSpec;

pub const ARTIFACT_EXTENSION: &str = "kpkg";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl ArtifactId {
    pub fn new(name: &str, version: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
        }
    }

    pub fn for_spec(spec: &PackageSpec) -> Self {
        Self::new(&spec.name, &spec.version, &spec.architecture)
    }

    /// `<name>-<version>-<arch>`
    pub fn stem(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.arch)
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem(), ARTIFACT_EXTENSION)
    }

    pub fn path_in(&self, repo_dir: &Path) -> PathBuf {
        repo_dir.join(self.file_name())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// A published artifact in the output repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub path: PathBuf,
}

/// Turns an assembly directory (`files/` + `package.kdl`) into
/// `<assembly_dir>/<name>-<version>-<arch>.kpkg`.
pub trait Archiver {
    fn archive(&self, assembly_dir: &Path, id: &ArtifactId) -> Result<()>;
}

/// In-process archiver producing the `.kpkg` format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinArchiver;

impl Archiver for BuiltinArchiver {
    fn archive(&self, assembly_dir: &Path, id: &ArtifactId) -> Result<()> {
        kpkg::build_kpkg(assembly_dir, id)?;
        Ok(())
    }
}

/// External archiver. The assembly directory is appended as the last argument
/// and is also the working directory.
#[derive(Debug, Clone)]
pub struct CommandArchiver {
    argv: Vec<String>,
}

impl CommandArchiver {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            bail!("archiver command must name a program");
        }
        Ok(Self { argv })
    }
}

impl Archiver for CommandArchiver {
    fn archive(&self, assembly_dir: &Path, id: &ArtifactId) -> Result<()> {
        info!(artifact = %id, command = %self.argv.join(" "), "running external archiver");
        Cmd::new(&self.argv[0])
            .args(&self.argv[1..])
            .arg(assembly_dir)
            .current_dir(assembly_dir)
            .error_msg(format!("archiver failed for '{id}'"))
            .run()?;
        Ok(())
    }
}

/// Archiver selected by configuration.
pub fn archiver_for(command: Option<&[String]>) -> Result<Box<dyn Archiver>> {
    match command {
        Some(argv) => Ok(Box::new(CommandArchiver::new(argv.to_vec())?)),
        None => Ok(Box::new(BuiltinArchiver)),
    }
}
