//! Package assembler: staged tree + descriptor -> published artifact.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::info;

use super::filesystem::{copy_dir_recursive, publish_file, recreate_dir};
use super::kpkg::FILES_DIR;
use super::{Archiver, Artifact, ArtifactId};
use crate::build::StagingRoot;
use crate::descriptor::PackageDescriptor;

pub struct PackageAssembler<'a> {
    archiver: &'a dyn Archiver,
    output_dir: &'a Path,
}

impl<'a> PackageAssembler<'a> {
    pub fn new(archiver: &'a dyn Archiver, output_dir: &'a Path) -> Self {
        Self {
            archiver,
            output_dir,
        }
    }

    /// Assemble in `assembly_dir` (recreated empty) and publish into the
    /// output repository. The artifact becomes visible there only through
    /// the final rename.
    pub fn assemble(
        &self,
        id: &ArtifactId,
        staging: &StagingRoot,
        descriptor: &PackageDescriptor,
        assembly_dir: &Path,
    ) -> Result<Artifact> {
        recreate_dir(assembly_dir)?;
        copy_dir_recursive(&staging.path, &assembly_dir.join(FILES_DIR))?;
        descriptor.write(assembly_dir)?;

        self.archiver.archive(assembly_dir, id)?;

        let produced = assembly_dir.join(id.file_name());
        if !produced.is_file() {
            bail!(
                "archiver finished but expected artifact is missing: {}",
                produced.display()
            );
        }

        let published = id.path_in(self.output_dir);
        publish_file(&produced, &published)?;
        info!(artifact = %id, path = %published.display(), "published");

        Ok(Artifact {
            id: id.clone(),
            path: published,
        })
    }
}
