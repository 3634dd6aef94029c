//! Pipeline driver: run every package through source, staging and packaging.
//!
//! The driver is strictly sequential. For each package in dependency order
//! it consults the state ledger and the output repository, and either skips
//! the package or runs it to a published artifact. The first failure stops
//! the run.

pub mod order;

use anyhow::anyhow;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::artifact::assemble::PackageAssembler;
use crate::artifact::{archiver_for, Archiver, Artifact, ArtifactId};
use crate::build::{StagingInstaller, WorkPaths};
use crate::config::BootstrapConfig;
use crate::descriptor::describe;
use crate::error::{PipelineError, PipelineResult};
use crate::recipe::PackageSpec;
use crate::source::SourceProvider;
use crate::state::{PackageState, StateLedger};

pub const LOCK_FILENAME: &str = ".lock";

/// What happened to one package during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    /// Artifact already in the repository; nothing was done.
    Skipped,
    Built(Artifact),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub packages: Vec<(ArtifactId, PackageOutcome)>,
}

impl RunReport {
    pub fn built(&self) -> impl Iterator<Item = &Artifact> {
        self.packages.iter().filter_map(|(_, outcome)| match outcome {
            PackageOutcome::Built(artifact) => Some(artifact),
            PackageOutcome::Skipped => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ArtifactId> {
        self.packages
            .iter()
            .filter(|(_, outcome)| *outcome == PackageOutcome::Skipped)
            .map(|(id, _)| id)
    }
}

pub struct Pipeline {
    config: BootstrapConfig,
    order: Vec<PackageSpec>,
    archiver: Box<dyn Archiver>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Compute the build order. Fails on cycles and duplicate names.
    /// Relative directories in `config` are resolved against the current
    /// directory here, once.
    pub fn new(mut config: BootstrapConfig, specs: Vec<PackageSpec>) -> PipelineResult<Self> {
        let order = order::build_order(&specs)?;
        config
            .make_absolute()
            .map_err(|err| PipelineError::environment("resolving configured directories", err))?;
        let archiver = archiver_for(config.archiver_command.as_deref())
            .map_err(|err| PipelineError::environment("archiver configuration", err))?;
        Ok(Self {
            config,
            order,
            archiver,
        })
    }

    /// Packages in the order they will be processed.
    pub fn order(&self) -> &[PackageSpec] {
        &self.order
    }

    pub fn run(&self) -> PipelineResult<RunReport> {
        let output_dir = &self.config.output_dir;
        fs::create_dir_all(output_dir).map_err(|err| {
            PipelineError::environment(
                format!("creating output repository '{}'", output_dir.display()),
                err.into(),
            )
        })?;
        let _lock = RepoLock::acquire(output_dir)?;

        let ledger = StateLedger::new(output_dir);
        let mut report = RunReport::default();
        info!(packages = self.order.len(), "bootstrap run started");

        for spec in &self.order {
            let id = ArtifactId::for_spec(spec);
            let outcome = self.process(spec, &id, &ledger)?;
            report.packages.push((id, outcome));
        }

        info!(
            built = report.built().count(),
            skipped = report.skipped().count(),
            "bootstrap run finished"
        );
        Ok(report)
    }

    fn process(
        &self,
        spec: &PackageSpec,
        id: &ArtifactId,
        ledger: &StateLedger,
    ) -> PipelineResult<PackageOutcome> {
        let artifact_path = id.path_in(&self.config.output_dir);
        let state = ledger
            .state(id)
            .map_err(|err| PipelineError::environment(format!("state of '{id}'"), err))?;

        if artifact_path.is_file() {
            if state == PackageState::Packaged {
                debug!(pkg = %spec.name, "already packaged, skipping");
            } else {
                info!(pkg = %spec.name, previous = ?state, "adopting existing artifact");
                ledger
                    .record_packaged(id, &artifact_path)
                    .map_err(|err| PipelineError::environment(format!("state of '{id}'"), err))?;
            }
            return Ok(PackageOutcome::Skipped);
        }

        let work = WorkPaths::new(&self.config, spec);
        match state {
            PackageState::Fetched | PackageState::Staged => {
                warn!(
                    pkg = %spec.name,
                    previous = ?state,
                    "previous run stopped mid-package, discarding its work directory"
                );
                remove_work_dir(&work.root)
                    .map_err(|err| PipelineError::build(&spec.name, err))?;
            }
            PackageState::Packaged => {
                warn!(pkg = %spec.name, "recorded as packaged but artifact is missing, rebuilding");
            }
            PackageState::Absent => {}
        }

        self.check_dependencies(spec)?;

        let record = |state| {
            ledger
                .record(id, state)
                .map_err(|err| PipelineError::environment(format!("state of '{id}'"), err))
        };

        let (source, _) = SourceProvider::new(&self.config.source_dir)
            .ensure_source(&spec.name, &spec.version, &spec.source_url)
            .map_err(|err| PipelineError::fetch(&spec.name, err))?;
        record(PackageState::Fetched)?;

        let staged = StagingInstaller::new(&self.config)
            .build(spec, &source)
            .map_err(|err| PipelineError::build(&spec.name, err))?;
        record(PackageState::Staged)?;

        let descriptor = describe(spec);
        let artifact = PackageAssembler::new(self.archiver.as_ref(), &self.config.output_dir)
            .assemble(id, &staged, &descriptor, &work.assembly_dir)
            .map_err(|err| PipelineError::assembly(&spec.name, err))?;
        ledger
            .record_packaged(id, &artifact.path)
            .map_err(|err| PipelineError::assembly(&spec.name, err))?;

        info!(pkg = %spec.name, artifact = %artifact.path.display(), "packaged");
        Ok(PackageOutcome::Built(artifact))
    }

    /// Every dependency built by this pipeline must already be published.
    fn check_dependencies(&self, spec: &PackageSpec) -> PipelineResult<()> {
        let by_name: HashMap<&str, &PackageSpec> =
            self.order.iter().map(|s| (s.name.as_str(), s)).collect();
        for dep in &spec.depends_on {
            let Some(dep_spec) = by_name.get(dep.as_str()) else {
                continue;
            };
            let dep_artifact = ArtifactId::for_spec(dep_spec).path_in(&self.config.output_dir);
            if !dep_artifact.is_file() {
                return Err(PipelineError::build(
                    &spec.name,
                    anyhow!(
                        "dependency '{}' has no artifact at '{}'",
                        dep,
                        dep_artifact.display()
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn remove_work_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|err| anyhow!("removing stale work directory '{}': {err}", dir.display()))?;
    }
    Ok(())
}

/// Exclusive advisory lock on the output repository for a whole run.
///
/// The lock file is never unlinked; unlinking a held lock would let a second
/// process lock a fresh inode at the same path.
#[derive(Debug)]
struct RepoLock {
    _file: File,
    path: PathBuf,
}

impl RepoLock {
    fn acquire(output_dir: &Path) -> PipelineResult<Self> {
        let path = output_dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                PipelineError::environment(
                    format!("opening lock file '{}'", path.display()),
                    err.into(),
                )
            })?;
        if file.try_lock_exclusive().is_err() {
            return Err(PipelineError::environment(
                format!("output repository '{}'", output_dir.display()),
                anyhow!("locked by another bootstrap run ({})", path.display()),
            ));
        }
        debug!(path = %path.display(), "repository lock acquired");
        Ok(Self { _file: file, path })
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "repository lock released");
    }
}
