//! Staging installer: build one package into a private destination root.
//!
//! - [`autotools`] - the generic configure / make / make install triad
//! - [`custom`] - package-specific install procedures (kernel headers, zlib)
//! - [`helpers`] - `config.guess` / `config.sub` provisioning and build triple probing
//!
//! Every strategy shares the same contract: the build runs in a fresh
//! `build/` directory and installs into a fresh `destdir/`, both under the
//! package's own work directory. On failure both are left on disk.

pub mod autotools;
pub mod custom;
pub mod helpers;

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::artifact::filesystem::{list_files, recreate_dir};
use crate::config::BootstrapConfig;
use crate::recipe::{BuildStrategy, PackageSpec};
use crate::source::SourceTree;

/// Per package-version scratch layout under the work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    pub root: PathBuf,
    pub build_dir: PathBuf,
    pub destdir: PathBuf,
    pub assembly_dir: PathBuf,
}

impl WorkPaths {
    pub fn new(config: &BootstrapConfig, spec: &PackageSpec) -> Self {
        let root = config.package_work_dir(&spec.name, &spec.version);
        Self {
            build_dir: root.join("build"),
            destdir: root.join("destdir"),
            assembly_dir: root.join("pkg"),
            root,
        }
    }
}

/// What a package installed: the destination root and its file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingRoot {
    pub path: PathBuf,
    /// Relative paths of installed files and symlinks, sorted.
    pub files: Vec<PathBuf>,
}

impl StagingRoot {
    pub fn capture(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            files: list_files(path)?,
        })
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.files.iter().any(|f| f == Path::new(rel))
    }
}

/// Runs a package's build strategy against the run configuration.
pub struct StagingInstaller<'a> {
    config: &'a BootstrapConfig,
}

impl<'a> StagingInstaller<'a> {
    pub fn new(config: &'a BootstrapConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, spec: &PackageSpec, source: &SourceTree) -> Result<StagingRoot> {
        let paths = WorkPaths::new(self.config, spec);
        recreate_dir(&paths.build_dir)?;
        recreate_dir(&paths.destdir)?;

        info!(
            pkg = %spec.name,
            version = %spec.version,
            strategy = %spec.strategy,
            "building"
        );

        match spec.strategy {
            BuildStrategy::Autotools => {
                let build_triple = self.build_triple(source)?;
                autotools::build(self.config, spec, source, &paths, &build_triple)?;
            }
            BuildStrategy::KernelHeaders => {
                custom::install_kernel_headers(self.config, source, &paths)?;
            }
            BuildStrategy::PrefixConfigure => {
                custom::build_prefix_configure(self.config, spec, source, &paths)?;
            }
        }

        let staged = StagingRoot::capture(&paths.destdir)?;
        if staged.files.is_empty() {
            bail!(
                "install step for '{}' produced no files in '{}'",
                spec.slug(),
                paths.destdir.display()
            );
        }
        info!(pkg = %spec.name, files = staged.files.len(), "staged");
        Ok(staged)
    }

    fn build_triple(&self, source: &SourceTree) -> Result<String> {
        if let Some(triple) = &self.config.build_triple {
            return Ok(triple.clone());
        }
        let guess = match helpers::locate_config_guess(&source.path) {
            Some(path) => path,
            None => helpers::ensure_cached_helpers(
                &self.config.helpers_dir(),
                &self.config.helper_base_url,
            )?,
        };
        helpers::probe_build_triple(&guess)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Fake native tools for exercising build strategies without a toolchain.

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::{self, File};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Upstream-style tarball: every entry under the `top/` directory.
    pub fn write_tar_gz(path: &Path, top: &str, files: &[(&str, &str, u32)]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let out = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
        for (rel, body, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{top}/{rel}"), body.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    pub fn write_script(path: &Path, body: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A `make` that logs its arguments to `$PWD/make.log` and, for
    /// `install`, installs `usr/bin/<program>` under `DESTDIR`.
    pub fn fake_make(path: &Path, program: &str) {
        write_script(
            path,
            &format!(
                r#"echo "$@" >> make.log
for arg in "$@"; do
  case "$arg" in
    DESTDIR=*) DESTDIR="${{arg#DESTDIR=}}" ;;
  esac
done
case " $* " in
  *" install "*)
    mkdir -p "$DESTDIR/usr/bin"
    printf '#!/bin/sh\necho {program}\n' > "$DESTDIR/usr/bin/{program}"
    chmod 755 "$DESTDIR/usr/bin/{program}"
    ;;
esac
"#
            ),
        );
    }

    /// A `configure` that records its arguments to `$PWD/configure.args`.
    pub fn fake_configure(source: &Path) {
        write_script(
            &source.join("configure"),
            "printf '%s\\n' \"$@\" > configure.args\n",
        );
    }
}
