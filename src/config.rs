//! Run configuration: paths, target identity and build parallelism.
//!
//! Loaded from an optional TOML file, then overridden by `SEIRYO_*`
//! environment variables.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Default store directory name, relative to the working directory.
pub const DEFAULT_ROOT_DIR: &str = ".artifacts";
pub const DEFAULT_CONFIG_FILENAME: &str = "bootstrap.toml";
pub const CONFIG_ENV: &str = "SEIRYO_BOOTSTRAP_CONFIG";

const DEFAULT_ARCH: &str = "x86_64";
const DEFAULT_FLAVOUR: &str = "glibc-systemd";
const DEFAULT_TARGET: &str = "x86_64-seiryo-linux-gnu";
const DEFAULT_PREFIX: &str = "/usr";
const DEFAULT_HELPER_BASE_URL: &str = "https://git.savannah.gnu.org/cgit/config.git/plain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Parallel jobs handed to `make -j`.
    pub jobs: usize,
    pub arch: String,
    pub flavour: String,
    pub target_triple: String,
    /// Pinned build triple. `None` means probe with `config.guess`.
    pub build_triple: Option<String>,
    pub prefix: String,
    pub source_dir: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub make_program: String,
    /// External archiver; the assembly directory is appended as last argument.
    pub archiver_command: Option<Vec<String>>,
    pub helper_base_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BootstrapToml {
    jobs: Option<usize>,
    arch: Option<String>,
    flavour: Option<String>,
    target_triple: Option<String>,
    build_triple: Option<String>,
    prefix: Option<String>,
    root: Option<PathBuf>,
    source_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    make_program: Option<String>,
    archiver_command: Option<Vec<String>>,
    helper_base_url: Option<String>,
}

impl BootstrapConfig {
    /// Defaults rooted at `root`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            jobs: default_jobs(),
            arch: DEFAULT_ARCH.to_string(),
            flavour: DEFAULT_FLAVOUR.to_string(),
            target_triple: DEFAULT_TARGET.to_string(),
            build_triple: None,
            prefix: DEFAULT_PREFIX.to_string(),
            source_dir: root.join("sources"),
            work_dir: root.join("work"),
            output_dir: root.join("out/packages"),
            make_program: "make".to_string(),
            archiver_command: None,
            helper_base_url: DEFAULT_HELPER_BASE_URL.to_string(),
        }
    }

    /// Resolve and load the configuration for a run.
    ///
    /// Resolution order: `explicit`, `$SEIRYO_BOOTSTRAP_CONFIG`,
    /// `./bootstrap.toml`, `<config dir>/seiryo/bootstrap.toml`. With no file
    /// found the defaults are used. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => discover_config_file(),
        };
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::with_root(Path::new(DEFAULT_ROOT_DIR)),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.make_absolute()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading bootstrap config '{}'", path.display()))?;
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("parsing bootstrap config '{}'", path.display()))?;
        debug!(path = %path.display(), "loaded bootstrap config");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: BootstrapToml = toml::from_str(raw)?;
        let root = parsed
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR));
        let defaults = Self::with_root(&root);

        Ok(Self {
            jobs: parsed.jobs.unwrap_or(defaults.jobs),
            arch: parsed.arch.unwrap_or(defaults.arch),
            flavour: parsed.flavour.unwrap_or(defaults.flavour),
            target_triple: parsed.target_triple.unwrap_or(defaults.target_triple),
            build_triple: parsed.build_triple.or(defaults.build_triple),
            prefix: parsed.prefix.unwrap_or(defaults.prefix),
            source_dir: parsed.source_dir.unwrap_or(defaults.source_dir),
            work_dir: parsed.work_dir.unwrap_or(defaults.work_dir),
            output_dir: parsed.output_dir.unwrap_or(defaults.output_dir),
            make_program: parsed.make_program.unwrap_or(defaults.make_program),
            archiver_command: parsed.archiver_command,
            helper_base_url: parsed.helper_base_url.unwrap_or(defaults.helper_base_url),
        })
    }

    /// Apply `SEIRYO_*` overrides read through `lookup`.
    ///
    /// `SEIRYO_ROOT` moves all three directories together.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup("SEIRYO_ROOT") {
            let root = PathBuf::from(root);
            self.source_dir = root.join("sources");
            self.work_dir = root.join("work");
            self.output_dir = root.join("out/packages");
        }
        if let Some(jobs) = lookup("SEIRYO_JOBS") {
            self.jobs = jobs
                .trim()
                .parse()
                .with_context(|| format!("SEIRYO_JOBS must be a positive integer, got '{jobs}'"))?;
        }
        if let Some(arch) = lookup("SEIRYO_ARCH") {
            self.arch = arch;
        }
        if let Some(flavour) = lookup("SEIRYO_FLAVOUR") {
            self.flavour = flavour;
        }
        if let Some(target) = lookup("SEIRYO_TARGET") {
            self.target_triple = target;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        for (field, value) in [
            ("arch", &self.arch),
            ("flavour", &self.flavour),
            ("target_triple", &self.target_triple),
        ] {
            if value.trim().is_empty() {
                bail!("{field} must not be empty");
            }
            if value.contains('/') || value.contains(char::is_whitespace) {
                bail!("{field} must be a single path-safe token, got '{value}'");
            }
        }
        if !self.prefix.starts_with('/') {
            bail!("prefix must be absolute, got '{}'", self.prefix);
        }
        if matches!(&self.archiver_command, Some(cmd) if cmd.is_empty()) {
            bail!("archiver_command must name a program when set");
        }
        Ok(())
    }

    /// Anchor the source, work and output directories at the current
    /// directory. Build steps run with their own working directories, so
    /// every path handed to them must be absolute.
    pub fn make_absolute(&mut self) -> Result<()> {
        for dir in [&mut self.source_dir, &mut self.work_dir, &mut self.output_dir] {
            if dir.is_relative() {
                *dir = std::path::absolute(&*dir)
                    .with_context(|| format!("resolving '{}'", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Private scratch area for one package-version.
    pub fn package_work_dir(&self, name: &str, version: &str) -> PathBuf {
        self.work_dir.join(format!("{name}-{version}"))
    }

    /// Cache of `config.guess` / `config.sub`.
    pub fn helpers_dir(&self) -> PathBuf {
        self.work_dir.join(".helpers")
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn discover_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILENAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("seiryo").join(DEFAULT_CONFIG_FILENAME))
        .filter(|path| path.is_file())
}
