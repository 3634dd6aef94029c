//! Package recipes: what to build, from where, and how.
//!
//! Recipes are data. A recipe set is either the built-in [`base`] set or a
//! TOML file with one `[[package]]` table per package:
//!
//! ```toml
//! [[package]]
//! name = "zlib"
//! version = "1.3.1"
//! source_url = "https://zlib.net/zlib-{version}.tar.gz"
//! license = "Zlib"
//! strategy = "prefix_configure"
//! depends_on = ["glibc"]
//! ```
//!
//! `{version}` in `source_url` is replaced with the package version.

pub mod base;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::config::BootstrapConfig;

/// How a package turns its source tree into a staging root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    /// Out-of-tree `configure --build --host --target`, `make`, `make DESTDIR= install`.
    #[default]
    Autotools,
    /// Kernel `make headers` followed by a direct copy of the exported headers.
    KernelHeaders,
    /// In-tree `configure --prefix` driven by `CHOST` (zlib style).
    PrefixConfigure,
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStrategy::Autotools => write!(f, "autotools"),
            BuildStrategy::KernelHeaders => write!(f, "kernel_headers"),
            BuildStrategy::PrefixConfigure => write!(f, "prefix_configure"),
        }
    }
}

/// Immutable description of one package in the bootstrap set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub flavour: String,
    pub source_url: String,
    pub build_options: Vec<String>,
    pub depends_on: Vec<String>,
    pub license: String,
    pub strategy: BuildStrategy,
}

impl PackageSpec {
    /// `<name>-<version>`, the key for source and work directories.
    pub fn slug(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// A package as written in a recipe file, before global identity is bound.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageRecipe {
    pub name: String,
    pub version: String,
    pub source_url: String,
    pub license: String,
    #[serde(default)]
    pub strategy: BuildStrategy,
    #[serde(default)]
    pub build_options: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeFileToml {
    #[serde(default)]
    package: Vec<PackageRecipe>,
}

impl PackageRecipe {
    /// Bind the recipe to the run's architecture and flavour.
    pub fn into_spec(self, config: &BootstrapConfig) -> Result<PackageSpec> {
        validate_token(&self.name, "name")?;
        validate_token(&self.version, "version")
            .with_context(|| format!("package '{}'", self.name))?;
        if self.source_url.trim().is_empty() {
            bail!("package '{}' has an empty source_url", self.name);
        }
        if self.license.trim().is_empty() {
            bail!("package '{}' has an empty license", self.name);
        }

        let mut depends_on: Vec<String> = Vec::with_capacity(self.depends_on.len());
        for dep in self.depends_on {
            let dep = dep.trim().to_string();
            validate_token(&dep, "depends_on entry")
                .with_context(|| format!("package '{}'", self.name))?;
            if dep == self.name {
                bail!("package '{}' depends on itself", self.name);
            }
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }

        Ok(PackageSpec {
            source_url: self.source_url.replace("{version}", &self.version),
            name: self.name,
            version: self.version,
            architecture: config.arch.clone(),
            flavour: config.flavour.clone(),
            build_options: self.build_options,
            depends_on,
            license: self.license.trim().to_string(),
            strategy: self.strategy,
        })
    }
}

/// Parse a TOML recipe file body into specs, preserving declaration order.
pub fn parse_recipes(raw: &str, config: &BootstrapConfig) -> Result<Vec<PackageSpec>> {
    let parsed: RecipeFileToml = toml::from_str(raw).context("parsing recipe TOML")?;
    if parsed.package.is_empty() {
        bail!("recipe file declares no [[package]] entries");
    }
    parsed
        .package
        .into_iter()
        .map(|recipe| recipe.into_spec(config))
        .collect()
}

pub fn load_recipes(path: &Path, config: &BootstrapConfig) -> Result<Vec<PackageSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading recipe file '{}'", path.display()))?;
    parse_recipes(&raw, config).with_context(|| format!("loading recipes '{}'", path.display()))
}

fn validate_token(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{field} must not be empty");
    }
    if value.contains('/') || value.contains("..") || value.contains(char::is_whitespace) {
        bail!("{field} must be a safe filename segment, got '{value}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BootstrapConfig {
        BootstrapConfig::with_root(Path::new("/tmp/seiryo"))
    }

    #[test]
    fn parses_recipe_file_and_binds_identity() {
        let raw = r#"
[[package]]
name = "zlib"
version = "1.3.1"
source_url = "https://zlib.net/zlib-{version}.tar.gz"
license = "Zlib"
strategy = "prefix_configure"
depends_on = ["glibc", "glibc"]

[[package]]
name = "hello"
version = "2.12"
source_url = "https://ftpmirror.gnu.org/gnu/hello/hello-2.12.tar.gz"
license = "GPL-3.0-or-later"
build_options = ["--disable-nls"]
"#;
        let specs = parse_recipes(raw, &config()).unwrap();
        assert_eq!(specs.len(), 2);

        let zlib = &specs[0];
        assert_eq!(zlib.source_url, "https://zlib.net/zlib-1.3.1.tar.gz");
        assert_eq!(zlib.strategy, BuildStrategy::PrefixConfigure);
        assert_eq!(zlib.depends_on, vec!["glibc".to_string()]);
        assert_eq!(zlib.architecture, "x86_64");
        assert_eq!(zlib.flavour, "glibc-systemd");

        let hello = &specs[1];
        assert_eq!(hello.strategy, BuildStrategy::Autotools);
        assert_eq!(hello.build_options, vec!["--disable-nls".to_string()]);
        assert_eq!(hello.slug(), "hello-2.12");
    }

    #[test]
    fn rejects_unsafe_names_and_self_dependency() {
        let unsafe_name = r#"
[[package]]
name = "../evil"
version = "1"
source_url = "https://example.invalid/x.tar.gz"
license = "MIT"
"#;
        assert!(parse_recipes(unsafe_name, &config()).is_err());

        let self_dep = r#"
[[package]]
name = "loop"
version = "1"
source_url = "https://example.invalid/x.tar.gz"
license = "MIT"
depends_on = ["loop"]
"#;
        assert!(parse_recipes(self_dep, &config()).is_err());
    }

    #[test]
    fn rejects_empty_recipe_file() {
        assert!(parse_recipes("", &config()).is_err());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let raw = r#"
[[package]]
name = "x"
version = "1"
source_url = "https://example.invalid/x.tar.gz"
license = "MIT"
strategy = "cmake"
"#;
        assert!(parse_recipes(raw, &config()).is_err());
    }
}
