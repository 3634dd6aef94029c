//! Package descriptor (`package.kdl`) composition.
//!
//! ```kdl
//! package "zlib" version="1.3.1" arch="x86_64" flavour="glibc-systemd" {
//!     depends "glibc"
//!     license "Zlib"
//! }
//! ```
//!
//! Rendering is done here so the layout stays byte-stable across runs;
//! parsing goes through the `kdl` crate.

use anyhow::{anyhow, bail, Context, Result};
use kdl::KdlDocument;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::recipe::PackageSpec;

pub const DESCRIPTOR_FILENAME: &str = "package.kdl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub flavour: String,
    pub depends: Vec<String>,
    pub license: String,
}

/// Derive the descriptor from a [`PackageSpec`]. Pure.
pub fn describe(spec: &PackageSpec) -> PackageDescriptor {
    PackageDescriptor {
        name: spec.name.clone(),
        version: spec.version.clone(),
        arch: spec.architecture.clone(),
        flavour: spec.flavour.clone(),
        depends: spec.depends_on.clone(),
        license: spec.license.clone(),
    }
}

impl PackageDescriptor {
    pub fn to_kdl(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "package {} version={} arch={} flavour={} {{",
            quote(&self.name),
            quote(&self.version),
            quote(&self.arch),
            quote(&self.flavour)
        );
        for dep in &self.depends {
            let _ = writeln!(out, "    depends {}", quote(dep));
        }
        let _ = writeln!(out, "    license {}", quote(&self.license));
        out.push_str("}\n");
        out
    }

    /// Write `package.kdl` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(DESCRIPTOR_FILENAME);
        fs::write(&path, self.to_kdl())
            .with_context(|| format!("writing package descriptor '{}'", path.display()))?;
        Ok(path)
    }

    pub fn from_kdl(input: &str) -> Result<Self> {
        let doc: KdlDocument = input
            .parse()
            .map_err(|err| anyhow!("invalid package descriptor: {err}"))?;
        let node = doc
            .nodes()
            .iter()
            .find(|node| node.name().value() == "package")
            .ok_or_else(|| anyhow!("missing 'package' node"))?;

        let mut name = None;
        let mut props = BTreeMap::new();
        for entry in node.entries() {
            let value = entry
                .value()
                .as_string()
                .ok_or_else(|| anyhow!("non-string value in 'package' node"))?;
            match entry.name() {
                Some(key) => {
                    props.insert(key.value().to_string(), value.to_string());
                }
                None if name.is_none() => name = Some(value.to_string()),
                None => {}
            }
        }
        let name = name.ok_or_else(|| anyhow!("package name not provided as first argument"))?;
        let mut take = |key: &str| {
            props
                .remove(key)
                .ok_or_else(|| anyhow!("missing required property: {key}"))
        };
        let version = take("version")?;
        let arch = take("arch")?;
        let flavour = take("flavour")?;

        let mut depends = Vec::new();
        let mut license = None;
        if let Some(children) = node.children() {
            for child in children.nodes() {
                let Some(value) = child
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_string())
                else {
                    continue;
                };
                match child.name().value() {
                    "depends" => depends.push(value.to_string()),
                    "license" => license = Some(value.to_string()),
                    _ => {}
                }
            }
        }
        let Some(license) = license else {
            bail!("package '{name}' declares no license");
        };

        Ok(Self {
            name,
            version,
            arch,
            flavour,
            depends,
            license,
        })
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use crate::recipe::{BuildStrategy, PackageRecipe};

    fn demo_spec(depends: &[&str], license: &str) -> PackageSpec {
        let mut config = BootstrapConfig::with_root(Path::new("/tmp/seiryo"));
        config.arch = "aarch64".to_string();
        config.flavour = "musl-openrc".to_string();
        PackageRecipe {
            name: "demo".to_string(),
            version: "1.0".to_string(),
            source_url: "https://example.invalid/demo-1.0.tar.gz".to_string(),
            license: license.to_string(),
            strategy: BuildStrategy::Autotools,
            build_options: vec![],
            depends_on: depends.iter().map(|d| d.to_string()).collect(),
        }
        .into_spec(&config)
        .unwrap()
    }

    #[test]
    fn renders_exact_layout() {
        let descriptor = describe(&demo_spec(&["base"], "MIT"));
        assert_eq!(
            descriptor.to_kdl(),
            "package \"demo\" version=\"1.0\" arch=\"aarch64\" flavour=\"musl-openrc\" {\n    depends \"base\"\n    license \"MIT\"\n}\n"
        );
    }

    #[test]
    fn descriptor_matches_spec_exactly() {
        let spec = demo_spec(&["glibc", "zlib"], "GPL-3.0-or-later WITH GCC-exception-3.1");
        let parsed = PackageDescriptor::from_kdl(&describe(&spec).to_kdl()).unwrap();
        assert_eq!(parsed.name, "demo");
        assert_eq!(parsed.arch, "aarch64");
        assert_eq!(parsed.flavour, "musl-openrc");
        assert_eq!(parsed.depends, vec!["glibc".to_string(), "zlib".to_string()]);
        assert_eq!(parsed.license, spec.license);
    }

    #[test]
    fn no_dependencies_renders_license_only() {
        let text = describe(&demo_spec(&[], "Zlib")).to_kdl();
        assert!(!text.contains("depends"));
        let parsed = PackageDescriptor::from_kdl(&text).unwrap();
        assert!(parsed.depends.is_empty());
    }

    #[test]
    fn quoting_survives_parse() {
        let mut descriptor = describe(&demo_spec(&[], "MIT"));
        descriptor.license = "Custom \"quoted\" \\ license".to_string();
        let parsed = PackageDescriptor::from_kdl(&descriptor.to_kdl()).unwrap();
        assert_eq!(parsed.license, descriptor.license);
    }

    #[test]
    fn missing_fields_are_errors() {
        assert!(PackageDescriptor::from_kdl("other \"x\"\n").is_err());
        assert!(PackageDescriptor::from_kdl(
            "package \"x\" version=\"1\" arch=\"x86_64\" {\n    license \"MIT\"\n}\n"
        )
        .is_err());
        assert!(PackageDescriptor::from_kdl(
            "package \"x\" version=\"1\" arch=\"x86_64\" flavour=\"f\"\n"
        )
        .is_err());
    }

    #[test]
    fn write_places_file_in_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = describe(&demo_spec(&["base"], "MIT")).write(temp.path()).unwrap();
        assert_eq!(path, temp.path().join(DESCRIPTOR_FILENAME));
        assert!(fs::read_to_string(path).unwrap().contains("depends \"base\""));
    }
}
