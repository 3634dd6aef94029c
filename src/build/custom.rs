//! Package-specific install procedures.
//!
//! Kernel headers are exported with `make headers` and copied directly into
//! the staging root. zlib ships a hand-written `configure` that only accepts
//! `--prefix` and reads the target from `CHOST`, and it builds in-tree, so
//! it runs inside a private copy of the source. That copy is still a full
//! configure, compile and `make install` into the staging root; nothing is
//! unpacked from an earlier staged tree.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::WorkPaths;
use crate::artifact::filesystem::copy_dir_recursive;
use crate::config::BootstrapConfig;
use crate::process::Cmd;
use crate::recipe::PackageSpec;
use crate::source::SourceTree;

/// Kernel `ARCH=` value for a distribution architecture.
pub fn kernel_arch(arch: &str) -> &str {
    match arch {
        "x86_64" | "i686" | "i586" | "i486" | "i386" => "x86",
        "aarch64" => "arm64",
        "riscv64" | "riscv32" => "riscv",
        "ppc64" | "ppc64le" | "powerpc" => "powerpc",
        "loongarch64" => "loongarch",
        other => other,
    }
}

pub fn install_kernel_headers(
    config: &BootstrapConfig,
    source: &SourceTree,
    paths: &WorkPaths,
) -> Result<()> {
    let karch = kernel_arch(&config.arch);
    info!(pkg = %source.name, arch = karch, "exporting kernel headers");
    Cmd::new(&config.make_program)
        .arg("-C")
        .arg(&source.path)
        .arg(format!("O={}", paths.build_dir.display()))
        .arg(format!("ARCH={karch}"))
        .arg(format!("-j{}", config.jobs))
        .arg("headers")
        .current_dir(&paths.build_dir)
        .error_msg(format!("make headers failed for '{}'", source.name))
        .run_interactive()?;

    let exported = paths.build_dir.join("usr/include");
    if !exported.is_dir() {
        bail!(
            "make headers finished but '{}' does not exist",
            exported.display()
        );
    }

    let dest = paths
        .destdir
        .join(config.prefix.trim_start_matches('/'))
        .join("include");
    let copied = copy_headers(&exported, &dest)?;
    info!(pkg = %source.name, headers = copied, dest = %dest.display(), "headers installed");
    Ok(())
}

/// Copy `*.h` files, keeping the directory layout. Build bookkeeping files
/// (`.install`, `..install.cmd`) are dropped.
fn copy_headers(src: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0usize;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking '{}'", src.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("h") {
            debug!(path = %path.display(), "skipping non-header");
            continue;
        }
        let rel = path.strip_prefix(src)?;
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(path, &target).with_context(|| {
            format!("copying header '{}' -> '{}'", path.display(), target.display())
        })?;
        copied += 1;
    }
    if copied == 0 {
        bail!("no headers found under '{}'", src.display());
    }
    Ok(copied)
}

pub fn build_prefix_configure(
    config: &BootstrapConfig,
    spec: &PackageSpec,
    source: &SourceTree,
    paths: &WorkPaths,
) -> Result<()> {
    let tree = paths.build_dir.join("src");
    copy_dir_recursive(&source.path, &tree)?;

    info!(pkg = %spec.name, chost = %config.target_triple, "configure");
    Cmd::new("sh")
        .arg("./configure")
        .arg(format!("--prefix={}", config.prefix))
        .args(&spec.build_options)
        .env("CHOST", &config.target_triple)
        .current_dir(&tree)
        .error_msg(format!("configure failed for '{}'", spec.slug()))
        .run()?;

    info!(pkg = %spec.name, jobs = config.jobs, "compile");
    Cmd::new(&config.make_program)
        .arg(format!("-j{}", config.jobs))
        .current_dir(&tree)
        .error_msg(format!("compile failed for '{}'", spec.slug()))
        .run_interactive()?;

    info!(pkg = %spec.name, destdir = %paths.destdir.display(), "install");
    Cmd::new(&config.make_program)
        .arg(format!("DESTDIR={}", paths.destdir.display()))
        .arg("install")
        .current_dir(&tree)
        .error_msg(format!("install failed for '{}'", spec.slug()))
        .run_interactive()?;

    Ok(())
}
