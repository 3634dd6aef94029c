//! Generic autotools build: out-of-tree configure, parallel make, DESTDIR install.

use anyhow::Result;
use tracing::info;

use super::WorkPaths;
use crate::config::BootstrapConfig;
use crate::process::Cmd;
use crate::recipe::PackageSpec;
use crate::source::SourceTree;

pub fn build(
    config: &BootstrapConfig,
    spec: &PackageSpec,
    source: &SourceTree,
    paths: &WorkPaths,
    build_triple: &str,
) -> Result<()> {
    let configure = source.path.join("configure");
    info!(pkg = %spec.name, build = build_triple, host = %config.target_triple, "configure");
    Cmd::new("sh")
        .arg(&configure)
        .args(configure_args(config, build_triple))
        .args(&spec.build_options)
        .current_dir(&paths.build_dir)
        .error_msg(format!("configure failed for '{}'", spec.slug()))
        .run()?;

    info!(pkg = %spec.name, jobs = config.jobs, "compile");
    Cmd::new(&config.make_program)
        .arg(format!("-j{}", config.jobs))
        .current_dir(&paths.build_dir)
        .error_msg(format!("compile failed for '{}'", spec.slug()))
        .run_interactive()?;

    info!(pkg = %spec.name, destdir = %paths.destdir.display(), "install");
    Cmd::new(&config.make_program)
        .arg(format!("DESTDIR={}", paths.destdir.display()))
        .arg("install")
        .current_dir(&paths.build_dir)
        .error_msg(format!("install failed for '{}'", spec.slug()))
        .run_interactive()?;

    Ok(())
}

/// The fixed cross-build identity passed ahead of the package's own options.
pub fn configure_args(config: &BootstrapConfig, build_triple: &str) -> Vec<String> {
    vec![
        format!("--prefix={}", config.prefix),
        format!("--build={build_triple}"),
        format!("--host={}", config.target_triple),
        format!("--target={}", config.target_triple),
    ]
}
