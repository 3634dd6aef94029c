use std::path::PathBuf;

use anyhow::{bail, Result};
use seiryo_bootstrap::preflight::check_host_tools;
use seiryo_bootstrap::recipe::{base::base_packages, load_recipes};
use seiryo_bootstrap::{BootstrapConfig, PackageOutcome, Pipeline, PipelineError};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  seiryo-bootstrap [--config <file>] [--recipes <file>]\n\nBuilds every package of the bootstrap set that is not yet in the output\nrepository. Re-run to resume after a failure.\n\nEnvironment:\n  SEIRYO_BOOTSTRAP_CONFIG  config file when --config is not given\n  SEIRYO_ROOT, SEIRYO_JOBS, SEIRYO_ARCH, SEIRYO_FLAVOUR, SEIRYO_TARGET\n  RUST_LOG                 log filter (default: info)"
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    recipes: Option<PathBuf>,
}

fn main() -> Result<()> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&raw)? else {
        println!("{}", usage());
        return Ok(());
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    run(&args)
}

/// `Ok(None)` means help was requested.
fn parse_args(raw: &[String]) -> Result<Option<Args>> {
    let mut args = Args::default();
    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--config" => args.config = Some(PathBuf::from(value_for(&mut iter, arg)?)),
            "--recipes" => args.recipes = Some(PathBuf::from(value_for(&mut iter, arg)?)),
            other => bail!("unexpected argument '{}'\n\n{}", other, usage()),
        }
    }
    Ok(Some(args))
}

fn value_for<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a str> {
    match iter.next() {
        Some(value) => Ok(value.as_str()),
        None => bail!("'{}' requires a value\n\n{}", flag, usage()),
    }
}

fn run(args: &Args) -> Result<()> {
    let config = BootstrapConfig::load(args.config.as_deref())?;
    check_host_tools(&config).map_err(|err| PipelineError::environment("host preflight", err))?;

    let specs = match &args.recipes {
        Some(path) => load_recipes(path, &config)?,
        None => base_packages(&config)?,
    };

    info!(
        arch = %config.arch,
        flavour = %config.flavour,
        target = %config.target_triple,
        output = %config.output_dir.display(),
        "starting bootstrap"
    );

    let pipeline = Pipeline::new(config, specs)?;
    let report = pipeline.run()?;

    for (id, outcome) in &report.packages {
        match outcome {
            PackageOutcome::Skipped => println!("  skipped  {id}"),
            PackageOutcome::Built(artifact) => {
                println!("  built    {id} -> {}", artifact.path.display())
            }
        }
    }
    println!(
        "{} built, {} already packaged",
        report.built().count(),
        report.skipped().count()
    );
    Ok(())
}
