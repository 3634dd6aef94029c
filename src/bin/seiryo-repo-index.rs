use std::path::PathBuf;

use anyhow::{bail, Result};
use seiryo_bootstrap::repo_index::{scan, DEFAULT_DB_NAME};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  seiryo-repo-index <repo_dir> [-o|--output <db>]\n\nWrites <db> (default: repo.db) and <db>.zst describing every .kpkg in <repo_dir>."
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (repo_dir, output) = match args.as_slice() {
        [help] if help == "-h" || help == "--help" => {
            println!("{}", usage());
            return Ok(());
        }
        [repo_dir] => (PathBuf::from(repo_dir), PathBuf::from(DEFAULT_DB_NAME)),
        [repo_dir, flag, output] if flag == "-o" || flag == "--output" => {
            (PathBuf::from(repo_dir), PathBuf::from(output))
        }
        _ => bail!(usage()),
    };

    if !repo_dir.is_dir() {
        bail!("'{}' is not a directory", repo_dir.display());
    }

    let (db, skipped) = scan(&repo_dir)?;
    let zst = db.write(&output)?;
    println!(
        "Generated {} and {} ({} packages, {} skipped)",
        output.display(),
        zst.display(),
        db.packages.len(),
        skipped.len()
    );
    Ok(())
}
