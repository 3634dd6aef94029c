//! Preflight checks for a bootstrap run.
//!
//! Validates that the host has the tools every build strategy shells out to
//! before any package is fetched. This prevents a run dying halfway through
//! the package set on a missing `make`.
//!
//! # Example
//!
//! ```rust
//! use seiryo_bootstrap::preflight::{command_exists, check_required_tools};
//!
//! // Check a single command
//! if !command_exists("make") {
//!     println!("make not installed");
//! }
//!
//! // Check multiple tools
//! let tools = &[("sh", "a POSIX shell"), ("tar", "tar")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::config::BootstrapConfig;

/// Check if a command exists on the host system.
///
/// Accepts bare names (looked up in `PATH`) and explicit paths.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools every run needs regardless of configuration.
///
/// Each tuple is (command_name, package_name). `sh` runs configure scripts
/// and `config.guess`; `tar` unpacks xz and bzip2 sources.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("sh", "a POSIX shell"), ("tar", "tar")];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check [`REQUIRED_TOOLS`] plus the configured make program and external
/// archiver.
pub fn check_host_tools(config: &BootstrapConfig) -> Result<()> {
    let mut tools: Vec<(&str, &str)> = REQUIRED_TOOLS.to_vec();
    tools.push((config.make_program.as_str(), "make"));
    if let Some(program) = config.archiver_command.as_ref().and_then(|argv| argv.first()) {
        tools.push((program.as_str(), "the configured archiver"));
    }
    check_required_tools(&tools)
}
