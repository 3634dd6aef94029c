//! Idempotent bootstrap pipeline for the Seiryo Linux toolchain.
//!
//! Builds a fixed, dependency-ordered set of packages (kernel headers, libc,
//! binutils, compiler, core userland) from upstream sources and packages
//! each one as a `.kpkg` into a flat output repository. Re-running the
//! pipeline resumes where the last run stopped and never rebuilds a package
//! whose artifact is already published.
//!
//! - **Source provider** - fetch and unpack upstream trees, once ([`source`])
//! - **Staging installer** - build into a private `DESTDIR` ([`build`])
//! - **Metadata composer** - `package.kdl` descriptors ([`descriptor`])
//! - **Package assembler** - archive and publish artifacts ([`artifact`])
//! - **Pipeline driver** - order, skip guard, fail-fast ([`pipeline`])
//!
//! # Architecture
//!
//! ```text
//! recipes ──> pipeline::order ──> for each package:
//!                                   state ledger / repository check
//!                                   ├── packaged     -> skip
//!                                   └── otherwise:
//!                                       source -> build -> descriptor -> assemble -> publish
//! ```

pub mod artifact;
pub mod build;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod recipe;
pub mod repo_index;
pub mod source;
pub mod state;

pub use config::BootstrapConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{PackageOutcome, Pipeline, RunReport};
pub use recipe::{BuildStrategy, PackageSpec};
