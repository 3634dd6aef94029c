//! Failure classes of a bootstrap run.
//!
//! Every variant is fatal: the driver stops at the first one. The wrapped
//! `anyhow::Error` keeps the full context chain for the operator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Download or extraction of upstream sources failed.
    #[error("fetching sources for '{package}' failed")]
    Fetch {
        package: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configure, compile or install exited non-zero.
    #[error("building '{package}' failed")]
    Build {
        package: String,
        #[source]
        source: anyhow::Error,
    },

    /// Descriptor, archiver or publish step failed.
    #[error("assembling package '{package}' failed")]
    Assembly {
        package: String,
        #[source]
        source: anyhow::Error,
    },

    /// Host prerequisites missing or the output repository is unusable.
    #[error("environment check failed: {context}")]
    Environment {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// The recipe set itself is inconsistent.
    #[error("invalid recipe set: {0}")]
    Recipe(String),
}

impl PipelineError {
    pub fn fetch(package: &str, source: anyhow::Error) -> Self {
        Self::Fetch {
            package: package.to_string(),
            source,
        }
    }

    pub fn build(package: &str, source: anyhow::Error) -> Self {
        Self::Build {
            package: package.to_string(),
            source,
        }
    }

    pub fn assembly(package: &str, source: anyhow::Error) -> Self {
        Self::Assembly {
            package: package.to_string(),
            source,
        }
    }

    pub fn environment(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Environment {
            context: context.into(),
            source,
        }
    }

    /// Package the failure is attributed to, when there is one.
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::Fetch { package, .. }
            | Self::Build { package, .. }
            | Self::Assembly { package, .. } => Some(package),
            Self::Environment { .. } | Self::Recipe(_) => None,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
