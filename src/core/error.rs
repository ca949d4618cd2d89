use serde::{Deserialize, Serialize};
use std::fmt;

/// Which step of a resolution produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dispatch,
    Materialization,
    Extraction,
    Delegation,
    Cancellation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dispatch => "dispatch",
            Stage::Materialization => "materialization",
            Stage::Extraction => "extraction",
            Stage::Delegation => "delegation",
            Stage::Cancellation => "cancellation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("extractor {0} is already registered")]
    DuplicateName(String),
    #[error("invalid match pattern for {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Why a delegation chain was cut off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleKind {
    DepthExceeded { limit: usize },
    Revisited { extractor: String },
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleKind::DepthExceeded { limit } => {
                write!(f, "maximum delegation depth {} exceeded", limit)
            }
            CycleKind::Revisited { extractor } => {
                write!(f, "{} already visited this target", extractor)
            }
        }
    }
}

/// Typed failure of a resolution request.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("no extractor found for {0}")]
    NotFound(String),
    #[error("failed to load extractor {name}: {source}")]
    LoadError {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cyclic delegation to {target}: {kind}")]
    CyclicDelegation { target: String, kind: CycleKind },
    #[error("[{extractor}] {url}: {source}")]
    ExtractionFailed {
        extractor: String,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn stage(&self) -> Stage {
        match self {
            ResolveError::InvalidUrl { .. } | ResolveError::NotFound(_) => Stage::Dispatch,
            ResolveError::LoadError { .. } => Stage::Materialization,
            ResolveError::CyclicDelegation { .. } => Stage::Delegation,
            ResolveError::ExtractionFailed { .. } => Stage::Extraction,
            ResolveError::Cancelled => Stage::Cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolveError::Cancelled)
    }
}

/// Marker returned by collaborator code when it observed cancellation.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Fatal outcome of a format collection.
#[derive(Debug, thiserror::Error)]
#[error("format source {source_id} failed: {source}")]
pub struct CollectError {
    pub source_id: String,
    #[source]
    pub source: anyhow::Error,
}
