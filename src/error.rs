use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("gene set is empty")]
    EmptyGeneSet,

    #[error("comparison label must not be empty")]
    EmptyComparisonLabel,

    #[error("confidence threshold {0} is outside the accepted range 150..=1000")]
    InvalidThreshold(u32),

    #[error("invalid network type: {0}")]
    InvalidNetworkType(String),

    #[error("invalid identifier format: {0}")]
    InvalidIdFormat(String),

    #[error("invalid species taxon id: {0}")]
    InvalidSpecies(String),

    #[error("invalid expression table: {0}")]
    InvalidExpressionTable(String),

    #[error("at least 2 resolved genes are required to build a network, got {resolved}")]
    TooFewResolvedGenes { resolved: usize },

    #[error("identifier resolution failed for all {total} genes: {reason}")]
    ResolutionFailed { total: usize, reason: String },

    #[error("identifier request failed: {0}")]
    ResolverHttp(String),

    #[error("identifier service returned status {status}: {message}")]
    ResolverStatus { status: u16, message: String },

    #[error("malformed identifier response at line {line}: {reason}")]
    ResolverParse { line: usize, reason: String },

    #[error("interaction request failed: {0}")]
    InteractionHttp(String),

    #[error("interaction service returned status {status}: {message}")]
    InteractionStatus { status: u16, message: String },

    #[error("malformed interaction response at line {line}: {reason}")]
    InteractionParse { line: usize, reason: String },

    #[error("interaction service returned an empty response")]
    EmptyInteractionResponse,

    #[error("no chunk of the oversized gene set produced a network: {0}")]
    NoUsableChunk(String),

    #[error("network store error: {0}")]
    Store(String),

    #[error("persisted counts diverge from the built graph: {detail}")]
    CountMismatch { detail: String },

    #[error("network not found: {0}")]
    NetworkNotFound(i64),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Coarse error classes used at the orchestration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Resolution,
    Build,
    Persistence,
    NotFound,
    Config,
}

impl KiraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KiraError::EmptyGeneSet
            | KiraError::EmptyComparisonLabel
            | KiraError::InvalidThreshold(_)
            | KiraError::InvalidNetworkType(_)
            | KiraError::InvalidIdFormat(_)
            | KiraError::InvalidSpecies(_)
            | KiraError::InvalidExpressionTable(_)
            | KiraError::TooFewResolvedGenes { .. } => ErrorKind::Validation,
            KiraError::ResolutionFailed { .. }
            | KiraError::ResolverHttp(_)
            | KiraError::ResolverStatus { .. }
            | KiraError::ResolverParse { .. } => ErrorKind::Resolution,
            KiraError::InteractionHttp(_)
            | KiraError::InteractionStatus { .. }
            | KiraError::InteractionParse { .. }
            | KiraError::EmptyInteractionResponse
            | KiraError::NoUsableChunk(_) => ErrorKind::Build,
            KiraError::Store(_) | KiraError::CountMismatch { .. } => ErrorKind::Persistence,
            KiraError::NetworkNotFound(_) => ErrorKind::NotFound,
            KiraError::ConfigRead(_) | KiraError::ConfigParse(_) | KiraError::Filesystem(_) => {
                ErrorKind::Config
            }
        }
    }
}

impl From<rusqlite::Error> for KiraError {
    fn from(err: rusqlite::Error) -> Self {
        KiraError::Store(err.to_string())
    }
}
