//! Engine error taxonomy.

use crate::config::ConfigError;
use crate::data::provider::SourceError;
use crate::domain::{Interval, TimeWindow};
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the data manager and its components.
///
/// Fetch-side variants always carry the symbol and the window that failed so
/// a multi-symbol caller can report them per symbol.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("source '{source_name}' unavailable for {symbol} {window}: {cause}")]
    UpstreamUnavailable {
        source_name: String,
        symbol: String,
        window: TimeWindow,
        #[source]
        cause: SourceError,
    },

    #[error("malformed response for {symbol} {window}: {reason}")]
    MalformedResponse {
        symbol: String,
        window: TimeWindow,
        reason: String,
    },

    #[error("cyclic dependency registering '{name}': {}", .path.join(" -> "))]
    CyclicDependency { name: String, path: Vec<String> },

    #[error("symbol '{0}' is already registered")]
    DuplicateName(String),

    #[error("no generated instrument named '{0}'")]
    UnknownInstrument(String),

    #[error("invalid instrument '{name}': {reason}")]
    InvalidInstrument { name: String, reason: String },

    #[error("interval mismatch for '{name}': expected {expected}, found {found}")]
    IntervalMismatch {
        name: String,
        expected: Interval,
        found: Interval,
    },

    #[error("feature '{calculator}' failed for {symbol}: {reason}")]
    FeatureComputeError {
        calculator: String,
        symbol: String,
        reason: String,
    },

    #[error("feature field '{field}' for {symbol} is already produced or reserved")]
    DuplicateFeatureField { symbol: String, field: String },

    #[error("no materialized data for symbol '{0}'")]
    UnknownSymbol(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("export error: {0}")]
    Export(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
