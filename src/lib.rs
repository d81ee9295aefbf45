//! Sift Core
//!
//! The query engine behind the Sift log analytics platform. Users write
//! pipeline queries in the Sift DSL (`search status_code>=500 | stats count
//! by hostname | sort -count`); this crate parses them, pushes as much of
//! the pipeline as possible down to the columnar backend as a single SQL
//! query, and executes the remainder as an in-process row pipeline.

pub mod backend;
pub mod dsl;

use thiserror::Error;

/// Crate-wide error type.
///
/// Only the first three variants abort a query. Per-row typing problems
/// never surface here; they degrade to [`dsl::Value::Undefined`] inside the
/// row pipeline, because log data is messy by nature.
#[derive(Debug, Error)]
pub enum SiftError {
    /// Malformed query text: bad syntax, unknown command, invalid rex
    /// pattern. Position is a byte offset into the original query.
    #[error("parse error at position {position}: {message}")]
    Parse { message: String, position: usize },

    /// A query that parsed but references unknown fields or calls a
    /// function with the wrong arguments. Raised before any backend call.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backend rejected or failed the pushed-down query.
    #[error("backend error: {0}")]
    Backend(String),

    /// The caller's deadline elapsed or the query was cancelled while the
    /// backend call was in flight.
    #[error("query cancelled or timed out")]
    Timeout,
}

impl SiftError {
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        SiftError::Parse {
            message: message.into(),
            position,
        }
    }

    /// Machine-readable error kind, for API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            SiftError::Parse { .. } => "parse_error",
            SiftError::Validation(_) => "validation_error",
            SiftError::Backend(_) => "backend_error",
            SiftError::Timeout => "timeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, SiftError>;

pub use backend::{LogBackend, MemoryBackend};
pub use dsl::{
    CompiledQuery, QueryEngine, QueryOutput, Row, TimeRangeSpec, Value,
};
