//! The Sift query DSL
//!
//! A query is a pipeline of stages separated by `|`. The engine compiles
//! the longest possible prefix into one SQL query against the backend and
//! runs the rest as an in-process row pipeline:
//!
//! ```text
//! search status_code>=500 | stats count by hostname | sort -count
//!   └─ lexer/parser ─ expr compiler ─ planner ─┬─ SQL push-down
//!                                              └─ residual row pipeline
//! ```

pub mod ast;
pub mod expr;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod schema;
pub mod sql;
pub mod time;
pub mod value;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use ast::CompiledQuery;
pub use time::TimeRangeSpec;
pub use value::{Row, Value};

use crate::backend::LogBackend;
use crate::dsl::schema::TIMESTAMP_COLUMN;
use crate::{Result, SiftError};

/// A finished query: display-ready rows, the SQL that was pushed down,
/// and wall-clock timing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub sql: String,
    pub execution_time_ms: u64,
}

/// The engine front door: parse, plan, push down, run the residual
/// pipeline, assemble.
pub struct QueryEngine {
    backend: Arc<dyn LogBackend>,
}

impl QueryEngine {
    pub fn new(backend: Arc<dyn LogBackend>) -> Self {
        Self { backend }
    }

    /// Compile a query without executing it. Surfaces the same parse and
    /// validation errors as [`execute`](Self::execute).
    pub fn compile(&self, query: &str, range: &TimeRangeSpec) -> Result<CompiledQuery> {
        let pipeline = parser::parse(query)?;
        let resolved = range.resolve()?;
        planner::plan(&pipeline, resolved)
    }

    pub async fn execute(
        &self,
        query: &str,
        range: &TimeRangeSpec,
        cancel: CancellationToken,
    ) -> Result<QueryOutput> {
        let started = Instant::now();

        let pipeline = parser::parse(query)?;
        let resolved = range.resolve()?;
        let compiled = planner::plan(&pipeline, resolved)?;
        debug!(sql = %compiled.sql, residual = compiled.residual.len(), "compiled query");

        let fetched = tokio::select! {
            rows = self.backend.run_query(&compiled.sql) => rows?,
            _ = cancel.cancelled() => return Err(SiftError::Timeout),
        };
        debug!(rows = fetched.len(), "backend returned");

        // Renames apply after everything else: stages between a rename
        // and the end still address fields by canonical name
        let (renames, residual): (Vec<_>, Vec<_>) = compiled
            .residual
            .iter()
            .cloned()
            .partition(|s| matches!(s, ast::Stage::Rename { .. }));
        let rows = pipeline::execute(&residual, fetched, &cancel)?;
        let rows = pipeline::execute(&renames, rows, &cancel)?;
        let rows = assemble(rows);

        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            rows = rows.len(),
            elapsed_ms = execution_time_ms,
            "query finished"
        );
        Ok(QueryOutput {
            rows,
            sql: compiled.sql,
            execution_time_ms,
        })
    }
}

const SEVERITY_LABELS: [&str; 8] = [
    "emergency",
    "alert",
    "critical",
    "error",
    "warning",
    "notice",
    "info",
    "debug",
];

/// Final display pass: epoch-millis timestamps become RFC 3339 and
/// numeric syslog severities become their labels. Renames have already
/// run as the last residual stage, so this only touches canonical names.
fn assemble(mut rows: Vec<Row>) -> Vec<Row> {
    for row in rows.iter_mut() {
        if let Some(Value::Int(ts)) = row.get(TIMESTAMP_COLUMN).cloned() {
            row.set(TIMESTAMP_COLUMN, Value::String(time::format_timestamp(ts)));
        }
        if let Some(Value::Int(sev)) = row.get("severity").cloned() {
            if (0..=7).contains(&sev) {
                row.set(
                    "severity",
                    Value::String(SEVERITY_LABELS[sev as usize].to_string()),
                );
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_formats_display_fields() {
        let mut row = Row::new();
        row.set(TIMESTAMP_COLUMN, Value::Int(1_700_000_000_000));
        row.set("severity", Value::Int(3));
        let out = assemble(vec![row]);
        assert_eq!(out[0].get_or_null("severity"), Value::String("error".into()));
        match out[0].get_or_null(TIMESTAMP_COLUMN) {
            Value::String(s) => assert!(s.starts_with("2023-11-14T")),
            other => panic!("expected formatted timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_assemble_leaves_out_of_range_severity() {
        let mut row = Row::new();
        row.set("severity", Value::Int(42));
        let out = assemble(vec![row]);
        assert_eq!(out[0].get_or_null("severity"), Value::Int(42));
    }
}
