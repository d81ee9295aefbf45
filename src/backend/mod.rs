//! Backend abstraction
//!
//! The engine talks to its columnar store through [`LogBackend`], so the
//! planner and row pipeline never know which driver is underneath.
//! [`MemoryBackend`] is the in-process double used by tests and the demo
//! binary: it records every SQL string it receives and returns a canned
//! row set.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::dsl::Row;
use crate::{Result, SiftError};

#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Run one rendered SQL query and materialize its rows.
    async fn run_query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Canned-data backend. Not a SQL engine: it hands back the configured
/// rows regardless of the query text, which is exactly what push-down
/// tests need — they assert on the recorded SQL and feed the rows the
/// real backend would have produced.
#[derive(Default)]
pub struct MemoryBackend {
    rows: Vec<Row>,
    queries: Mutex<Vec<String>>,
    delay: Option<Duration>,
    fail_with: Option<String>,
}

impl MemoryBackend {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Delay every query, for cancellation tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every query with a backend error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Default::default()
        }
    }

    /// Every SQL string executed so far, oldest first.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LogBackend for MemoryBackend {
    async fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(sql.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.fail_with {
            return Err(SiftError::Backend(message.clone()));
        }
        Ok(self.rows.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Value;

    #[tokio::test]
    async fn test_memory_backend_records_queries() {
        let mut row = Row::new();
        row.set("hostname", Value::String("web-1".into()));
        let backend = MemoryBackend::new(vec![row]);
        let rows = backend.run_query("SELECT 1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(backend.queries(), vec!["SELECT 1".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_backend() {
        let backend = MemoryBackend::failing("connection refused");
        assert!(matches!(
            backend.run_query("SELECT 1").await,
            Err(SiftError::Backend(_))
        ));
    }
}
