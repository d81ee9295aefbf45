//! Canonical field schema
//!
//! Every log source adapter normalizes its payloads into this row schema
//! before ingestion, so the DSL engine can validate field references at
//! compile time. The table is built once at process start and never
//! mutated, so concurrent queries read it without locking.

use std::sync::OnceLock;

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Datetime,
    Json,
}

/// One canonical field with its accepted aliases.
#[derive(Debug, Clone)]
pub struct FieldSchemaEntry {
    pub canonical: &'static str,
    pub field_type: FieldType,
    pub aliases: &'static [&'static str],
}

/// The static schema table. Lookup is alias-aware and case-sensitive on
/// canonical names.
pub struct FieldSchema {
    entries: Vec<FieldSchemaEntry>,
}

impl FieldSchema {
    fn new() -> Self {
        use FieldType::*;
        let entries = vec![
            FieldSchemaEntry { canonical: "timestamp", field_type: Datetime, aliases: &["_time", "time"] },
            FieldSchemaEntry { canonical: "message", field_type: String, aliases: &["msg", "_raw"] },
            FieldSchemaEntry { canonical: "severity", field_type: Number, aliases: &["level"] },
            FieldSchemaEntry { canonical: "hostname", field_type: String, aliases: &["host"] },
            FieldSchemaEntry { canonical: "app_name", field_type: String, aliases: &["app", "program"] },
            FieldSchemaEntry { canonical: "source_type", field_type: String, aliases: &["sourcetype"] },
            FieldSchemaEntry { canonical: "bytes", field_type: Number, aliases: &["size"] },
            FieldSchemaEntry { canonical: "duration_ms", field_type: Number, aliases: &["duration"] },
            FieldSchemaEntry { canonical: "status_code", field_type: Number, aliases: &["status"] },
            FieldSchemaEntry { canonical: "client_ip", field_type: String, aliases: &["ip", "src_ip"] },
            FieldSchemaEntry { canonical: "user_agent", field_type: String, aliases: &["agent"] },
            FieldSchemaEntry { canonical: "trace_id", field_type: String, aliases: &["trace"] },
            FieldSchemaEntry { canonical: "attributes", field_type: Json, aliases: &["fields"] },
        ];
        Self { entries }
    }

    /// Resolve a user-written name to its canonical entry, following
    /// aliases (`host` → `hostname`).
    pub fn resolve(&self, name: &str) -> Option<&FieldSchemaEntry> {
        self.entries
            .iter()
            .find(|e| e.canonical == name || e.aliases.contains(&name))
    }

    /// Canonical name for a user-written field, or None if unknown.
    pub fn canonical_name(&self, name: &str) -> Option<&'static str> {
        self.resolve(name).map(|e| e.canonical)
    }

    pub fn field_type(&self, canonical: &str) -> Option<FieldType> {
        self.resolve(canonical).map(|e| e.field_type)
    }

    /// All canonical column names, in table order.
    pub fn column_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.canonical).collect()
    }
}

static SCHEMA: OnceLock<FieldSchema> = OnceLock::new();

/// Process-wide schema instance.
pub fn schema() -> &'static FieldSchema {
    SCHEMA.get_or_init(FieldSchema::new)
}

/// Backing table the push-down query reads from.
pub const LOGS_TABLE: &str = "logs";

/// Event timestamp column, bound by every push-down time range.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Default target of free-text terms and `rex`.
pub const MESSAGE_COLUMN: &str = "message";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolution() {
        assert_eq!(schema().canonical_name("host"), Some("hostname"));
        assert_eq!(schema().canonical_name("hostname"), Some("hostname"));
        assert_eq!(schema().canonical_name("_time"), Some("timestamp"));
        assert_eq!(schema().canonical_name("nope"), None);
    }

    #[test]
    fn test_case_sensitive_canonical() {
        assert_eq!(schema().canonical_name("Hostname"), None);
    }

    #[test]
    fn test_field_types() {
        assert_eq!(schema().field_type("bytes"), Some(FieldType::Number));
        assert_eq!(schema().field_type("message"), Some(FieldType::String));
        assert_eq!(schema().field_type("timestamp"), Some(FieldType::Datetime));
    }
}
