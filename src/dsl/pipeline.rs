//! In-process row pipeline
//!
//! Executes the residual stages the planner could not push down, in their
//! original order, over the rows the backend returned. Each stage is a
//! Vec<Row> -> Vec<Row> transform; per-row typing problems degrade to
//! [`Value::Undefined`] rather than aborting the query.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dsl::ast::{AggFunc, AggSpec, FieldMode, SortKey, Span, Stage};
use crate::dsl::expr::{eval_expr, eval_predicate};
use crate::dsl::schema::TIMESTAMP_COLUMN;
use crate::dsl::time::truncate_to_span;
use crate::dsl::value::{Row, Value};
use crate::{Result, SiftError};

// How often row loops poll the cancellation token.
const CANCEL_CHECK_INTERVAL: usize = 1024;

pub fn execute(stages: &[Stage], mut rows: Vec<Row>, cancel: &CancellationToken) -> Result<Vec<Row>> {
    for stage in stages {
        if cancel.is_cancelled() {
            return Err(SiftError::Timeout);
        }
        let before = rows.len();
        rows = run_stage(stage, rows, cancel)?;
        debug!(stage = stage.name(), rows_in = before, rows_out = rows.len(), "ran stage");
    }
    Ok(rows)
}

fn check_cancel(i: usize, cancel: &CancellationToken) -> Result<()> {
    if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
        return Err(SiftError::Timeout);
    }
    Ok(())
}

fn run_stage(stage: &Stage, rows: Vec<Row>, cancel: &CancellationToken) -> Result<Vec<Row>> {
    match stage {
        Stage::Search { predicate } | Stage::Where { predicate } => {
            let mut out = Vec::with_capacity(rows.len());
            for (i, row) in rows.into_iter().enumerate() {
                check_cancel(i, cancel)?;
                if eval_predicate(predicate, &row) {
                    out.push(row);
                }
            }
            Ok(out)
        }
        Stage::Eval { assignments } => {
            let mut rows = rows;
            for (i, row) in rows.iter_mut().enumerate() {
                check_cancel(i, cancel)?;
                for (name, expr) in assignments {
                    let value = eval_expr(expr, row);
                    row.set(name, value);
                }
            }
            Ok(rows)
        }
        Stage::Rex { field, pattern } => run_rex(field, pattern, rows, cancel),
        Stage::Dedup { fields } => {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for (i, row) in rows.into_iter().enumerate() {
                check_cancel(i, cancel)?;
                let key = composite_key(&row, fields);
                // First occurrence wins
                if seen.insert(key) {
                    out.push(row);
                }
            }
            Ok(out)
        }
        Stage::Sort { keys } => {
            let mut rows = rows;
            sort_rows(&mut rows, keys);
            Ok(rows)
        }
        Stage::Limit { n } | Stage::Head { n } => {
            let mut rows = rows;
            rows.truncate(*n);
            Ok(rows)
        }
        Stage::Tail { n } => {
            let skip = rows.len().saturating_sub(*n);
            Ok(rows.into_iter().skip(skip).collect())
        }
        Stage::Table { fields } => Ok(rows.into_iter().map(|r| r.project(fields)).collect()),
        Stage::Fields { mode, fields } => match mode {
            FieldMode::Include => Ok(rows.into_iter().map(|r| r.project(fields)).collect()),
            FieldMode::Exclude => {
                let mut rows = rows;
                for row in rows.iter_mut() {
                    for field in fields {
                        row.remove(field);
                    }
                }
                Ok(rows)
            }
        },
        Stage::Rename { pairs } => {
            let mut rows = rows;
            for row in rows.iter_mut() {
                for (from, to) in pairs {
                    row.rename(from, to);
                }
            }
            Ok(rows)
        }
        Stage::Top { n, field } => Ok(frequency_rank(rows, field, *n, true)),
        Stage::Rare { n, field } => Ok(frequency_rank(rows, field, *n, false)),
        Stage::Bin { span, field } => {
            let mut rows = rows;
            for (i, row) in rows.iter_mut().enumerate() {
                check_cancel(i, cancel)?;
                let binned = match (span, row.get_or_null(field)) {
                    (Span::Time(ms), v) => v
                        .as_i64()
                        .map(|ts| Value::Int(truncate_to_span(ts, *ms)))
                        .unwrap_or(Value::Undefined),
                    (Span::Numeric(w), v) => v
                        .as_f64()
                        .map(|x| Value::from_f64((x / w).floor() * w))
                        .unwrap_or(Value::Undefined),
                };
                row.set(field, binned);
            }
            Ok(rows)
        }
        Stage::Stats { aggs, group_by } => run_stats(aggs, group_by, rows, cancel),
        Stage::Timechart { span, aggs, split_by } => {
            run_timechart(span, aggs, split_by.as_deref(), rows, cancel)
        }
    }
}

fn composite_key(row: &Row, fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| row.get_or_null(f).key_repr())
        .collect::<Vec<_>>()
        .join("\u{1}")
}

/// Multi-key stable sort; ties keep input order, so a sort after stats
/// preserves first-seen group order among equals.
fn sort_rows(rows: &mut [Row], keys: &[SortKey]) {
    rows.sort_by(|a, b| {
        for key in keys {
            let av = a.get_or_null(&key.field);
            let bv = b.get_or_null(&key.field);
            let ord = av.sort_cmp(&bv);
            let ord = if key.descending { ord.reverse() } else { ord };
            if !ord.is_eq() {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn run_rex(field: &str, pattern: &str, rows: Vec<Row>, cancel: &CancellationToken) -> Result<Vec<Row>> {
    // Validated at parse time; a failure here means the plan was built by
    // hand
    let re = Regex::new(pattern)
        .map_err(|e| SiftError::Validation(format!("invalid rex pattern: {}", e)))?;
    let names: Vec<&str> = re.capture_names().flatten().collect();
    let mut rows = rows;
    for (i, row) in rows.iter_mut().enumerate() {
        check_cancel(i, cancel)?;
        let text = match row.get_or_null(field) {
            Value::String(s) => s,
            Value::Null | Value::Undefined => continue,
            other => other.to_string(),
        };
        // Rows that do not match pass through unchanged
        if let Some(caps) = re.captures(&text) {
            for name in &names {
                if let Some(m) = caps.name(name) {
                    row.set(name, Value::String(m.as_str().to_string()));
                }
            }
        }
    }
    Ok(rows)
}

/// `top`/`rare`: frequency table over one field. Ties keep first-seen
/// order (stable sort over insertion-ordered counts).
fn frequency_rank(rows: Vec<Row>, field: &str, n: usize, most_common: bool) -> Vec<Row> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, (Value, usize)> = HashMap::new();
    for row in &rows {
        let value = row.get_or_null(field);
        if value.is_null_like() {
            continue;
        }
        let key = value.key_repr();
        match counts.get_mut(&key) {
            Some((_, c)) => *c += 1,
            None => {
                order.push(key.clone());
                counts.insert(key, (value, 1));
            }
        }
    }
    let mut entries: Vec<(Value, usize)> = order
        .into_iter()
        .filter_map(|k| counts.remove(&k))
        .collect();
    if most_common {
        entries.sort_by(|a, b| b.1.cmp(&a.1));
    } else {
        entries.sort_by(|a, b| a.1.cmp(&b.1));
    }
    entries
        .into_iter()
        .take(n)
        .map(|(value, count)| {
            let mut row = Row::new();
            row.set(field, value);
            row.set("count", Value::Int(count as i64));
            row
        })
        .collect()
}

struct Group {
    key_values: Vec<Value>,
    rows: Vec<Row>,
}

/// Group rows by a key extractor, preserving first-seen group order.
fn group_rows(
    rows: Vec<Row>,
    key_of: impl Fn(&Row) -> Vec<Value>,
    cancel: &CancellationToken,
) -> Result<Vec<Group>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    for (i, row) in rows.into_iter().enumerate() {
        check_cancel(i, cancel)?;
        let key_values = key_of(&row);
        let key = key_values
            .iter()
            .map(|v| v.key_repr())
            .collect::<Vec<_>>()
            .join("\u{1}");
        match index.get(&key) {
            Some(&idx) => groups[idx].rows.push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(Group { key_values, rows: vec![row] });
            }
        }
    }
    Ok(groups)
}

fn run_stats(
    aggs: &[AggSpec],
    group_by: &[String],
    rows: Vec<Row>,
    cancel: &CancellationToken,
) -> Result<Vec<Row>> {
    let group_fields = group_by.to_vec();
    let groups = group_rows(
        rows,
        |row| group_fields.iter().map(|f| row.get_or_null(f)).collect(),
        cancel,
    )?;
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let mut row = Row::new();
        for (field, value) in group_by.iter().zip(group.key_values) {
            row.set(field, value);
        }
        for spec in aggs {
            row.set(&spec.alias, agg_value(spec, &group.rows));
        }
        out.push(row);
    }
    Ok(out)
}

fn run_timechart(
    span: &Span,
    aggs: &[AggSpec],
    split_by: Option<&str>,
    rows: Vec<Row>,
    cancel: &CancellationToken,
) -> Result<Vec<Row>> {
    let span_ms = match span {
        Span::Time(ms) => *ms,
        Span::Numeric(w) => *w as i64,
    };
    let split = split_by.map(|s| s.to_string());
    let groups = group_rows(
        rows,
        |row| {
            let bucket = row
                .get_or_null(TIMESTAMP_COLUMN)
                .as_i64()
                .map(|ts| Value::Int(truncate_to_span(ts, span_ms)))
                .unwrap_or(Value::Undefined);
            let mut key = vec![bucket];
            if let Some(s) = &split {
                key.push(row.get_or_null(s));
            }
            key
        },
        cancel,
    )?;
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let mut row = Row::new();
        let mut key_values = group.key_values.into_iter();
        if let Some(bucket) = key_values.next() {
            row.set(TIMESTAMP_COLUMN, bucket);
        }
        if let Some(s) = &split {
            if let Some(v) = key_values.next() {
                row.set(s, v);
            }
        }
        for spec in aggs {
            row.set(&spec.alias, agg_value(spec, &group.rows));
        }
        out.push(row);
    }
    // Bucket order ascending; within a bucket, split values keep
    // first-seen order
    out.sort_by(|a, b| {
        a.get_or_null(TIMESTAMP_COLUMN)
            .sort_cmp(&b.get_or_null(TIMESTAMP_COLUMN))
    });
    Ok(out)
}

/// One aggregate over a group's rows. Null and undefined cells never
/// participate; an aggregate with no usable input is null.
fn agg_value(spec: &AggSpec, rows: &[Row]) -> Value {
    let field = spec.field.as_deref();
    let values = || -> Vec<Value> {
        let f = match field {
            Some(f) => f,
            None => return Vec::new(),
        };
        rows.iter()
            .map(|r| r.get_or_null(f))
            .filter(|v| !v.is_null_like())
            .collect()
    };
    let numbers = || -> Vec<f64> {
        values().iter().filter_map(|v| v.as_f64()).collect()
    };

    match spec.func {
        AggFunc::Count => match field {
            None => Value::Int(rows.len() as i64),
            Some(_) => Value::Int(values().len() as i64),
        },
        AggFunc::DistinctCount => {
            let mut seen = HashSet::new();
            Value::Int(values().iter().filter(|v| seen.insert(v.key_repr())).count() as i64)
        }
        AggFunc::Sum => {
            let ns = numbers();
            if ns.is_empty() {
                Value::Null
            } else {
                Value::from_f64(ns.iter().sum())
            }
        }
        AggFunc::Avg => {
            let ns = numbers();
            if ns.is_empty() {
                Value::Null
            } else {
                Value::from_f64(ns.iter().sum::<f64>() / ns.len() as f64)
            }
        }
        AggFunc::Min => numbers()
            .into_iter()
            .fold(None::<f64>, |acc, x| Some(acc.map_or(x, |a| a.min(x))))
            .map(Value::from_f64)
            .unwrap_or(Value::Null),
        AggFunc::Max => numbers()
            .into_iter()
            .fold(None::<f64>, |acc, x| Some(acc.map_or(x, |a| a.max(x))))
            .map(Value::from_f64)
            .unwrap_or(Value::Null),
        AggFunc::Percentile(p) => {
            let mut ns = numbers();
            if ns.is_empty() {
                return Value::Null;
            }
            ns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            // Nearest-rank
            let rank = ((p * ns.len() as f64).ceil() as usize).max(1) - 1;
            Value::from_f64(ns[rank.min(ns.len() - 1)])
        }
        AggFunc::Mode => {
            let mut order: Vec<String> = Vec::new();
            let mut counts: HashMap<String, (Value, usize)> = HashMap::new();
            for v in values() {
                let key = v.key_repr();
                match counts.get_mut(&key) {
                    Some((_, c)) => *c += 1,
                    None => {
                        order.push(key.clone());
                        counts.insert(key, (v, 1));
                    }
                }
            }
            // Ties go to the first-seen value
            let mut best: Option<(Value, usize)> = None;
            for key in order {
                if let Some((v, c)) = counts.remove(&key) {
                    if best.as_ref().map_or(true, |(_, bc)| c > *bc) {
                        best = Some((v, c));
                    }
                }
            }
            best.map(|(v, _)| v).unwrap_or(Value::Null)
        }
        AggFunc::Stdev | AggFunc::Var => {
            let ns = numbers();
            if ns.len() < 2 {
                return Value::Null;
            }
            let mean = ns.iter().sum::<f64>() / ns.len() as f64;
            let var = ns.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (ns.len() - 1) as f64;
            if spec.func == AggFunc::Var {
                Value::from_f64(var)
            } else {
                Value::from_f64(var.sqrt())
            }
        }
        AggFunc::Range => {
            let ns = numbers();
            if ns.is_empty() {
                return Value::Null;
            }
            let min = ns.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = ns.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            Value::from_f64(max - min)
        }
        AggFunc::Earliest | AggFunc::Latest => {
            let f = match field {
                Some(f) => f,
                None => return Value::Null,
            };
            let mut best: Option<(i64, Value)> = None;
            for row in rows {
                let value = row.get_or_null(f);
                if value.is_null_like() {
                    continue;
                }
                let ts = match row.get_or_null(TIMESTAMP_COLUMN).as_i64() {
                    Some(ts) => ts,
                    None => continue,
                };
                let replace = match &best {
                    None => true,
                    Some((t, _)) => {
                        if spec.func == AggFunc::Earliest {
                            ts < *t
                        } else {
                            ts > *t
                        }
                    }
                };
                if replace {
                    best = Some((ts, value));
                }
            }
            best.map(|(_, v)| v).unwrap_or(Value::Null)
        }
        AggFunc::First => values().into_iter().next().unwrap_or(Value::Null),
        AggFunc::Last => values().into_iter().last().unwrap_or(Value::Null),
        AggFunc::Values => {
            let mut seen = HashSet::new();
            let distinct: Vec<serde_json::Value> = values()
                .into_iter()
                .filter(|v| seen.insert(v.key_repr()))
                .map(|v| v.to_json())
                .collect();
            Value::Json(serde_json::Value::Array(distinct))
        }
        AggFunc::List => Value::Json(serde_json::Value::Array(
            values().into_iter().map(|v| v.to_json()).collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parser::parse;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn event(ts: i64, host: &str, bytes: i64, msg: &str) -> Row {
        let mut row = Row::new();
        row.set("timestamp", Value::Int(ts));
        row.set("hostname", Value::String(host.into()));
        row.set("bytes", Value::Int(bytes));
        row.set("message", Value::String(msg.into()));
        row
    }

    fn residual_of(query: &str) -> Vec<Stage> {
        // Stages past the initial search, straight from the parser
        parse(query).unwrap().stages.into_iter().skip(1).collect()
    }

    #[test]
    fn test_stats_group_order_is_first_seen() {
        let rows = vec![
            event(1, "web-2", 10, "a"),
            event(2, "web-1", 20, "b"),
            event(3, "web-2", 30, "c"),
        ];
        let stages = residual_of("search * | stats count, sum(bytes) as total by hostname");
        let out = execute(&stages, rows, &token()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_or_null("hostname"), Value::String("web-2".into()));
        assert_eq!(out[0].get_or_null("count"), Value::Int(2));
        assert_eq!(out[0].get_or_null("total"), Value::Int(40));
        assert_eq!(out[1].get_or_null("hostname"), Value::String("web-1".into()));
    }

    #[test]
    fn test_sort_desc_equals_minus_prefix() {
        let rows = vec![
            event(1, "a", 10, "x"),
            event(2, "b", 30, "x"),
            event(3, "c", 20, "x"),
        ];
        let a = execute(&residual_of("search * | sort -bytes"), rows.clone(), &token()).unwrap();
        let b = execute(&residual_of("search * | sort desc bytes"), rows, &token()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].get_or_null("bytes"), Value::Int(30));
    }

    #[test]
    fn test_dedup_first_wins() {
        let rows = vec![
            event(1, "web-1", 10, "first"),
            event(2, "web-1", 20, "second"),
            event(3, "web-2", 30, "third"),
        ];
        let out = execute(&residual_of("search * | dedup hostname"), rows, &token()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_or_null("message"), Value::String("first".into()));
    }

    #[test]
    fn test_rex_nonmatching_rows_pass_through() {
        let rows = vec![
            event(1, "h", 0, "user=alice action=login"),
            event(2, "h", 0, "no match here"),
        ];
        let stages = residual_of(r#"search * | rex "user=(?P<user>\w+)""#);
        let out = execute(&stages, rows, &token()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_or_null("user"), Value::String("alice".into()));
        assert_eq!(out[1].get_or_null("user"), Value::Null);
    }

    #[test]
    fn test_top_tie_break_first_seen() {
        let rows = vec![
            event(1, "b", 0, "x"),
            event(2, "a", 0, "x"),
            event(3, "a", 0, "x"),
            event(4, "c", 0, "x"),
            event(5, "b", 0, "x"),
        ];
        let out = execute(&residual_of("search * | top 3 hostname"), rows, &token()).unwrap();
        assert_eq!(out[0].get_or_null("hostname"), Value::String("b".into()));
        assert_eq!(out[0].get_or_null("count"), Value::Int(2));
        assert_eq!(out[1].get_or_null("hostname"), Value::String("a".into()));
        assert_eq!(out[2].get_or_null("hostname"), Value::String("c".into()));
    }

    #[test]
    fn test_rare_orders_ascending() {
        let rows = vec![
            event(1, "a", 0, "x"),
            event(2, "a", 0, "x"),
            event(3, "b", 0, "x"),
        ];
        let out = execute(&residual_of("search * | rare 2 hostname"), rows, &token()).unwrap();
        assert_eq!(out[0].get_or_null("hostname"), Value::String("b".into()));
        assert_eq!(out[0].get_or_null("count"), Value::Int(1));
    }

    #[test]
    fn test_tail_keeps_last_rows() {
        let rows: Vec<Row> = (0..10).map(|i| event(i, "h", i, "m")).collect();
        let out = execute(&residual_of("search * | tail 3"), rows, &token()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get_or_null("timestamp"), Value::Int(7));
    }

    #[test]
    fn test_bin_numeric_buckets() {
        let rows = vec![event(1, "h", 1234, "m"), event(2, "h", 80, "m")];
        let out = execute(&residual_of("search * | bin span=100 bytes"), rows, &token()).unwrap();
        assert_eq!(out[0].get_or_null("bytes"), Value::Int(1200));
        assert_eq!(out[1].get_or_null("bytes"), Value::Int(0));
    }

    #[test]
    fn test_timechart_long_format() {
        let rows = vec![
            event(30_000, "web-1", 10, "m"),
            event(45_000, "web-2", 20, "m"),
            event(70_000, "web-1", 30, "m"),
        ];
        let stages = residual_of("search * | timechart span=1m count by hostname");
        let out = execute(&stages, rows, &token()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get_or_null("timestamp"), Value::Int(0));
        assert_eq!(out[0].get_or_null("hostname"), Value::String("web-1".into()));
        assert_eq!(out[0].get_or_null("count"), Value::Int(1));
        assert_eq!(out[2].get_or_null("timestamp"), Value::Int(60_000));
    }

    #[test]
    fn test_undefined_excluded_from_aggregates() {
        let mut odd = event(1, "h", 0, "m");
        odd.set("bytes", Value::Undefined);
        let rows = vec![odd, event(2, "h", 10, "m"), event(3, "h", 20, "m")];
        let stages = residual_of("search * | stats avg(bytes) as ab, count(bytes) as cb");
        let out = execute(&stages, rows, &token()).unwrap();
        assert_eq!(out[0].get_or_null("ab"), Value::Int(15));
        assert_eq!(out[0].get_or_null("cb"), Value::Int(2));
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let rows: Vec<Row> = (1..=10).map(|i| event(i, "h", i * 10, "m")).collect();
        let stages = residual_of("search * | stats p50(bytes) as med, p95(bytes) as p95");
        let out = execute(&stages, rows, &token()).unwrap();
        assert_eq!(out[0].get_or_null("med"), Value::Int(50));
        assert_eq!(out[0].get_or_null("p95"), Value::Int(100));
    }

    #[test]
    fn test_earliest_latest_by_timestamp() {
        let rows = vec![
            event(5, "mid", 0, "m"),
            event(1, "old", 0, "m"),
            event(9, "new", 0, "m"),
        ];
        let stages = residual_of("search * | stats earliest(hostname) as e, latest(hostname) as l");
        let out = execute(&stages, rows, &token()).unwrap();
        assert_eq!(out[0].get_or_null("e"), Value::String("old".into()));
        assert_eq!(out[0].get_or_null("l"), Value::String("new".into()));
    }

    #[test]
    fn test_rename_after_stats() {
        let rows = vec![event(1, "a", 10, "m"), event(2, "a", 20, "m")];
        let stages = residual_of("search * | stats count by hostname | rename hostname as server");
        let out = execute(&stages, rows, &token()).unwrap();
        assert!(out[0].contains("server"));
        assert!(!out[0].contains("hostname"));
    }

    #[test]
    fn test_fields_exclude() {
        let rows = vec![event(1, "a", 10, "m")];
        let stages = residual_of("search * | fields - message, bytes");
        let out = execute(&stages, rows, &token()).unwrap();
        assert!(!out[0].contains("message"));
        assert!(!out[0].contains("bytes"));
        assert!(out[0].contains("hostname"));
    }

    #[test]
    fn test_cancelled_token_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let rows = vec![event(1, "a", 10, "m")];
        let stages = residual_of("search * | stats count");
        assert!(matches!(
            execute(&stages, rows, &cancel),
            Err(SiftError::Timeout)
        ));
    }

    #[test]
    fn test_values_and_list() {
        let rows = vec![
            event(1, "a", 0, "m"),
            event(2, "b", 0, "m"),
            event(3, "a", 0, "m"),
        ];
        let stages = residual_of("search * | stats values(hostname) as vs, list(hostname) as ls");
        let out = execute(&stages, rows, &token()).unwrap();
        match out[0].get_or_null("vs") {
            Value::Json(serde_json::Value::Array(a)) => assert_eq!(a.len(), 2),
            other => panic!("expected array, got {:?}", other),
        }
        match out[0].get_or_null("ls") {
            Value::Json(serde_json::Value::Array(a)) => assert_eq!(a.len(), 3),
            other => panic!("expected array, got {:?}", other),
        }
    }
}
