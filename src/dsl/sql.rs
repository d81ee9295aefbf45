//! ClickHouse query rendering
//!
//! [`SqlPlan`] is the mutable model the planner feeds pushable stages
//! into; `render` turns it into one SELECT against the logs table. Every
//! identifier is backtick-quoted and every literal goes through
//! [`quote_literal`], so query text never reaches the backend unescaped.

use crate::dsl::ast::{AggFunc, AggSpec, BinOp, Expr, TextPattern, TimeRange, UnaryOp};
use crate::dsl::functions;
use crate::dsl::schema::{schema, LOGS_TABLE, TIMESTAMP_COLUMN};
use crate::dsl::value::Value;

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("NULL".to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Int(n) => Some(n.to_string()),
        Value::Float(n) => Some(n.to_string()),
        Value::String(s) => Some(quote_literal(s)),
        // Undefined and Json never appear in compiled literals
        Value::Undefined | Value::Json(_) => None,
    }
}

/// Translate an expression tree to ClickHouse SQL. `None` means the
/// expression is not push-down-capable and its stage must run in-process.
pub fn render_expr(expr: &Expr) -> Option<String> {
    match expr {
        Expr::MatchAll => Some("1".to_string()),
        Expr::Field(name) => Some(quote_ident(name)),
        Expr::Literal(v) => literal(v),
        Expr::Unary { op, expr } => {
            let inner = render_expr(expr)?;
            Some(match op {
                UnaryOp::Not => format!("NOT ({})", inner),
                UnaryOp::Neg => format!("-({})", inner),
            })
        }
        Expr::Binary { op, left, right } => {
            let l = render_expr(left)?;
            let r = render_expr(right)?;
            Some(match op {
                BinOp::And => format!("({} AND {})", l, r),
                BinOp::Or => format!("({} OR {})", l, r),
                BinOp::Eq => format!("({} = {})", l, r),
                BinOp::Ne => format!("({} != {})", l, r),
                BinOp::Lt => format!("({} < {})", l, r),
                BinOp::Le => format!("({} <= {})", l, r),
                BinOp::Gt => format!("({} > {})", l, r),
                BinOp::Ge => format!("({} >= {})", l, r),
                BinOp::Add => format!("({} + {})", l, r),
                BinOp::Sub => format!("({} - {})", l, r),
                BinOp::Mul => format!("({} * {})", l, r),
                // Division by zero must come back NULL, matching the
                // in-process undefined marker
                BinOp::Div => format!("if(({r}) = 0, NULL, ({l}) / ({r}))", l = l, r = r),
                BinOp::Mod => format!("if(({r}) = 0, NULL, modulo({l}, {r}))", l = l, r = r),
            })
        }
        Expr::Call { func, args } => {
            let def = functions::lookup(func)?;
            let sql_name = def.sql_name?;
            // ClickHouse log() has no base argument
            if func == "log" && args.len() == 2 {
                return None;
            }
            let rendered: Option<Vec<String>> = args.iter().map(render_expr).collect();
            Some(format!("{}({})", sql_name, rendered?.join(", ")))
        }
        Expr::Match { field, pattern } => {
            let col = quote_ident(field);
            Some(match pattern {
                TextPattern::Contains(p) => {
                    format!("positionCaseInsensitive({}, {}) > 0", col, quote_literal(p))
                }
                TextPattern::Prefix(p) => format!(
                    "match({}, {})",
                    col,
                    quote_literal(&format!("(?i)^{}", regex::escape(p)))
                ),
                TextPattern::Suffix(p) => format!(
                    "match({}, {})",
                    col,
                    quote_literal(&format!("(?i){}$", regex::escape(p)))
                ),
                TextPattern::Regex(p) => {
                    format!("match({}, {})", col, quote_literal(&format!("(?i){}", p)))
                }
            })
        }
    }
}

/// One aggregation, rendered. `Earliest`/`Latest` order by the event
/// timestamp; `First`/`Last` take whatever order the backend scans in.
pub fn render_agg(spec: &AggSpec) -> String {
    let field = spec
        .field
        .as_deref()
        .map(quote_ident)
        .unwrap_or_default();
    let ts = quote_ident(TIMESTAMP_COLUMN);
    match spec.func {
        AggFunc::Count => "count()".to_string(),
        AggFunc::DistinctCount => format!("uniqExact({})", field),
        AggFunc::Sum => format!("sum({})", field),
        AggFunc::Avg => format!("avg({})", field),
        AggFunc::Min => format!("min({})", field),
        AggFunc::Max => format!("max({})", field),
        AggFunc::Percentile(p) => format!("quantileExact({})({})", p, field),
        AggFunc::Mode => format!("arrayElement(topK(1)({}), 1)", field),
        AggFunc::Stdev => format!("stddevSamp({})", field),
        AggFunc::Var => format!("varSamp({})", field),
        AggFunc::Range => format!("max({f}) - min({f})", f = field),
        AggFunc::Earliest => format!("argMin({}, {})", field, ts),
        AggFunc::Latest => format!("argMax({}, {})", field, ts),
        AggFunc::First => format!("any({})", field),
        AggFunc::Last => format!("anyLast({})", field),
        AggFunc::Values => format!("groupUniqArray({})", field),
        AggFunc::List => format!("groupArray({})", field),
    }
}

/// Aggregated SELECT shape: `stats` or `timechart`.
#[derive(Debug, Clone)]
pub struct AggShape {
    /// Timechart bucket width in seconds; None for plain stats.
    pub bucket_secs: Option<i64>,
    pub group_by: Vec<String>,
    pub aggs: Vec<AggSpec>,
}

/// The push-down query under construction. The planner owns the rules of
/// which stage may enter; this type owns the SQL text.
#[derive(Debug, Clone)]
pub struct SqlPlan {
    range: TimeRange,
    conjuncts: Vec<String>,
    /// Computed columns from pushed `eval` stages, in assignment order.
    evals: Vec<(String, String)>,
    /// Explicit projection from `table`/`fields`.
    projection: Option<Vec<String>>,
    excluded: Vec<String>,
    pub agg: Option<AggShape>,
    order_by: Vec<(String, bool)>,
    /// `LIMIT 1 BY` columns from a pushed single-field dedup.
    limit_by: Option<String>,
    pub limit: Option<usize>,
}

impl SqlPlan {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            conjuncts: Vec::new(),
            evals: Vec::new(),
            projection: None,
            excluded: Vec::new(),
            agg: None,
            order_by: Vec::new(),
            limit_by: None,
            limit: None,
        }
    }

    pub fn push_conjunct(&mut self, sql: String) {
        self.conjuncts.push(sql);
    }

    pub fn push_eval(&mut self, alias: String, sql: String) {
        self.evals.push((alias, sql));
    }

    pub fn eval_alias_exists(&self, name: &str) -> bool {
        self.evals.iter().any(|(a, _)| a == name)
    }

    pub fn set_projection(&mut self, fields: Vec<String>) {
        self.projection = Some(fields);
    }

    pub fn has_projection(&self) -> bool {
        self.projection.is_some()
    }

    pub fn set_excluded(&mut self, fields: Vec<String>) {
        self.excluded = fields;
    }

    pub fn set_agg(&mut self, shape: AggShape) {
        self.agg = Some(shape);
    }

    pub fn push_order(&mut self, column: String, descending: bool) {
        self.order_by.push((column, descending));
    }

    pub fn has_order(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn set_limit_by(&mut self, field: String) {
        self.limit_by = Some(field);
    }

    pub fn has_limit_by(&self) -> bool {
        self.limit_by.is_some()
    }

    pub fn set_limit(&mut self, n: usize) {
        self.limit = Some(n);
    }

    /// Column names the rendered query selects, in order. Used by the
    /// planner to validate pushed sort keys.
    pub fn output_columns(&self) -> Vec<String> {
        if let Some(agg) = &self.agg {
            let mut cols = Vec::new();
            if agg.bucket_secs.is_some() {
                cols.push(TIMESTAMP_COLUMN.to_string());
            }
            cols.extend(agg.group_by.iter().cloned());
            cols.extend(agg.aggs.iter().map(|a| a.alias.clone()));
            return cols;
        }
        let mut cols: Vec<String> = match &self.projection {
            Some(fields) => fields.clone(),
            None => schema()
                .column_names()
                .into_iter()
                .filter(|c| !self.excluded.iter().any(|e| e == c))
                .map(|c| c.to_string())
                .collect(),
        };
        for (alias, _) in &self.evals {
            if !cols.iter().any(|c| c == alias) {
                cols.push(alias.clone());
            }
        }
        cols
    }

    pub fn render(&self) -> String {
        let mut select: Vec<String> = Vec::new();
        let mut group_exprs: Vec<String> = Vec::new();

        if let Some(agg) = &self.agg {
            if let Some(secs) = agg.bucket_secs {
                let bucket = format!(
                    "toStartOfInterval({}, INTERVAL {} SECOND)",
                    quote_ident(TIMESTAMP_COLUMN),
                    secs
                );
                select.push(format!("{} AS {}", bucket, quote_ident(TIMESTAMP_COLUMN)));
                group_exprs.push(quote_ident(TIMESTAMP_COLUMN));
            }
            for col in &agg.group_by {
                select.push(quote_ident(col));
                group_exprs.push(quote_ident(col));
            }
            for spec in &agg.aggs {
                select.push(format!("{} AS {}", render_agg(spec), quote_ident(&spec.alias)));
            }
        } else {
            let cols: Vec<String> = match &self.projection {
                Some(fields) => fields.clone(),
                None => schema()
                    .column_names()
                    .into_iter()
                    .filter(|c| !self.excluded.iter().any(|e| e == c))
                    .map(|c| c.to_string())
                    .collect(),
            };
            for col in &cols {
                if let Some((_, expr)) = self.evals.iter().find(|(a, _)| a == col) {
                    select.push(format!("{} AS {}", expr, quote_ident(col)));
                } else {
                    select.push(quote_ident(col));
                }
            }
            for (alias, expr) in &self.evals {
                if !cols.iter().any(|c| c == alias) {
                    select.push(format!("{} AS {}", expr, quote_ident(alias)));
                }
            }
        }

        let ts = quote_ident(TIMESTAMP_COLUMN);
        let mut conjuncts = vec![
            format!("{} >= fromUnixTimestamp64Milli({})", ts, self.range.earliest_ms),
            format!("{} <= fromUnixTimestamp64Milli({})", ts, self.range.latest_ms),
        ];
        conjuncts.extend(self.conjuncts.iter().cloned());

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            select.join(", "),
            quote_ident(LOGS_TABLE),
            conjuncts.join(" AND ")
        );

        // stats with no group-by is a single global row, no GROUP BY
        if !group_exprs.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_exprs.join(", ")));
        }

        let mut order = self.order_by.clone();
        if order.is_empty() {
            if let Some(agg) = &self.agg {
                // Deterministic output without an explicit sort: bucket
                // order for timechart, group-key order for stats
                if agg.bucket_secs.is_some() {
                    order.push((TIMESTAMP_COLUMN.to_string(), false));
                } else {
                    for col in &agg.group_by {
                        order.push((col.clone(), false));
                    }
                }
            } else {
                // Raw events stream newest-first
                order.push((TIMESTAMP_COLUMN.to_string(), true));
            }
        }
        if !order.is_empty() {
            let rendered: Vec<String> = order
                .iter()
                .map(|(col, desc)| {
                    format!("{}{}", quote_ident(col), if *desc { " DESC" } else { " ASC" })
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", rendered.join(", ")));
        }

        if let Some(field) = &self.limit_by {
            sql.push_str(&format!(" LIMIT 1 BY {}", quote_ident(field)));
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ast::Expr as E;

    fn range() -> TimeRange {
        TimeRange { earliest_ms: 1_000, latest_ms: 2_000 }
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("it's"), r"'it\'s'");
        assert_eq!(quote_literal(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_render_comparison() {
        let expr = E::binary(
            BinOp::Ge,
            E::Field("status_code".into()),
            E::Literal(Value::Int(500)),
        );
        assert_eq!(render_expr(&expr).unwrap(), "(`status_code` >= 500)");
    }

    #[test]
    fn test_render_division_guards_zero() {
        let expr = E::binary(
            BinOp::Div,
            E::Field("bytes".into()),
            E::Literal(Value::Int(1024)),
        );
        assert_eq!(
            render_expr(&expr).unwrap(),
            "if((1024) = 0, NULL, (`bytes`) / (1024))"
        );
    }

    #[test]
    fn test_render_text_patterns() {
        let contains = E::Match {
            field: "message".into(),
            pattern: TextPattern::Contains("error".into()),
        };
        assert_eq!(
            render_expr(&contains).unwrap(),
            "positionCaseInsensitive(`message`, 'error') > 0"
        );
        let prefix = E::Match {
            field: "hostname".into(),
            pattern: TextPattern::Prefix("web".into()),
        };
        assert_eq!(render_expr(&prefix).unwrap(), "match(`hostname`, '(?i)^web')");
    }

    #[test]
    fn test_row_only_function_refuses_render() {
        let expr = E::Call {
            func: "classify_ip".into(),
            args: vec![E::Field("client_ip".into())],
        };
        assert!(render_expr(&expr).is_none());
    }

    #[test]
    fn test_render_raw_query_shape() {
        let mut plan = SqlPlan::new(range());
        plan.push_conjunct("(`severity` <= 3)".into());
        plan.set_limit(100);
        let sql = plan.render();
        assert!(sql.starts_with("SELECT `timestamp`, `message`"));
        assert!(sql.contains("FROM `logs` WHERE"));
        assert!(sql.contains("`timestamp` >= fromUnixTimestamp64Milli(1000)"));
        assert!(sql.contains("(`severity` <= 3)"));
        assert!(sql.contains("ORDER BY `timestamp` DESC"));
        assert!(sql.ends_with("LIMIT 100"));
    }

    #[test]
    fn test_render_stats_query() {
        let mut plan = SqlPlan::new(range());
        plan.set_agg(AggShape {
            bucket_secs: None,
            group_by: vec!["hostname".into()],
            aggs: vec![AggSpec {
                func: AggFunc::Avg,
                field: Some("bytes".into()),
                alias: "avg_bytes".into(),
            }],
        });
        let sql = plan.render();
        assert!(sql.contains("SELECT `hostname`, avg(`bytes`) AS `avg_bytes`"));
        assert!(sql.contains("GROUP BY `hostname`"));
        assert!(sql.contains("ORDER BY `hostname` ASC"));
    }

    #[test]
    fn test_render_timechart_query() {
        let mut plan = SqlPlan::new(range());
        plan.set_agg(AggShape {
            bucket_secs: Some(3600),
            group_by: vec!["app_name".into()],
            aggs: vec![AggSpec { func: AggFunc::Count, field: None, alias: "count".into() }],
        });
        let sql = plan.render();
        assert!(sql.contains("toStartOfInterval(`timestamp`, INTERVAL 3600 SECOND) AS `timestamp`"));
        assert!(sql.contains("GROUP BY `timestamp`, `app_name`"));
        assert!(sql.contains("count() AS `count`"));
        assert!(sql.contains("ORDER BY `timestamp` ASC"));
    }

    #[test]
    fn test_render_dedup_limit_by() {
        let mut plan = SqlPlan::new(range());
        plan.set_limit_by("hostname".into());
        let sql = plan.render();
        assert!(sql.contains("LIMIT 1 BY `hostname`"));
    }

    #[test]
    fn test_render_eval_column() {
        let mut plan = SqlPlan::new(range());
        plan.push_eval("kb".into(), "if((1024) = 0, NULL, (`bytes`) / (1024))".into());
        let sql = plan.render();
        assert!(sql.contains("AS `kb`"));
    }

    #[test]
    fn test_percentile_rendering() {
        let spec = AggSpec {
            func: AggFunc::Percentile(0.95),
            field: Some("duration_ms".into()),
            alias: "p95".into(),
        };
        assert_eq!(render_agg(&spec), "quantileExact(0.95)(`duration_ms`)");
    }
}
