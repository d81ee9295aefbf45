//! Pipeline AST
//!
//! The parsed form of a DSL query: an ordered list of [`Stage`]s, the
//! first of which is always `Search`. Stages and expressions are closed
//! sum types so the planner and executors can exhaustively pattern-match;
//! adding a command is a localized, compiler-checked change.

use crate::dsl::value::Value;

/// A parsed pipeline. `stages[0]` is always `Stage::Search` — the parser
/// inserts an implicit `search *` when the query starts with a pipe.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub original_query: String,
}

/// One pipeline command. `filter` is parsed as `Where`; it is a pure
/// syntax alias.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Search { predicate: Expr },
    Where { predicate: Expr },
    Stats { aggs: Vec<AggSpec>, group_by: Vec<String> },
    Timechart { span: Span, aggs: Vec<AggSpec>, split_by: Option<String> },
    Sort { keys: Vec<SortKey> },
    Limit { n: usize },
    Head { n: usize },
    Tail { n: usize },
    Dedup { fields: Vec<String> },
    Table { fields: Vec<String> },
    Fields { mode: FieldMode, fields: Vec<String> },
    Rename { pairs: Vec<(String, String)> },
    Eval { assignments: Vec<(String, Expr)> },
    Top { n: usize, field: String },
    Rare { n: usize, field: String },
    Bin { span: Span, field: String },
    Rex { field: String, pattern: String },
}

impl Stage {
    /// Command keyword, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Search { .. } => "search",
            Stage::Where { .. } => "where",
            Stage::Stats { .. } => "stats",
            Stage::Timechart { .. } => "timechart",
            Stage::Sort { .. } => "sort",
            Stage::Limit { .. } => "limit",
            Stage::Head { .. } => "head",
            Stage::Tail { .. } => "tail",
            Stage::Dedup { .. } => "dedup",
            Stage::Table { .. } => "table",
            Stage::Fields { .. } => "fields",
            Stage::Rename { .. } => "rename",
            Stage::Eval { .. } => "eval",
            Stage::Top { .. } => "top",
            Stage::Rare { .. } => "rare",
            Stage::Bin { .. } => "bin",
            Stage::Rex { .. } => "rex",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Include,
    Exclude,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Bucket width for `timechart` and `bin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Span {
    /// Time span in milliseconds (`5m`, `1h`, `1d`, `1w`).
    Time(i64),
    /// Plain numeric width for binning number fields (`span=100`).
    Numeric(f64),
}

/// One aggregation inside `stats`/`timechart`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggSpec {
    pub func: AggFunc,
    /// None only for `count`.
    pub field: Option<String>,
    /// Output column name; defaults to the printed form (`avg(bytes)`).
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggFunc {
    Count,
    DistinctCount,
    Sum,
    Avg,
    Min,
    Max,
    /// Nearest-rank percentile, 0.0..=1.0 (`p95`, `perc95`, `median`).
    Percentile(f64),
    Mode,
    Stdev,
    Var,
    Range,
    /// By event-timestamp order.
    Earliest,
    Latest,
    /// By input order.
    First,
    Last,
    /// Distinct values, collected.
    Values,
    /// All values, collected.
    List,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<AggFunc> {
        match name {
            "count" | "c" => Some(AggFunc::Count),
            "dc" | "distinct_count" => Some(AggFunc::DistinctCount),
            "sum" => Some(AggFunc::Sum),
            "avg" | "mean" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "median" => Some(AggFunc::Percentile(0.5)),
            "mode" => Some(AggFunc::Mode),
            "stdev" | "stddev" => Some(AggFunc::Stdev),
            "var" | "variance" => Some(AggFunc::Var),
            "range" => Some(AggFunc::Range),
            "earliest" => Some(AggFunc::Earliest),
            "latest" => Some(AggFunc::Latest),
            "first" => Some(AggFunc::First),
            "last" => Some(AggFunc::Last),
            "values" => Some(AggFunc::Values),
            "list" => Some(AggFunc::List),
            _ => {
                // p50 / p95 / perc99 style percentiles
                let digits = name
                    .strip_prefix("perc")
                    .or_else(|| name.strip_prefix('p'))?;
                let n: f64 = digits.parse().ok()?;
                if (0.0..=100.0).contains(&n) && !digits.is_empty() {
                    Some(AggFunc::Percentile(n / 100.0))
                } else {
                    None
                }
            }
        }
    }

    pub fn needs_field(&self) -> bool {
        !matches!(self, AggFunc::Count)
    }
}

/// Comparison and arithmetic operators shared by search predicates,
/// `where` clauses, and `eval` expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Text-matching shape compiled from wildcards, free-text terms and the
/// `~`/`:` operators. Wildcard position picks the variant: `web*` →
/// Prefix, `*web` → Suffix, `*web*` → Contains.
#[derive(Debug, Clone, PartialEq)]
pub enum TextPattern {
    /// Case-insensitive substring.
    Contains(String),
    Prefix(String),
    Suffix(String),
    /// Case-insensitive regex (from `~`/`:` with metacharacters, or a
    /// wildcard in the middle of a value).
    Regex(String),
}

/// Typed expression tree. Immutable once built; every `Field` has been
/// resolved to a canonical schema name or a previously introduced derived
/// field by the expression compiler.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(String),
    Literal(Value),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Call { func: String, args: Vec<Expr> },
    /// Substring/regex/wildcard match against a string field.
    Match { field: String, pattern: TextPattern },
    /// A lone `*` predicate: matches every row.
    MatchAll,
}

impl Expr {
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }
    }

    /// Every field name referenced anywhere in the tree.
    pub fn referenced_fields(&self, out: &mut Vec<String>) {
        match self {
            Expr::Field(name) => out.push(name.clone()),
            Expr::Match { field, .. } => out.push(field.clone()),
            Expr::Unary { expr, .. } => expr.referenced_fields(out),
            Expr::Binary { left, right, .. } => {
                left.referenced_fields(out);
                right.referenced_fields(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.referenced_fields(out);
                }
            }
            Expr::Literal(_) | Expr::MatchAll => {}
        }
    }
}

/// Resolved absolute time window, millisecond epochs. Relative forms are
/// resolved once at query start, never per row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub earliest_ms: i64,
    pub latest_ms: i64,
}

/// Output of the stage planner: one backend query plus the residual
/// stages that must run over materialized rows, in original order.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub pushed: Vec<Stage>,
    pub residual: Vec<Stage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agg_func_names() {
        assert_eq!(AggFunc::from_name("count"), Some(AggFunc::Count));
        assert_eq!(AggFunc::from_name("dc"), Some(AggFunc::DistinctCount));
        assert_eq!(AggFunc::from_name("p95"), Some(AggFunc::Percentile(0.95)));
        assert_eq!(AggFunc::from_name("perc50"), Some(AggFunc::Percentile(0.5)));
        assert_eq!(AggFunc::from_name("median"), Some(AggFunc::Percentile(0.5)));
        assert_eq!(AggFunc::from_name("bogus"), None);
    }

    #[test]
    fn test_expr_referenced_fields() {
        let expr = Expr::binary(
            BinOp::And,
            Expr::binary(BinOp::Gt, Expr::Field("bytes".into()), Expr::Literal(Value::Int(0))),
            Expr::Match {
                field: "message".into(),
                pattern: TextPattern::Contains("error".into()),
            },
        );
        let mut fields = Vec::new();
        expr.referenced_fields(&mut fields);
        assert_eq!(fields, vec!["bytes".to_string(), "message".to_string()]);
    }
}
