//! Stage planner
//!
//! Walks the pipeline front to back, feeding each stage into the
//! [`SqlPlan`] until one refuses; everything from that point on runs
//! in-process over the materialized rows. Stages are never reordered —
//! a stage only pushes down if every stage before it pushed down.

use tracing::debug;

use crate::dsl::ast::{CompiledQuery, Expr, Pipeline, Span, Stage, TimeRange};
use crate::dsl::schema::schema;
use crate::dsl::sql::{render_expr, AggShape, SqlPlan};
use crate::Result;

/// Cap on rows materialized for the in-process pipeline when the query
/// itself puts no bound on them.
pub const MAX_FETCH_ROWS: usize = 10_000;

/// Default row cap for fully pushed raw-event queries.
pub const DEFAULT_EVENT_LIMIT: usize = 1_000;

pub fn plan(pipeline: &Pipeline, range: TimeRange) -> Result<CompiledQuery> {
    let mut sql_plan = SqlPlan::new(range);
    let mut pushed: Vec<Stage> = Vec::new();
    let mut residual: Vec<Stage> = Vec::new();
    let mut blocked = false;

    for stage in &pipeline.stages {
        if !blocked && try_push(stage, &mut sql_plan) {
            pushed.push(stage.clone());
        } else {
            if !blocked {
                debug!(stage = stage.name(), "stage blocks push-down");
            }
            blocked = true;
            residual.push(stage.clone());
        }
    }

    // Residual stages need the full candidate row set; cap it so an
    // unbounded window cannot exhaust memory.
    if sql_plan.limit.is_none() && sql_plan.agg.is_none() {
        if residual.is_empty() {
            sql_plan.set_limit(DEFAULT_EVENT_LIMIT);
        } else {
            sql_plan.set_limit(MAX_FETCH_ROWS);
        }
    }

    let sql = sql_plan.render();
    debug!(
        pushed = pushed.len(),
        residual = residual.len(),
        "planned query"
    );
    Ok(CompiledQuery { sql, pushed, residual })
}

/// Try to absorb one stage into the backend query. Returns false when the
/// stage (or the plan's current shape) requires in-process execution.
fn try_push(stage: &Stage, plan: &mut SqlPlan) -> bool {
    // Nothing may push after an explicit LIMIT
    if plan.limit.is_some() {
        return false;
    }
    match stage {
        Stage::Search { predicate } | Stage::Where { predicate } => {
            // ClickHouse applies WHERE before LIMIT BY, so a filter after
            // a pushed dedup would run out of order; a filter after a
            // projection could reference a projected-away column
            if plan.agg.is_some() || plan.has_order() || plan.has_limit_by() || plan.has_projection()
            {
                return false;
            }
            if let Expr::MatchAll = predicate {
                return true;
            }
            match render_expr(predicate) {
                Some(sql) => {
                    plan.push_conjunct(sql);
                    true
                }
                None => false,
            }
        }
        Stage::Eval { assignments } => {
            if plan.agg.is_some() || plan.has_order() || plan.has_projection() {
                return false;
            }
            // Reassigning a schema column would shadow it in the SELECT;
            // run those in-process
            if assignments
                .iter()
                .any(|(name, _)| schema().canonical_name(name).is_some())
            {
                return false;
            }
            // Likewise a reassignment of an already-pushed eval alias
            // (or a duplicate within this stage) would render two
            // SELECT expressions with the same alias
            for (i, (name, _)) in assignments.iter().enumerate() {
                if plan.eval_alias_exists(name)
                    || assignments[..i].iter().any(|(prev, _)| prev == name)
                {
                    return false;
                }
            }
            let rendered: Option<Vec<(String, String)>> = assignments
                .iter()
                .map(|(name, expr)| render_expr(expr).map(|sql| (name.clone(), sql)))
                .collect();
            match rendered {
                Some(pairs) => {
                    for (alias, sql) in pairs {
                        plan.push_eval(alias, sql);
                    }
                    true
                }
                None => false,
            }
        }
        Stage::Stats { aggs, group_by } => {
            if plan.agg.is_some() || plan.has_order() || plan.has_projection() || plan.has_limit_by() {
                return false;
            }
            plan.set_agg(AggShape {
                bucket_secs: None,
                group_by: group_by.clone(),
                aggs: aggs.clone(),
            });
            true
        }
        Stage::Timechart { span, aggs, split_by } => {
            if plan.agg.is_some() || plan.has_order() || plan.has_projection() || plan.has_limit_by() {
                return false;
            }
            let secs = match span {
                Span::Time(ms) if ms % 1000 == 0 => ms / 1000,
                _ => return false,
            };
            plan.set_agg(AggShape {
                bucket_secs: Some(secs),
                group_by: split_by.iter().cloned().collect(),
                aggs: aggs.clone(),
            });
            true
        }
        Stage::Sort { keys } => {
            // ORDER BY runs before LIMIT BY, which would change which
            // row survives a pushed dedup
            if plan.has_order() || plan.has_limit_by() {
                return false;
            }
            let available = plan.output_columns();
            if !keys.iter().all(|k| available.iter().any(|c| c == &k.field)) {
                return false;
            }
            for key in keys {
                plan.push_order(key.field.clone(), key.descending);
            }
            true
        }
        Stage::Limit { n } | Stage::Head { n } => {
            plan.set_limit(*n);
            true
        }
        Stage::Dedup { fields } => {
            // LIMIT 1 BY covers the single-field form on raw events; a
            // prior projection may have dropped the dedup column
            if plan.agg.is_some()
                || plan.has_order()
                || plan.has_limit_by()
                || plan.has_projection()
                || fields.len() != 1
            {
                return false;
            }
            plan.set_limit_by(fields[0].clone());
            true
        }
        Stage::Table { fields } => {
            if plan.agg.is_some() || plan.has_order() || plan.has_projection() || plan.has_limit_by()
            {
                return false;
            }
            plan.set_projection(fields.clone());
            true
        }
        Stage::Fields { mode, fields } => {
            if plan.agg.is_some() || plan.has_order() || plan.has_projection() || plan.has_limit_by()
            {
                return false;
            }
            match mode {
                crate::dsl::ast::FieldMode::Include => plan.set_projection(fields.clone()),
                crate::dsl::ast::FieldMode::Exclude => {
                    // Excluding a derived column is in-process territory
                    if fields.iter().any(|f| plan.eval_alias_exists(f)) {
                        return false;
                    }
                    plan.set_excluded(fields.clone());
                }
            }
            true
        }
        // Always in-process: regex extraction, positional tail, frequency
        // ranking, bucket relabeling, renames
        Stage::Rex { .. }
        | Stage::Tail { .. }
        | Stage::Top { .. }
        | Stage::Rare { .. }
        | Stage::Bin { .. }
        | Stage::Rename { .. } => false,
    }
}
