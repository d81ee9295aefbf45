//! Pipeline parser
//!
//! Splits query text on unquoted `|` at paren depth 0 and parses each
//! stage against its command grammar. The first stage is always a
//! search; a pipe-leading query (or one that opens with another command)
//! gets an implicit `search *`.

use regex::Regex;

use crate::dsl::ast::{AggFunc, AggSpec, FieldMode, Pipeline, SortKey, Stage};
use crate::dsl::expr::{
    compile_bool_expr, compile_eval_assignments, compile_search_predicate, FieldScope,
};
use crate::dsl::lexer::{tokenize, LexMode, Token, TokenKind};
use crate::dsl::schema::MESSAGE_COLUMN;
use crate::dsl::time::parse_span;
use crate::{Result, SiftError};

const COMMANDS: &[&str] = &[
    "search", "where", "filter", "stats", "timechart", "sort", "limit", "head", "tail",
    "dedup", "table", "fields", "rename", "eval", "top", "rare", "bin", "rex",
];

/// Parse a full DSL query into a validated pipeline.
pub fn parse(query: &str) -> Result<Pipeline> {
    let segments = split_stages(query);
    let mut stages: Vec<Stage> = Vec::new();
    let mut scope = FieldScope::new();

    for (i, (text, offset)) in segments.iter().enumerate() {
        let trimmed = text.trim();
        if i == 0 {
            if trimmed.is_empty() {
                // Query started with a pipe: implicit `search *`
                stages.push(Stage::Search {
                    predicate: crate::dsl::ast::Expr::MatchAll,
                });
                continue;
            }
            let first_word = trimmed.split_whitespace().next().unwrap_or("");
            if first_word == "search" {
                let rest_off = offset + text.find("search").unwrap_or(0) + "search".len();
                let rest = &trimmed["search".len()..];
                let tokens = tokenize(rest, rest_off, LexMode::Search)?;
                stages.push(Stage::Search {
                    predicate: compile_search_predicate(&tokens, &scope)?,
                });
                continue;
            }
            if COMMANDS.contains(&first_word) {
                // Opens with a transform command: implicit `search *`,
                // then parse this segment as that command
                stages.push(Stage::Search {
                    predicate: crate::dsl::ast::Expr::MatchAll,
                });
                stages.push(parse_command(trimmed, *offset, &mut scope)?);
                continue;
            }
            let tokens = tokenize(trimmed, *offset, LexMode::Search)?;
            stages.push(Stage::Search {
                predicate: compile_search_predicate(&tokens, &scope)?,
            });
            continue;
        }
        if trimmed.is_empty() {
            return Err(SiftError::parse("empty pipeline stage", *offset));
        }
        stages.push(parse_command(trimmed, *offset, &mut scope)?);
    }

    if stages.is_empty() {
        return Err(SiftError::parse("empty query", 0));
    }

    Ok(Pipeline {
        stages,
        original_query: query.to_string(),
    })
}

/// Split on `|` outside quotes and parens, keeping each segment's byte
/// offset into the original text.
fn split_stages(query: &str) -> Vec<(String, usize)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (pos, c) in query.char_indices() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            '|' if depth == 0 => {
                segments.push((std::mem::take(&mut current), start));
                start = pos + 1;
            }
            _ => current.push(c),
        }
    }
    segments.push((current, start));
    segments
}

fn parse_command(text: &str, offset: usize, scope: &mut FieldScope) -> Result<Stage> {
    let word_len = text
        .find(|c: char| c.is_whitespace())
        .unwrap_or(text.len());
    let command = &text[..word_len];
    let args = &text[word_len..];
    let args_offset = offset + word_len;

    match command {
        "search" => {
            let tokens = tokenize(args, args_offset, LexMode::Search)?;
            // Mid-pipeline search refines like a where clause
            Ok(Stage::Where {
                predicate: compile_search_predicate(&tokens, scope)?,
            })
        }
        "where" | "filter" => {
            let tokens = tokenize(args, args_offset, LexMode::Expr)?;
            Ok(Stage::Where {
                predicate: compile_bool_expr(&tokens, scope)?,
            })
        }
        "eval" => {
            let tokens = tokenize(args, args_offset, LexMode::Expr)?;
            let assignments = compile_eval_assignments(&tokens, scope)?;
            for (name, _) in &assignments {
                scope.add_derived(name);
            }
            Ok(Stage::Eval { assignments })
        }
        "stats" => parse_stats(args, args_offset, scope),
        "timechart" => parse_timechart(args, args_offset, scope),
        "sort" => parse_sort(args, args_offset, scope),
        "limit" | "head" | "tail" => {
            let n = parse_count_arg(args, args_offset, command)?;
            Ok(match command {
                "limit" => Stage::Limit { n },
                "head" => Stage::Head { n },
                _ => Stage::Tail { n },
            })
        }
        "dedup" => {
            let fields = parse_field_list(args, args_offset, scope)?;
            if fields.is_empty() {
                return Err(SiftError::parse("dedup requires at least one field", args_offset));
            }
            Ok(Stage::Dedup { fields })
        }
        "table" => {
            let fields = parse_field_list(args, args_offset, scope)?;
            if fields.is_empty() {
                return Err(SiftError::parse("table requires at least one field", args_offset));
            }
            Ok(Stage::Table { fields })
        }
        "fields" => parse_fields(args, args_offset, scope),
        "rename" => parse_rename(args, args_offset, scope),
        "top" | "rare" => parse_top_rare(command, args, args_offset, scope),
        "bin" => parse_bin(args, args_offset, scope),
        "rex" => parse_rex(args, args_offset, scope),
        other => Err(SiftError::parse(
            format!("unknown command: {}", other),
            offset,
        )),
    }
}

fn parse_count_arg(args: &str, offset: usize, command: &str) -> Result<usize> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    match tokens.as_slice() {
        [Token { kind: TokenKind::Number(n), .. }, Token { kind: TokenKind::Eof, .. }]
            if *n >= 1.0 && n.fract() == 0.0 =>
        {
            Ok(*n as usize)
        }
        _ => Err(SiftError::parse(
            format!("{} requires a positive integer argument", command),
            offset,
        )),
    }
}

/// Comma-or-whitespace separated field names, alias-resolved.
fn parse_field_list(args: &str, offset: usize, scope: &FieldScope) -> Result<Vec<String>> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let mut fields = Vec::new();
    for tok in &tokens {
        match &tok.kind {
            TokenKind::Ident(name) => fields.push(scope.resolve_or_err(name)?),
            TokenKind::Comma | TokenKind::Eof => {}
            _ => {
                return Err(SiftError::parse(
                    format!("expected field name, found '{}'", tok.text),
                    tok.pos,
                ))
            }
        }
    }
    Ok(fields)
}

fn parse_fields(args: &str, offset: usize, scope: &FieldScope) -> Result<Stage> {
    let trimmed = args.trim_start();
    let consumed = args.len() - trimmed.len();
    let (mode, rest, rest_off) = if let Some(r) = trimmed.strip_prefix('-') {
        (FieldMode::Exclude, r, offset + consumed + 1)
    } else if let Some(r) = trimmed.strip_prefix('+') {
        (FieldMode::Include, r, offset + consumed + 1)
    } else {
        (FieldMode::Include, trimmed, offset + consumed)
    };
    let fields = parse_field_list(rest, rest_off, scope)?;
    if fields.is_empty() {
        return Err(SiftError::parse("fields requires at least one field", offset));
    }
    Ok(Stage::Fields { mode, fields })
}

fn parse_rename(args: &str, offset: usize, scope: &FieldScope) -> Result<Stage> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let mut pairs = Vec::new();
    let mut i = 0;
    loop {
        let from = match &tokens[i].kind {
            TokenKind::Ident(name) => scope.resolve_or_err(name)?,
            _ => {
                return Err(SiftError::parse(
                    format!("expected field name, found '{}'", tokens[i].text),
                    tokens[i].pos,
                ))
            }
        };
        i += 1;
        match &tokens[i].kind {
            TokenKind::Ident(kw) if kw.eq_ignore_ascii_case("as") => i += 1,
            _ => {
                return Err(SiftError::parse(
                    "rename syntax is: rename <field> as <name>",
                    tokens[i].pos,
                ))
            }
        }
        let to = match &tokens[i].kind {
            TokenKind::Ident(name) => name.clone(),
            _ => {
                return Err(SiftError::parse(
                    format!("expected new field name, found '{}'", tokens[i].text),
                    tokens[i].pos,
                ))
            }
        };
        i += 1;
        pairs.push((from, to));
        if matches!(tokens[i].kind, TokenKind::Comma) {
            i += 1;
            continue;
        }
        break;
    }
    if !matches!(tokens[i].kind, TokenKind::Eof) {
        return Err(SiftError::parse(
            format!("unexpected token '{}' in rename", tokens[i].text),
            tokens[i].pos,
        ));
    }
    Ok(Stage::Rename { pairs })
}

fn parse_top_rare(command: &str, args: &str, offset: usize, scope: &mut FieldScope) -> Result<Stage> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let mut i = 0;
    let n = if let TokenKind::Number(v) = tokens[i].kind {
        i += 1;
        if v < 1.0 || v.fract() != 0.0 {
            return Err(SiftError::parse(
                format!("{} count must be a positive integer", command),
                tokens[0].pos,
            ));
        }
        v as usize
    } else {
        10
    };
    let field = match &tokens[i].kind {
        TokenKind::Ident(name) => scope.resolve_or_err(name)?,
        _ => {
            return Err(SiftError::parse(
                format!("{} requires a field name", command),
                tokens[i].pos,
            ))
        }
    };
    i += 1;
    if !matches!(tokens[i].kind, TokenKind::Eof) {
        return Err(SiftError::parse(
            format!("unexpected token '{}' after {} field", tokens[i].text, command),
            tokens[i].pos,
        ));
    }
    // Output rows are {field, count}
    scope.add_derived("count");
    Ok(if command == "top" {
        Stage::Top { n, field }
    } else {
        Stage::Rare { n, field }
    })
}

fn parse_bin(args: &str, offset: usize, scope: &FieldScope) -> Result<Stage> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let mut span = None;
    let mut field = None;
    let mut i = 0;
    while !matches!(tokens[i].kind, TokenKind::Eof) {
        match &tokens[i].kind {
            TokenKind::Ident(name) if name == "span" => {
                if !matches!(tokens[i + 1].kind, TokenKind::Eq) {
                    return Err(SiftError::parse("expected span=<width>", tokens[i].pos));
                }
                let value_tok = &tokens[i + 2];
                let text = match &value_tok.kind {
                    TokenKind::Ident(s) => s.clone(),
                    TokenKind::Number(n) => n.to_string(),
                    _ => {
                        return Err(SiftError::parse("invalid span value", value_tok.pos));
                    }
                };
                span = Some(parse_span(&text).ok_or_else(|| {
                    SiftError::parse(format!("invalid span: {}", text), value_tok.pos)
                })?);
                i += 3;
            }
            TokenKind::Ident(name) => {
                field = Some(scope.resolve_or_err(name)?);
                i += 1;
            }
            _ => {
                return Err(SiftError::parse(
                    format!("unexpected token '{}' in bin", tokens[i].text),
                    tokens[i].pos,
                ))
            }
        }
    }
    let span = span.ok_or_else(|| SiftError::parse("bin requires span=<width>", offset))?;
    let field = field.ok_or_else(|| SiftError::parse("bin requires a field", offset))?;
    Ok(Stage::Bin { span, field })
}

fn parse_rex(args: &str, offset: usize, scope: &mut FieldScope) -> Result<Stage> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let mut i = 0;
    let mut field = MESSAGE_COLUMN.to_string();
    if let TokenKind::Ident(kw) = &tokens[i].kind {
        if kw == "field" && matches!(tokens[i + 1].kind, TokenKind::Eq) {
            match &tokens[i + 2].kind {
                TokenKind::Ident(name) => {
                    field = scope.resolve_or_err(name)?;
                    i += 3;
                }
                _ => {
                    return Err(SiftError::parse("expected field name after field=", tokens[i + 2].pos));
                }
            }
        }
    }
    let pattern_tok = &tokens[i];
    let pattern = match &pattern_tok.kind {
        TokenKind::Str(p) => p.clone(),
        _ => {
            return Err(SiftError::parse(
                "rex requires a quoted extraction pattern",
                pattern_tok.pos,
            ))
        }
    };
    // An extraction pattern that does not compile, or has no named
    // captures, is a parse error — never silently ignored
    let re = Regex::new(&pattern).map_err(|e| {
        SiftError::parse(format!("invalid rex pattern: {}", e), pattern_tok.pos)
    })?;
    let names: Vec<&str> = re.capture_names().flatten().collect();
    if names.is_empty() {
        return Err(SiftError::parse(
            "rex pattern must contain at least one named capture group (?P<name>...)",
            pattern_tok.pos,
        ));
    }
    for name in names {
        scope.add_derived(name);
    }
    i += 1;
    if !matches!(tokens[i].kind, TokenKind::Eof) {
        return Err(SiftError::parse(
            format!("unexpected token '{}' after rex pattern", tokens[i].text),
            tokens[i].pos,
        ));
    }
    Ok(Stage::Rex { field, pattern })
}

fn parse_sort(args: &str, offset: usize, scope: &FieldScope) -> Result<Stage> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let mut keys = Vec::new();
    let mut i = 0;
    loop {
        let mut descending = false;
        match &tokens[i].kind {
            TokenKind::Minus => {
                descending = true;
                i += 1;
            }
            TokenKind::Plus => {
                i += 1;
            }
            TokenKind::Ident(kw) if kw.eq_ignore_ascii_case("desc") => {
                descending = true;
                i += 1;
            }
            TokenKind::Ident(kw) if kw.eq_ignore_ascii_case("asc") => {
                i += 1;
            }
            _ => {}
        }
        let field = match &tokens[i].kind {
            TokenKind::Ident(name) => scope.resolve_or_err(name)?,
            _ => {
                return Err(SiftError::parse(
                    format!("expected sort field, found '{}'", tokens[i].text),
                    tokens[i].pos,
                ))
            }
        };
        i += 1;
        // Trailing `desc`/`asc` also accepted
        if let TokenKind::Ident(kw) = &tokens[i].kind {
            if kw.eq_ignore_ascii_case("desc") {
                descending = true;
                i += 1;
            } else if kw.eq_ignore_ascii_case("asc") {
                descending = false;
                i += 1;
            }
        }
        keys.push(SortKey { field, descending });
        if matches!(tokens[i].kind, TokenKind::Comma) {
            i += 1;
            continue;
        }
        break;
    }
    if !matches!(tokens[i].kind, TokenKind::Eof) {
        return Err(SiftError::parse(
            format!("unexpected token '{}' in sort", tokens[i].text),
            tokens[i].pos,
        ));
    }
    if keys.is_empty() {
        return Err(SiftError::parse("sort requires at least one key", offset));
    }
    Ok(Stage::Sort { keys })
}

fn parse_stats(args: &str, offset: usize, scope: &mut FieldScope) -> Result<Stage> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let (aggs, group_by) = parse_agg_list(&tokens, scope)?;
    if aggs.is_empty() {
        return Err(SiftError::parse("stats requires at least one aggregation", offset));
    }
    for agg in &aggs {
        scope.add_derived(&agg.alias);
    }
    Ok(Stage::Stats { aggs, group_by })
}

fn parse_timechart(args: &str, offset: usize, scope: &mut FieldScope) -> Result<Stage> {
    let tokens = tokenize(args, offset, LexMode::Expr)?;
    let mut i = 0;
    // span=<duration> comes first
    let span = match (&tokens[i].kind, tokens.get(i + 1).map(|t| &t.kind), tokens.get(i + 2)) {
        (TokenKind::Ident(kw), Some(TokenKind::Eq), Some(value_tok)) if kw == "span" => {
            let text = match &value_tok.kind {
                TokenKind::Ident(s) => s.clone(),
                TokenKind::Number(n) => n.to_string(),
                _ => return Err(SiftError::parse("invalid span value", value_tok.pos)),
            };
            let span = parse_span(&text).ok_or_else(|| {
                SiftError::parse(format!("invalid span: {}", text), value_tok.pos)
            })?;
            i += 3;
            span
        }
        _ => {
            return Err(SiftError::parse(
                "timechart requires span=<duration> before its aggregations",
                tokens[i].pos,
            ))
        }
    };
    let (aggs, by) = parse_agg_list(&tokens[i..], scope)?;
    if aggs.is_empty() {
        return Err(SiftError::parse("timechart requires at least one aggregation", offset));
    }
    if by.len() > 1 {
        return Err(SiftError::parse(
            "timechart supports at most one split-by field",
            offset,
        ));
    }
    for agg in &aggs {
        scope.add_derived(&agg.alias);
    }
    Ok(Stage::Timechart {
        span,
        aggs,
        split_by: by.into_iter().next(),
    })
}

/// Shared `fn[(field)] [as alias], … [by f1, f2]` grammar for
/// stats/timechart.
fn parse_agg_list(tokens: &[Token], scope: &FieldScope) -> Result<(Vec<AggSpec>, Vec<String>)> {
    let mut aggs = Vec::new();
    let mut group_by = Vec::new();
    let mut i = 0;

    loop {
        let (func_text, func_pos) = match &tokens[i].kind {
            TokenKind::Ident(name) => (name.clone(), tokens[i].pos),
            _ => {
                return Err(SiftError::parse(
                    format!("expected aggregation function, found '{}'", tokens[i].text),
                    tokens[i].pos,
                ))
            }
        };
        let func = AggFunc::from_name(&func_text).ok_or_else(|| {
            SiftError::parse(format!("unknown aggregation function: {}", func_text), func_pos)
        })?;
        i += 1;

        let mut field = None;
        let mut field_text = None;
        if matches!(tokens[i].kind, TokenKind::LParen) {
            i += 1;
            match &tokens[i].kind {
                TokenKind::Star if func == AggFunc::Count => {
                    i += 1;
                }
                TokenKind::RParen => {}
                TokenKind::Ident(name) => {
                    field = Some(scope.resolve_or_err(name)?);
                    field_text = Some(name.clone());
                    i += 1;
                }
                _ => {
                    return Err(SiftError::parse(
                        format!("expected field name, found '{}'", tokens[i].text),
                        tokens[i].pos,
                    ))
                }
            }
            if !matches!(tokens[i].kind, TokenKind::RParen) {
                return Err(SiftError::parse("expected ')'", tokens[i].pos));
            }
            i += 1;
        }
        if func.needs_field() && field.is_none() {
            return Err(SiftError::Validation(format!(
                "{} requires a field argument",
                func_text
            )));
        }

        let mut alias = match &field_text {
            Some(f) => format!("{}({})", func_text, f),
            None => func_text.clone(),
        };
        if let TokenKind::Ident(kw) = &tokens[i].kind {
            if kw.eq_ignore_ascii_case("as") {
                i += 1;
                match &tokens[i].kind {
                    TokenKind::Ident(name) => {
                        alias = name.clone();
                        i += 1;
                    }
                    _ => {
                        return Err(SiftError::parse(
                            format!("expected alias after 'as', found '{}'", tokens[i].text),
                            tokens[i].pos,
                        ))
                    }
                }
            }
        }
        aggs.push(AggSpec { func, field, alias });

        if matches!(tokens[i].kind, TokenKind::Comma) {
            i += 1;
            continue;
        }
        break;
    }

    // Optional trailing `by f1, f2`
    if let TokenKind::Ident(kw) = &tokens[i].kind {
        if kw.eq_ignore_ascii_case("by") {
            i += 1;
            loop {
                match &tokens[i].kind {
                    TokenKind::Ident(name) => {
                        group_by.push(scope.resolve_or_err(name)?);
                        i += 1;
                    }
                    _ => {
                        return Err(SiftError::parse(
                            format!("expected group-by field, found '{}'", tokens[i].text),
                            tokens[i].pos,
                        ))
                    }
                }
                if matches!(tokens[i].kind, TokenKind::Comma) {
                    i += 1;
                    continue;
                }
                break;
            }
        }
    }

    if !matches!(tokens[i].kind, TokenKind::Eof) {
        return Err(SiftError::parse(
            format!("unexpected token '{}' in aggregation list", tokens[i].text),
            tokens[i].pos,
        ));
    }
    Ok((aggs, group_by))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ast::{Expr, Span};

    #[test]
    fn test_basic_pipeline() {
        let p = parse("search status_code>=500 | stats count by hostname | sort -count | limit 10").unwrap();
        assert_eq!(p.stages.len(), 4);
        assert!(matches!(p.stages[0], Stage::Search { .. }));
        assert!(matches!(p.stages[1], Stage::Stats { .. }));
        assert!(matches!(p.stages[2], Stage::Sort { .. }));
        assert!(matches!(p.stages[3], Stage::Limit { n: 10 }));
    }

    #[test]
    fn test_pipe_leading_query_gets_implicit_search() {
        let p = parse("| stats count").unwrap();
        assert!(matches!(
            p.stages[0],
            Stage::Search { predicate: Expr::MatchAll }
        ));
        assert!(matches!(p.stages[1], Stage::Stats { .. }));
    }

    #[test]
    fn test_leading_command_gets_implicit_search() {
        let p = parse("stats count by hostname").unwrap();
        assert_eq!(p.stages.len(), 2);
        assert!(matches!(p.stages[0], Stage::Search { .. }));
    }

    #[test]
    fn test_free_text_first_stage() {
        let p = parse("connection refused | head 5").unwrap();
        assert!(matches!(p.stages[0], Stage::Search { .. }));
        assert!(matches!(p.stages[1], Stage::Head { n: 5 }));
    }

    #[test]
    fn test_unknown_command_is_parse_error() {
        match parse("search * | frobnicate 3") {
            Err(SiftError::Parse { message, .. }) => {
                assert!(message.contains("unknown command"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_quoted_pipe_does_not_split() {
        let p = parse(r#"message~"a|b" | head 1"#).unwrap();
        assert_eq!(p.stages.len(), 2);
    }

    #[test]
    fn test_stats_aliases_and_group_by() {
        let p = parse("search * | stats count, avg(bytes) as avg_bytes, p95(duration_ms) by hostname, app_name").unwrap();
        match &p.stages[1] {
            Stage::Stats { aggs, group_by } => {
                assert_eq!(aggs.len(), 3);
                assert_eq!(aggs[0].alias, "count");
                assert_eq!(aggs[1].alias, "avg_bytes");
                assert_eq!(aggs[2].alias, "p95(duration_ms)");
                assert_eq!(aggs[2].func, AggFunc::Percentile(0.95));
                assert_eq!(group_by, &vec!["hostname".to_string(), "app_name".to_string()]);
            }
            other => panic!("expected stats, got {:?}", other),
        }
    }

    #[test]
    fn test_stats_alias_usable_downstream() {
        let p = parse("search * | stats avg(bytes) as ab by hostname | where ab > 100").unwrap();
        assert!(matches!(p.stages[2], Stage::Where { .. }));
    }

    #[test]
    fn test_timechart() {
        let p = parse("search * | timechart span=1h count, avg(bytes) by app_name").unwrap();
        match &p.stages[1] {
            Stage::Timechart { span, aggs, split_by } => {
                assert_eq!(*span, Span::Time(3_600_000));
                assert_eq!(aggs.len(), 2);
                assert_eq!(split_by.as_deref(), Some("app_name"));
            }
            other => panic!("expected timechart, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_syntax_variants() {
        let a = parse("search * | stats count by hostname | sort -count").unwrap();
        let b = parse("search * | stats count by hostname | sort desc count").unwrap();
        assert_eq!(a.stages[2], b.stages[2]);
        let c = parse("search * | sort -bytes, +hostname").unwrap();
        match &c.stages[1] {
            Stage::Sort { keys } => {
                assert!(keys[0].descending);
                assert!(!keys[1].descending);
            }
            other => panic!("expected sort, got {:?}", other),
        }
    }

    #[test]
    fn test_rex_introduces_capture_fields() {
        let p = parse(r#"search * | rex "user=(?P<username>\w+)" | where len(username) > 2"#).unwrap();
        match &p.stages[1] {
            Stage::Rex { field, pattern } => {
                assert_eq!(field, "message");
                assert!(pattern.contains("?P<username>"));
            }
            other => panic!("expected rex, got {:?}", other),
        }
    }

    #[test]
    fn test_rex_invalid_pattern_is_parse_error() {
        assert!(matches!(
            parse(r#"search * | rex "user=(?P<bad""#),
            Err(SiftError::Parse { .. })
        ));
        // Pattern without named captures is rejected too
        assert!(matches!(
            parse(r#"search * | rex "user=\w+""#),
            Err(SiftError::Parse { .. })
        ));
    }

    #[test]
    fn test_rex_explicit_field() {
        let p = parse(r#"search * | rex field=user_agent "(?P<browser>\w+)/""#).unwrap();
        match &p.stages[1] {
            Stage::Rex { field, .. } => assert_eq!(field, "user_agent"),
            other => panic!("expected rex, got {:?}", other),
        }
    }

    #[test]
    fn test_fields_include_exclude() {
        let inc = parse("search * | fields hostname, bytes").unwrap();
        assert!(matches!(
            &inc.stages[1],
            Stage::Fields { mode: FieldMode::Include, .. }
        ));
        let exc = parse("search * | fields - attributes, user_agent").unwrap();
        match &exc.stages[1] {
            Stage::Fields { mode: FieldMode::Exclude, fields } => {
                assert_eq!(fields, &vec!["attributes".to_string(), "user_agent".to_string()]);
            }
            other => panic!("expected fields, got {:?}", other),
        }
    }

    #[test]
    fn test_rename_pairs() {
        let p = parse("search * | rename hostname as server, bytes as size_bytes").unwrap();
        match &p.stages[1] {
            Stage::Rename { pairs } => {
                assert_eq!(pairs[0], ("hostname".to_string(), "server".to_string()));
                assert_eq!(pairs[1], ("bytes".to_string(), "size_bytes".to_string()));
            }
            other => panic!("expected rename, got {:?}", other),
        }
    }

    #[test]
    fn test_top_default_n() {
        let p = parse("search * | top app_name").unwrap();
        assert!(matches!(&p.stages[1], Stage::Top { n: 10, .. }));
        let q = parse("search * | rare 3 hostname").unwrap();
        assert!(matches!(&q.stages[1], Stage::Rare { n: 3, .. }));
    }

    #[test]
    fn test_bin_numeric_and_time() {
        let p = parse("search * | bin span=100 bytes").unwrap();
        assert!(matches!(&p.stages[1], Stage::Bin { span: Span::Numeric(_), .. }));
        let q = parse("search * | bin span=5m timestamp").unwrap();
        assert!(matches!(&q.stages[1], Stage::Bin { span: Span::Time(300_000), .. }));
    }

    #[test]
    fn test_dedup_multi_field() {
        let p = parse("search * | dedup hostname, app_name").unwrap();
        match &p.stages[1] {
            Stage::Dedup { fields } => assert_eq!(fields.len(), 2),
            other => panic!("expected dedup, got {:?}", other),
        }
    }

    #[test]
    fn test_alias_in_field_list() {
        let p = parse("search * | table host, msg").unwrap();
        match &p.stages[1] {
            Stage::Table { fields } => {
                assert_eq!(fields, &vec!["hostname".to_string(), "message".to_string()]);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }
}
