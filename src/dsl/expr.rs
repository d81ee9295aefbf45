//! Expression compiler and row-time interpreter
//!
//! Compiles search predicates (`status_code>=500 host=web-*`), `where`
//! clauses, and `eval` assignments into the shared [`Expr`] tree. Field
//! references are resolved against the schema (plus any fields derived
//! earlier in the pipeline) at compile time; value typing is checked per
//! row at execution time.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use regex::Regex;

use crate::dsl::ast::{BinOp, Expr, TextPattern, UnaryOp};
use crate::dsl::functions;
use crate::dsl::lexer::{Token, TokenKind};
use crate::dsl::schema::{schema, MESSAGE_COLUMN};
use crate::dsl::value::{Row, Value};
use crate::{Result, SiftError};

// Compiled regexes are reused across rows; queries repeat the same small
// pattern set. The cache is process-wide, so it is capped: once full it
// is dropped wholesale rather than tracking recency per entry.
const REGEX_CACHE_MAX: usize = 256;

static REGEX_CACHE: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();

fn cached_regex(pattern: &str) -> Option<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().ok()?;
    if let Some(re) = cache.get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(pattern).ok()?;
    if cache.len() >= REGEX_CACHE_MAX {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Some(re)
}

/// Fields visible to an expression: the static schema plus everything
/// introduced upstream by `eval`, `rex`, `stats`, `timechart`, `top`/`rare`.
#[derive(Debug, Clone, Default)]
pub struct FieldScope {
    derived: HashSet<String>,
}

impl FieldScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_derived(&mut self, name: &str) {
        self.derived.insert(name.to_string());
    }

    /// Resolve a user-written name: canonical schema name, or a derived
    /// field verbatim.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(canonical) = schema().canonical_name(name) {
            return Some(canonical.to_string());
        }
        if self.derived.contains(name) {
            return Some(name.to_string());
        }
        None
    }

    pub fn resolve_or_err(&self, name: &str) -> Result<String> {
        self.resolve(name).ok_or_else(|| {
            SiftError::Validation(format!("unknown field: {}", name))
        })
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, idx: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> &Token {
        let tok = &self.tokens[self.idx.min(self.tokens.len() - 1)];
        if self.idx < self.tokens.len() {
            self.idx += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.idx += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            let tok = self.peek();
            Err(SiftError::parse(
                format!("expected {}, found '{}'", what, tok.text),
                tok.pos,
            ))
        }
    }
}

fn comparison_op(kind: &TokenKind) -> Option<BinOp> {
    match kind {
        TokenKind::Eq => Some(BinOp::Eq),
        TokenKind::Ne => Some(BinOp::Ne),
        TokenKind::Lt => Some(BinOp::Lt),
        TokenKind::Le => Some(BinOp::Le),
        TokenKind::Gt => Some(BinOp::Gt),
        TokenKind::Ge => Some(BinOp::Ge),
        _ => None,
    }
}

/// Regex metacharacters that flip `~`/`:` from substring to regex
/// interpretation. A bare `*` stays in wildcard territory.
fn has_regex_metachar(s: &str) -> bool {
    s.chars().any(|c| ".\\+?[]{}()^$".contains(c))
}

/// Compile a wildcard value into its positional pattern.
fn wildcard_pattern(value: &str) -> TextPattern {
    let starts = value.starts_with('*');
    let ends = value.ends_with('*');
    let inner = value.trim_matches('*');
    // Wildcards in the middle need a real regex
    if inner.contains('*') {
        let parts: Vec<String> = value.split('*').map(|p| regex::escape(p)).collect();
        return TextPattern::Regex(format!("^{}$", parts.join(".*")));
    }
    match (starts, ends) {
        (true, true) | (false, false) => TextPattern::Contains(inner.to_string()),
        (false, true) => TextPattern::Prefix(inner.to_string()),
        (true, false) => TextPattern::Suffix(inner.to_string()),
    }
}

/// The `~`/`:` right-hand side: regex when it looks like one and
/// compiles, wildcard when starred, substring otherwise.
fn match_pattern(value: &str) -> TextPattern {
    if has_regex_metachar(value) {
        if Regex::new(value).is_ok() {
            return TextPattern::Regex(value.to_string());
        }
        return TextPattern::Contains(value.to_string());
    }
    if value.contains('*') {
        return wildcard_pattern(value);
    }
    TextPattern::Contains(value.to_string())
}

// ---------------------------------------------------------------------
// Search predicate grammar
//
// Precedence: NOT > AND > implicit-AND > OR.
// ---------------------------------------------------------------------

/// Compile the token stream of a `search` stage (or the implicit leading
/// stage) into a predicate tree.
pub fn compile_search_predicate(tokens: &[Token], scope: &FieldScope) -> Result<Expr> {
    let mut cur = Cursor::new(tokens);
    if cur.at_end() {
        return Ok(Expr::MatchAll);
    }
    let expr = search_or(&mut cur, scope)?;
    if !cur.at_end() {
        let tok = cur.peek();
        return Err(SiftError::parse(
            format!("unexpected token '{}' in search expression", tok.text),
            tok.pos,
        ));
    }
    Ok(expr)
}

fn search_or(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let mut left = search_implicit(cur, scope)?;
    while cur.eat(&TokenKind::Or) {
        let right = search_implicit(cur, scope)?;
        left = Expr::binary(BinOp::Or, left, right);
    }
    Ok(left)
}

fn search_implicit(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let mut left = search_and(cur, scope)?;
    // Juxtaposed terms combine with implicit AND
    loop {
        match cur.peek().kind {
            TokenKind::Eof | TokenKind::Or | TokenKind::RParen => break,
            _ => {
                let right = search_and(cur, scope)?;
                left = Expr::binary(BinOp::And, left, right);
            }
        }
    }
    Ok(left)
}

fn search_and(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let mut left = search_unary(cur, scope)?;
    while cur.eat(&TokenKind::And) {
        let right = search_unary(cur, scope)?;
        left = Expr::binary(BinOp::And, left, right);
    }
    Ok(left)
}

fn search_unary(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    if cur.eat(&TokenKind::Not) {
        return Ok(Expr::not(search_unary(cur, scope)?));
    }
    if cur.eat(&TokenKind::LParen) {
        let inner = search_or(cur, scope)?;
        cur.expect(TokenKind::RParen, "')'")?;
        return Ok(inner);
    }
    search_term(cur, scope)
}

fn search_term(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let tok = cur.next().clone();
    let term_text = match &tok.kind {
        TokenKind::Ident(s) => s.clone(),
        TokenKind::Str(s) => s.clone(),
        TokenKind::Number(n) => n.to_string(),
        _ => {
            return Err(SiftError::parse(
                format!("expected search term, found '{}'", tok.text),
                tok.pos,
            ))
        }
    };

    // A lone `*` matches everything
    if term_text == "*" && comparison_token(&cur.peek().kind).is_none() {
        return Ok(Expr::MatchAll);
    }

    // field<op>value?
    if let Some(op) = comparison_token(&cur.peek().kind) {
        cur.next();
        let field = scope.resolve_or_err(&term_text)?;
        let val_tok = cur.next().clone();
        let (val_text, is_number) = match val_tok.kind {
            TokenKind::Ident(s) => (s, false),
            TokenKind::Str(s) => (s, false),
            TokenKind::Number(n) => (n.to_string(), true),
            _ => {
                return Err(SiftError::parse(
                    format!("expected value after operator, found '{}'", val_tok.text),
                    val_tok.pos,
                ))
            }
        };
        return compile_comparison(&field, op, &val_text, is_number);
    }

    // Bare term: free-text match against the message field
    let pattern = if term_text.contains('*') {
        wildcard_pattern(&term_text)
    } else {
        TextPattern::Contains(term_text)
    };
    Ok(Expr::Match {
        field: MESSAGE_COLUMN.to_string(),
        pattern,
    })
}

/// Comparison operators usable in a search term, including the
/// Splunk-compat `~` and `:` match forms.
enum SearchOp {
    Cmp(BinOp),
    Matches,
}

fn comparison_token(kind: &TokenKind) -> Option<SearchOp> {
    if let Some(op) = comparison_op(kind) {
        return Some(SearchOp::Cmp(op));
    }
    match kind {
        TokenKind::Tilde | TokenKind::Colon => Some(SearchOp::Matches),
        _ => None,
    }
}

fn compile_comparison(field: &str, op: SearchOp, value: &str, is_number: bool) -> Result<Expr> {
    match op {
        SearchOp::Matches => Ok(Expr::Match {
            field: field.to_string(),
            pattern: match_pattern(value),
        }),
        SearchOp::Cmp(cmp) => {
            // Wildcards turn (in)equality into a text match
            if !is_number && value.contains('*') && matches!(cmp, BinOp::Eq | BinOp::Ne) {
                let matched = Expr::Match {
                    field: field.to_string(),
                    pattern: wildcard_pattern(value),
                };
                return Ok(if cmp == BinOp::Ne {
                    Expr::not(matched)
                } else {
                    matched
                });
            }
            let literal = if is_number {
                Value::from_f64(value.parse::<f64>().unwrap_or(f64::NAN))
            } else {
                Value::String(value.to_string())
            };
            Ok(Expr::binary(
                cmp,
                Expr::Field(field.to_string()),
                Expr::Literal(literal),
            ))
        }
    }
}

// ---------------------------------------------------------------------
// where / eval expression grammar
// ---------------------------------------------------------------------

/// Compile a `where`/`filter` boolean expression.
pub fn compile_bool_expr(tokens: &[Token], scope: &FieldScope) -> Result<Expr> {
    let mut cur = Cursor::new(tokens);
    let expr = expr_or(&mut cur, scope)?;
    if !cur.at_end() {
        let tok = cur.peek();
        return Err(SiftError::parse(
            format!("unexpected token '{}' in expression", tok.text),
            tok.pos,
        ));
    }
    Ok(expr)
}

/// Compile the `name=expr[, name=expr…]` argument list of `eval`.
pub fn compile_eval_assignments(
    tokens: &[Token],
    scope: &FieldScope,
) -> Result<Vec<(String, Expr)>> {
    let mut cur = Cursor::new(tokens);
    let mut assignments = Vec::new();
    loop {
        let name_tok = cur.next().clone();
        let raw_name = match &name_tok.kind {
            TokenKind::Ident(s) => s.clone(),
            _ => {
                return Err(SiftError::parse(
                    format!("expected field name, found '{}'", name_tok.text),
                    name_tok.pos,
                ))
            }
        };
        // Assigning to an alias writes the canonical field
        let name = scope.resolve(&raw_name).unwrap_or(raw_name);
        cur.expect(TokenKind::Eq, "'='")?;
        let expr = expr_or(&mut cur, scope)?;
        assignments.push((name, expr));
        if !cur.eat(&TokenKind::Comma) {
            break;
        }
    }
    if !cur.at_end() {
        let tok = cur.peek();
        return Err(SiftError::parse(
            format!("unexpected token '{}' after eval assignment", tok.text),
            tok.pos,
        ));
    }
    Ok(assignments)
}

fn expr_or(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let mut left = expr_and(cur, scope)?;
    while cur.eat(&TokenKind::Or) {
        let right = expr_and(cur, scope)?;
        left = Expr::binary(BinOp::Or, left, right);
    }
    Ok(left)
}

fn expr_and(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let mut left = expr_not(cur, scope)?;
    while cur.eat(&TokenKind::And) {
        let right = expr_not(cur, scope)?;
        left = Expr::binary(BinOp::And, left, right);
    }
    Ok(left)
}

fn expr_not(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    if cur.eat(&TokenKind::Not) {
        return Ok(Expr::not(expr_not(cur, scope)?));
    }
    expr_cmp(cur, scope)
}

fn expr_cmp(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let left = expr_add(cur, scope)?;
    if let Some(op) = comparison_op(&cur.peek().kind) {
        cur.next();
        let right = expr_add(cur, scope)?;
        return Ok(Expr::binary(op, left, right));
    }
    if matches!(cur.peek().kind, TokenKind::Tilde | TokenKind::Colon) {
        let op_tok = cur.next().clone();
        let field = match &left {
            Expr::Field(name) => name.clone(),
            _ => {
                return Err(SiftError::parse(
                    "left side of a match operator must be a field",
                    op_tok.pos,
                ))
            }
        };
        let val_tok = cur.next().clone();
        let value = match val_tok.kind {
            TokenKind::Str(s) | TokenKind::Ident(s) => s,
            TokenKind::Number(n) => n.to_string(),
            _ => {
                return Err(SiftError::parse(
                    format!("expected match value, found '{}'", val_tok.text),
                    val_tok.pos,
                ))
            }
        };
        return Ok(Expr::Match {
            field,
            pattern: match_pattern(&value),
        });
    }
    Ok(left)
}

fn expr_add(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let mut left = expr_mul(cur, scope)?;
    loop {
        let op = match cur.peek().kind {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            _ => break,
        };
        cur.next();
        let right = expr_mul(cur, scope)?;
        left = Expr::binary(op, left, right);
    }
    Ok(left)
}

fn expr_mul(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let mut left = expr_unary(cur, scope)?;
    loop {
        let op = match cur.peek().kind {
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            _ => break,
        };
        cur.next();
        let right = expr_unary(cur, scope)?;
        left = Expr::binary(op, left, right);
    }
    Ok(left)
}

fn expr_unary(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    if cur.eat(&TokenKind::Minus) {
        let inner = expr_unary(cur, scope)?;
        return Ok(Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(inner),
        });
    }
    expr_primary(cur, scope)
}

fn expr_primary(cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let tok = cur.next().clone();
    match &tok.kind {
        TokenKind::Number(n) => Ok(Expr::Literal(Value::from_f64(*n))),
        TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
        TokenKind::LParen => {
            let inner = expr_or(cur, scope)?;
            cur.expect(TokenKind::RParen, "')'")?;
            Ok(inner)
        }
        TokenKind::Ident(name) => {
            if cur.eat(&TokenKind::LParen) {
                return compile_call(name, &tok, cur, scope);
            }
            match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Field(scope.resolve_or_err(name)?)),
            }
        }
        _ => Err(SiftError::parse(
            format!("unexpected token '{}'", tok.text),
            tok.pos,
        )),
    }
}

fn compile_call(name: &str, name_tok: &Token, cur: &mut Cursor, scope: &FieldScope) -> Result<Expr> {
    let def = functions::lookup(name).ok_or_else(|| {
        SiftError::parse(format!("unknown function: {}", name), name_tok.pos)
    })?;
    let mut args = Vec::new();
    if !cur.eat(&TokenKind::RParen) {
        loop {
            args.push(expr_or(cur, scope)?);
            if cur.eat(&TokenKind::Comma) {
                continue;
            }
            cur.expect(TokenKind::RParen, "')'")?;
            break;
        }
    }
    if args.len() < def.min_args || def.max_args.map(|m| args.len() > m).unwrap_or(false) {
        return Err(SiftError::Validation(format!(
            "{} expects {}{} argument(s), got {}",
            name,
            def.min_args,
            match def.max_args {
                Some(m) if m != def.min_args => format!("..{}", m),
                None => "+".to_string(),
                _ => String::new(),
            },
            args.len()
        )));
    }
    Ok(Expr::Call {
        func: name.to_string(),
        args,
    })
}

// ---------------------------------------------------------------------
// Row-time interpretation
// ---------------------------------------------------------------------

/// Evaluate an expression against one row. Typing problems degrade to
/// [`Value::Undefined`]; this function never fails.
pub fn eval_expr(expr: &Expr, row: &Row) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Field(name) => row.get_or_null(name),
        Expr::MatchAll => Value::Bool(true),
        Expr::Unary { op, expr } => match op {
            UnaryOp::Not => Value::Bool(!eval_expr(expr, row).is_truthy()),
            UnaryOp::Neg => match eval_expr(expr, row).as_f64() {
                Some(n) => Value::from_f64(-n),
                None => Value::Undefined,
            },
        },
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, row),
        Expr::Call { func, args } => {
            let values: Vec<Value> = args.iter().map(|a| eval_expr(a, row)).collect();
            functions::call(func, &values)
        }
        Expr::Match { field, pattern } => {
            Value::Bool(eval_match(&row.get_or_null(field), pattern))
        }
    }
}

/// Predicate view of an expression.
pub fn eval_predicate(expr: &Expr, row: &Row) -> bool {
    eval_expr(expr, row).is_truthy()
}

fn eval_binary(op: BinOp, left: &Expr, right: &Expr, row: &Row) -> Value {
    match op {
        BinOp::And => {
            // Short-circuit
            if !eval_expr(left, row).is_truthy() {
                return Value::Bool(false);
            }
            Value::Bool(eval_expr(right, row).is_truthy())
        }
        BinOp::Or => {
            if eval_expr(left, row).is_truthy() {
                return Value::Bool(true);
            }
            Value::Bool(eval_expr(right, row).is_truthy())
        }
        _ => {
            let lv = eval_expr(left, row);
            let rv = eval_expr(right, row);
            match op {
                BinOp::Eq => Value::Bool(lv.loose_eq(&rv)),
                BinOp::Ne => {
                    if lv.is_undefined() || rv.is_undefined() {
                        Value::Bool(false)
                    } else {
                        Value::Bool(!lv.loose_eq(&rv))
                    }
                }
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let ord = lv.partial_cmp_value(&rv);
                    let ok = match (op, ord) {
                        (BinOp::Lt, Some(o)) => o.is_lt(),
                        (BinOp::Le, Some(o)) => o.is_le(),
                        (BinOp::Gt, Some(o)) => o.is_gt(),
                        (BinOp::Ge, Some(o)) => o.is_ge(),
                        _ => false,
                    };
                    Value::Bool(ok)
                }
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                    let (a, b) = match (lv.as_f64(), rv.as_f64()) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return Value::Undefined,
                    };
                    match op {
                        BinOp::Add => Value::from_f64(a + b),
                        BinOp::Sub => Value::from_f64(a - b),
                        BinOp::Mul => Value::from_f64(a * b),
                        // Division by zero is the undefined marker, not
                        // an error and not infinity
                        BinOp::Div if b == 0.0 => Value::Undefined,
                        BinOp::Div => Value::from_f64(a / b),
                        BinOp::Mod if b == 0.0 => Value::Undefined,
                        BinOp::Mod => Value::from_f64(a % b),
                        _ => unreachable!(),
                    }
                }
                BinOp::And | BinOp::Or => unreachable!(),
            }
        }
    }
}

/// Text matching for free text, wildcards and `~`/`:`. All variants are
/// case-insensitive; `=` equality goes through `loose_eq` instead and
/// stays exact.
pub fn eval_match(value: &Value, pattern: &TextPattern) -> bool {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => value.to_string(),
        Value::Json(j) => j.to_string(),
        Value::Null | Value::Undefined => return false,
    };
    let haystack = text.to_lowercase();
    match pattern {
        TextPattern::Contains(p) => haystack.contains(&p.to_lowercase()),
        TextPattern::Prefix(p) => haystack.starts_with(&p.to_lowercase()),
        TextPattern::Suffix(p) => haystack.ends_with(&p.to_lowercase()),
        TextPattern::Regex(p) => {
            let anchored = format!("(?i){}", p);
            match cached_regex(&anchored) {
                Some(re) => re.is_match(&text),
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::lexer::{tokenize, LexMode};

    fn search(text: &str) -> Result<Expr> {
        let tokens = tokenize(text, 0, LexMode::Search)?;
        compile_search_predicate(&tokens, &FieldScope::new())
    }

    fn where_expr(text: &str) -> Result<Expr> {
        let tokens = tokenize(text, 0, LexMode::Expr)?;
        compile_bool_expr(&tokens, &FieldScope::new())
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_implicit_and_precedence() {
        // a=1 b=2 OR c=3 parses as (a=1 AND b=2) OR c=3
        let expr = search("severity=1 bytes=2 OR status_code=3").unwrap();
        match expr {
            Expr::Binary { op: BinOp::Or, .. } => {}
            other => panic!("expected OR at root, got {:?}", other),
        }
    }

    #[test]
    fn test_alias_resolved_at_compile_time() {
        let expr = search("host=web1").unwrap();
        let mut fields = Vec::new();
        expr.referenced_fields(&mut fields);
        assert_eq!(fields, vec!["hostname".to_string()]);
    }

    #[test]
    fn test_unknown_field_is_validation_error() {
        match search("nosuch=1") {
            Err(SiftError::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_positions() {
        let prefix = search("hostname=web*").unwrap();
        assert!(matches!(
            prefix,
            Expr::Match { pattern: TextPattern::Prefix(_), .. }
        ));
        let suffix = search("hostname=*01").unwrap();
        assert!(matches!(
            suffix,
            Expr::Match { pattern: TextPattern::Suffix(_), .. }
        ));
        let contains = search("hostname=*web*").unwrap();
        assert!(matches!(
            contains,
            Expr::Match { pattern: TextPattern::Contains(_), .. }
        ));
    }

    #[test]
    fn test_match_all() {
        assert_eq!(search("*").unwrap(), Expr::MatchAll);
    }

    #[test]
    fn test_free_text_targets_message() {
        let expr = search("timeout").unwrap();
        match expr {
            Expr::Match { field, pattern: TextPattern::Contains(p) } => {
                assert_eq!(field, "message");
                assert_eq!(p, "timeout");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_tilde_substring_vs_regex() {
        let plain = search("message~timeout").unwrap();
        assert!(matches!(plain, Expr::Match { pattern: TextPattern::Contains(_), .. }));
        let regex = search(r#"message~"user=\w+""#).unwrap();
        assert!(matches!(regex, Expr::Match { pattern: TextPattern::Regex(_), .. }));
        // Colon behaves identically
        let colon = search("message:timeout").unwrap();
        assert!(matches!(colon, Expr::Match { pattern: TextPattern::Contains(_), .. }));
    }

    #[test]
    fn test_eval_division_by_zero() {
        let tokens = tokenize("kb=bytes/1024, bad=bytes/0", 0, LexMode::Expr).unwrap();
        let assignments = compile_eval_assignments(&tokens, &FieldScope::new()).unwrap();
        let r = row(&[("bytes", Value::Int(2048))]);
        assert_eq!(eval_expr(&assignments[0].1, &r), Value::Int(2));
        assert_eq!(eval_expr(&assignments[1].1, &r), Value::Undefined);
    }

    #[test]
    fn test_comparison_against_undefined_is_false() {
        let expr = where_expr("bytes / 0 > 1").unwrap();
        let r = row(&[("bytes", Value::Int(10))]);
        assert!(!eval_predicate(&expr, &r));
        let ne = where_expr("bytes / 0 != 5").unwrap();
        assert!(!eval_predicate(&ne, &r));
    }

    #[test]
    fn test_where_function_call() {
        let expr = where_expr("len(hostname) > 3").unwrap();
        assert!(eval_predicate(&expr, &row(&[("hostname", Value::String("web-01".into()))])));
        assert!(!eval_predicate(&expr, &row(&[("hostname", Value::String("db".into()))])));
    }

    #[test]
    fn test_unknown_function_is_parse_error() {
        match where_expr("frobnicate(bytes) > 1") {
            Err(SiftError::Parse { .. }) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_arity_is_validation_error() {
        match where_expr("abs(bytes, bytes) > 1") {
            Err(SiftError::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_case_insensitive_matching() {
        assert!(eval_match(
            &Value::String("Disk FULL".into()),
            &TextPattern::Contains("disk".into())
        ));
        assert!(eval_match(
            &Value::String("ERROR at line 3".into()),
            &TextPattern::Regex("error.*line".into())
        ));
    }

    #[test]
    fn test_regex_cache_stays_bounded() {
        for i in 0..(REGEX_CACHE_MAX * 2) {
            cached_regex(&format!("pattern-{}", i));
        }
        let cache = REGEX_CACHE.get().unwrap().lock().unwrap();
        assert!(cache.len() <= REGEX_CACHE_MAX);
    }

    #[test]
    fn test_numeric_comparison() {
        let expr = search("status_code>=500").unwrap();
        assert!(eval_predicate(&expr, &row(&[("status_code", Value::Int(503))])));
        assert!(!eval_predicate(&expr, &row(&[("status_code", Value::Int(200))])));
    }
}
