//! DSL tokenizer
//!
//! Tokenizes one pipeline stage at a time (the parser splits on unquoted
//! `|` first). Two modes: search-term mode keeps `*`, `-` and `/` inside
//! bare words so `host=web-*` and free-text paths lex as single terms;
//! expression mode treats them as arithmetic operators for `eval`/`where`.

use crate::{Result, SiftError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),
    // Comparison operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Tilde,
    Colon,
    // Arithmetic operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // Logical keywords
    And,
    Or,
    Not,
    // Structure
    LParen,
    RParen,
    Comma,
    Pipe,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset into the original query text.
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    /// `search` stage arguments: words may contain `*`, `-`, `/`.
    Search,
    /// `eval`/`where`/`stats` arguments: full operator set.
    Expr,
}

fn is_word_start(c: char, mode: LexMode) -> bool {
    c.is_alphanumeric()
        || c == '_'
        || c == '.'
        || (mode == LexMode::Search && (c == '*' || c == '/'))
}

fn is_word_continue(c: char, mode: LexMode) -> bool {
    c.is_alphanumeric()
        || c == '_'
        || c == '.'
        || (mode == LexMode::Search && (c == '*' || c == '-' || c == '/'))
}

/// Tokenize one stage. `base_pos` is the stage's byte offset in the full
/// query, so error positions point into the original text.
pub fn tokenize(text: &str, base_pos: usize, mode: LexMode) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Byte offset of char index i
    let byte_pos = |idx: usize| -> usize {
        base_pos + chars[..idx].iter().map(|c| c.len_utf8()).sum::<usize>()
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let pos = byte_pos(i);

        // Quoted strings, double or single
        if c == '"' || c == '\'' {
            let quote = c;
            let mut out = String::new();
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() {
                match chars[j] {
                    '\\' if j + 1 < chars.len() => {
                        let esc = chars[j + 1];
                        match esc {
                            'n' => out.push('\n'),
                            't' => out.push('\t'),
                            '\\' => out.push('\\'),
                            c if c == quote => out.push(quote),
                            // Leave unknown escapes intact so regex
                            // classes like \w and \d pass through
                            other => {
                                out.push('\\');
                                out.push(other);
                            }
                        }
                        j += 2;
                    }
                    ch if ch == quote => {
                        closed = true;
                        j += 1;
                        break;
                    }
                    ch => {
                        out.push(ch);
                        j += 1;
                    }
                }
            }
            if !closed {
                return Err(SiftError::parse("unterminated string literal", pos));
            }
            tokens.push(Token {
                kind: TokenKind::Str(out.clone()),
                text: out,
                pos,
            });
            i = j;
            continue;
        }

        // Multi-char operators first
        if c == '!' && chars.get(i + 1) == Some(&'=') {
            tokens.push(Token { kind: TokenKind::Ne, text: "!=".into(), pos });
            i += 2;
            continue;
        }
        if c == '<' {
            if chars.get(i + 1) == Some(&'=') {
                tokens.push(Token { kind: TokenKind::Le, text: "<=".into(), pos });
                i += 2;
            } else {
                tokens.push(Token { kind: TokenKind::Lt, text: "<".into(), pos });
                i += 1;
            }
            continue;
        }
        if c == '>' {
            if chars.get(i + 1) == Some(&'=') {
                tokens.push(Token { kind: TokenKind::Ge, text: ">=".into(), pos });
                i += 2;
            } else {
                tokens.push(Token { kind: TokenKind::Gt, text: ">".into(), pos });
                i += 1;
            }
            continue;
        }
        if c == '=' {
            // Accept both `=` and `==`
            if chars.get(i + 1) == Some(&'=') {
                tokens.push(Token { kind: TokenKind::Eq, text: "==".into(), pos });
                i += 2;
            } else {
                tokens.push(Token { kind: TokenKind::Eq, text: "=".into(), pos });
                i += 1;
            }
            continue;
        }

        let single = match c {
            '~' => Some(TokenKind::Tilde),
            ':' => Some(TokenKind::Colon),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            ',' => Some(TokenKind::Comma),
            '|' => Some(TokenKind::Pipe),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '%' => Some(TokenKind::Percent),
            '*' if mode == LexMode::Expr => Some(TokenKind::Star),
            '/' if mode == LexMode::Expr => Some(TokenKind::Slash),
            _ => None,
        };
        if let Some(kind) = single {
            tokens.push(Token { kind, text: c.to_string(), pos });
            i += 1;
            continue;
        }

        // Bare word: scan maximally, then classify number vs identifier.
        if is_word_start(c, mode) {
            let mut j = i;
            while j < chars.len() && is_word_continue(chars[j], mode) {
                j += 1;
            }
            let word: String = chars[i..j].iter().collect();
            let kind = if let Ok(n) = word.parse::<f64>() {
                TokenKind::Number(n)
            } else {
                match word.to_uppercase().as_str() {
                    "AND" => TokenKind::And,
                    "OR" => TokenKind::Or,
                    "NOT" => TokenKind::Not,
                    _ => TokenKind::Ident(word.clone()),
                }
            };
            tokens.push(Token { kind, text: word, pos });
            i = j;
            continue;
        }

        return Err(SiftError::parse(
            format!("unexpected character '{}'", c),
            pos,
        ));
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        text: String::new(),
        pos: base_pos + text.len(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str, mode: LexMode) -> Vec<TokenKind> {
        tokenize(text, 0, mode).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_search_terms() {
        let toks = kinds("status_code>=500 host=web-*", LexMode::Search);
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("status_code".into()),
                TokenKind::Ge,
                TokenKind::Number(500.0),
                TokenKind::Ident("host".into()),
                TokenKind::Eq,
                TokenKind::Ident("web-*".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_expr_operators() {
        let toks = kinds("bytes/1024 + 1", LexMode::Expr);
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("bytes".into()),
                TokenKind::Slash,
                TokenKind::Number(1024.0),
                TokenKind::Plus,
                TokenKind::Number(1.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_quoted_string_with_escape() {
        let toks = kinds(r#"message~"disk \"full\"""#, LexMode::Search);
        assert_eq!(toks[2], TokenKind::Str(r#"disk "full""#.into()));
    }

    #[test]
    fn test_logic_keywords_case_insensitive() {
        let toks = kinds("a=1 and NOT b=2", LexMode::Search);
        assert!(toks.contains(&TokenKind::And));
        assert!(toks.contains(&TokenKind::Not));
    }

    #[test]
    fn test_lone_wildcard() {
        let toks = kinds("*", LexMode::Search);
        assert_eq!(toks[0], TokenKind::Ident("*".into()));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("\"oops", 0, LexMode::Search).is_err());
    }

    #[test]
    fn test_positions_offset_by_base() {
        let toks = tokenize("a=1", 10, LexMode::Search).unwrap();
        assert_eq!(toks[0].pos, 10);
        assert_eq!(toks[1].pos, 11);
        assert_eq!(toks[2].pos, 12);
    }
}
