//! Tokenizer for the SQL-like dialect.
//!
//! Tokens carry the byte offset of their first character, which feeds the
//! `position` field of `QuerySyntax` errors.

use vellum_core::{Error, Result};

/// A lexed token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Bare identifier or keyword; keywords are resolved by the parser.
    Ident(String),
    /// Single-quoted string literal, quotes and escapes resolved.
    String(String),
    /// Numeric literal.
    Number(f64),
    /// `$name` parameter reference.
    Parameter(String),
    Star,
    Comma,
    Dot,
    LeftParen,
    RightParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => format!("identifier `{s}`"),
            TokenKind::String(_) => "string literal".into(),
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Parameter(p) => format!("parameter ${p}"),
            TokenKind::Star => "`*`".into(),
            TokenKind::Comma => "`,`".into(),
            TokenKind::Dot => "`.`".into(),
            TokenKind::LeftParen => "`(`".into(),
            TokenKind::RightParen => "`)`".into(),
            TokenKind::Eq => "`=`".into(),
            TokenKind::Ne => "`!=`".into(),
            TokenKind::Lt => "`<`".into(),
            TokenKind::Le => "`<=`".into(),
            TokenKind::Gt => "`>`".into(),
            TokenKind::Ge => "`>=`".into(),
        }
    }
}

/// Lexes a full query source into tokens.
pub(crate) fn lex(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let byte = bytes[pos];
        match byte {
            b' ' | b'\t' | b'\r' | b'\n' => {
                pos += 1;
            }
            b'*' => {
                tokens.push(Token { kind: TokenKind::Star, offset: start });
                pos += 1;
            }
            b',' => {
                tokens.push(Token { kind: TokenKind::Comma, offset: start });
                pos += 1;
            }
            b'.' => {
                tokens.push(Token { kind: TokenKind::Dot, offset: start });
                pos += 1;
            }
            b'(' => {
                tokens.push(Token { kind: TokenKind::LeftParen, offset: start });
                pos += 1;
            }
            b')' => {
                tokens.push(Token { kind: TokenKind::RightParen, offset: start });
                pos += 1;
            }
            b'=' => {
                tokens.push(Token { kind: TokenKind::Eq, offset: start });
                pos += 1;
            }
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ne, offset: start });
                    pos += 2;
                } else {
                    return Err(Error::query_syntax(start, "expected `!=`"));
                }
            }
            b'<' => {
                match bytes.get(pos + 1) {
                    Some(b'=') => {
                        tokens.push(Token { kind: TokenKind::Le, offset: start });
                        pos += 2;
                    }
                    Some(b'>') => {
                        tokens.push(Token { kind: TokenKind::Ne, offset: start });
                        pos += 2;
                    }
                    _ => {
                        tokens.push(Token { kind: TokenKind::Lt, offset: start });
                        pos += 1;
                    }
                }
            }
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ge, offset: start });
                    pos += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, offset: start });
                    pos += 1;
                }
            }
            b'\'' => {
                let (value, next) = lex_string(source, pos)?;
                tokens.push(Token { kind: TokenKind::String(value), offset: start });
                pos = next;
            }
            b'$' => {
                pos += 1;
                let name_start = pos;
                while pos < bytes.len() && is_ident_byte(bytes[pos]) {
                    pos += 1;
                }
                if pos == name_start {
                    return Err(Error::query_syntax(start, "expected parameter name after `$`"));
                }
                tokens.push(Token {
                    kind: TokenKind::Parameter(source[name_start..pos].to_string()),
                    offset: start,
                });
            }
            b'0'..=b'9' | b'-' => {
                let (value, next) = lex_number(source, pos)?;
                tokens.push(Token { kind: TokenKind::Number(value), offset: start });
                pos = next;
            }
            _ if is_ident_start(byte) => {
                while pos < bytes.len() && is_ident_byte(bytes[pos]) {
                    pos += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(source[start..pos].to_string()),
                    offset: start,
                });
            }
            other => {
                return Err(Error::query_syntax(
                    start,
                    format!("unexpected character `{}`", char::from(other)),
                ));
            }
        }
    }

    Ok(tokens)
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

/// Single-quoted string; `''` escapes a quote.
fn lex_string(source: &str, start: usize) -> Result<(String, usize)> {
    let bytes = source.as_bytes();
    let mut value = String::new();
    let mut pos = start + 1;

    while pos < bytes.len() {
        if bytes[pos] == b'\'' {
            if bytes.get(pos + 1) == Some(&b'\'') {
                value.push('\'');
                pos += 2;
            } else {
                return Ok((value, pos + 1));
            }
        } else {
            // Strings are UTF-8; copy a whole character at a time.
            let ch = source[pos..].chars().next().ok_or_else(|| {
                Error::query_syntax(pos, "invalid UTF-8 in string literal")
            })?;
            value.push(ch);
            pos += ch.len_utf8();
        }
    }
    Err(Error::query_syntax(start, "unterminated string literal"))
}

fn lex_number(source: &str, start: usize) -> Result<(f64, usize)> {
    let bytes = source.as_bytes();
    let mut pos = start;
    if bytes[pos] == b'-' {
        pos += 1;
    }
    while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
        pos += 1;
    }
    // Exponent form.
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        pos += 1;
        if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
            pos += 1;
        }
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    source[start..pos]
        .parse::<f64>()
        .map(|n| (n, pos))
        .map_err(|_| Error::query_syntax(start, format!("invalid number `{}`", &source[start..pos])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_a_basic_select() {
        let tokens = kinds("SELECT * FROM db WHERE age >= 21");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("SELECT".into()),
                TokenKind::Star,
                TokenKind::Ident("FROM".into()),
                TokenKind::Ident("db".into()),
                TokenKind::Ident("WHERE".into()),
                TokenKind::Ident("age".into()),
                TokenKind::Ge,
                TokenKind::Number(21.0),
            ]
        );
    }

    #[test]
    fn string_escapes_and_parameters() {
        let tokens = kinds("name = 'O''Brien' AND city = $city");
        assert!(tokens.contains(&TokenKind::String("O'Brien".into())));
        assert!(tokens.contains(&TokenKind::Parameter("city".into())));
    }

    #[test]
    fn angle_bracket_not_equals() {
        assert_eq!(kinds("a <> b")[1], TokenKind::Ne);
        assert_eq!(kinds("a != b")[1], TokenKind::Ne);
    }

    #[test]
    fn offsets_point_at_token_start() {
        let tokens = lex("a  =  'x'").unwrap();
        assert_eq!(tokens[1].offset, 3);
        assert_eq!(tokens[2].offset, 6);
    }

    #[test]
    fn errors_carry_position() {
        let err = lex("a = 'unterminated").unwrap_err();
        assert!(matches!(err, Error::QuerySyntax { position: 4, .. }));

        let err = lex("a ; b").unwrap_err();
        assert!(matches!(err, Error::QuerySyntax { position: 2, .. }));
    }

    #[test]
    fn negative_and_fractional_numbers() {
        assert_eq!(kinds("-3.5")[0], TokenKind::Number(-3.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Number(1000.0));
    }
}
