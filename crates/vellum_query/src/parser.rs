//! Recursive-descent parser for the SQL-like dialect.
//!
//! Grammar, roughly:
//!
//! ```text
//! select   := SELECT columns FROM source [WHERE expr]
//!             [ORDER BY key (, key)*] [LIMIT n [OFFSET m]]
//! columns  := '*' | column (',' column)*
//! column   := COUNT '(' '*' ')' [AS ident] | expr [AS ident]
//! source   := ident ['.' ident]
//! expr     := or
//! or       := and (OR and)*
//! and      := not (AND not)*
//! not      := NOT not | predicate
//! predicate:= sum ((= != < <= > >= LIKE) sum)?
//!             | sum IS [NOT] NULL
//! sum      := primary
//! primary  := literal | parameter | path | MATCH '(' ident ',' expr ')'
//!             | '(' expr ')'
//! ```

use crate::ast::{BinaryOp, Column, Expr, OrderKey, Select};
use crate::lexer::{lex, Token, TokenKind};
use vellum_core::{Error, Result, Value, DEFAULT_SCOPE};

/// Words that cannot start a property path.
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "ORDER", "BY", "LIMIT", "OFFSET", "AND", "OR", "NOT", "IS",
    "LIKE", "MATCH", "AS", "ASC", "DESC", "COUNT",
];

/// Parses SQL-like query text into a [`Select`].
pub(crate) fn parse(source: &str) -> Result<Select> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let select = parser.select()?;
    if let Some(token) = parser.peek() {
        return Err(Error::query_syntax(
            token.offset,
            format!("unexpected {} after end of query", token.kind.describe()),
        ));
    }
    Ok(select)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.offset)
    }

    /// Consumes an identifier matching `keyword` case-insensitively.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(
            self.peek(),
            Some(Token { kind: TokenKind::Ident(word), .. }) if word.eq_ignore_ascii_case(keyword)
        )
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected `{keyword}`")))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", kind.describe())))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        match self.peek() {
            Some(token) => Error::query_syntax(
                token.offset,
                format!("{expected}, found {}", token.kind.describe()),
            ),
            None => Error::query_syntax(self.end, format!("{expected}, found end of input")),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token { kind: TokenKind::Ident(word), .. }) => {
                let word = word.clone();
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.unexpected("expected identifier")),
        }
    }

    fn select(&mut self) -> Result<Select> {
        self.expect_keyword("SELECT")?;
        let columns = self.columns()?;
        self.expect_keyword("FROM")?;
        let (scope, collection) = self.source()?;

        let predicate = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderKey { expr, descending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword("LIMIT") {
            Some(self.unsigned()?)
        } else {
            None
        };
        let offset = if self.eat_keyword("OFFSET") {
            Some(self.unsigned()?)
        } else {
            None
        };

        Ok(Select {
            columns,
            scope,
            collection,
            predicate,
            order_by,
            limit,
            offset,
        })
    }

    fn unsigned(&mut self) -> Result<u64> {
        let offset = self.offset();
        match self.advance() {
            Some(Token { kind: TokenKind::Number(n), .. }) if n >= 0.0 && n.fract() == 0.0 => {
                Ok(n as u64)
            }
            _ => Err(Error::query_syntax(offset, "expected a non-negative integer")),
        }
    }

    fn columns(&mut self) -> Result<Vec<Column>> {
        if self.eat(&TokenKind::Star) {
            return Ok(vec![Column::All]);
        }
        let mut columns = Vec::new();
        loop {
            columns.push(self.column()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(columns)
    }

    fn column(&mut self) -> Result<Column> {
        if self.peek_keyword("COUNT") {
            let checkpoint = self.pos;
            self.pos += 1;
            if self.eat(&TokenKind::LeftParen) {
                self.expect(&TokenKind::Star)?;
                self.expect(&TokenKind::RightParen)?;
                let alias = self.alias()?;
                return Ok(Column::CountAll { alias });
            }
            self.pos = checkpoint;
        }
        let expr = self.expr()?;
        let alias = self.alias()?;
        Ok(Column::Expr { expr, alias })
    }

    fn alias(&mut self) -> Result<Option<String>> {
        if self.eat_keyword("AS") {
            Ok(Some(self.ident()?))
        } else {
            Ok(None)
        }
    }

    fn source(&mut self) -> Result<(String, String)> {
        let first = self.ident()?;
        if self.eat(&TokenKind::Dot) {
            let second = self.ident()?;
            Ok((first, second))
        } else {
            Ok((DEFAULT_SCOPE.to_string(), first))
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("OR") {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("AND") {
            let rhs = self.not_expr()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            Ok(Expr::Not(Box::new(self.not_expr()?)))
        } else {
            self.predicate()
        }
    }

    fn predicate(&mut self) -> Result<Expr> {
        let lhs = self.primary()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull {
                expr: Box::new(lhs),
                negated,
            });
        }
        if self.eat_keyword("LIKE") {
            let rhs = self.primary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Like,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }

        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Eq) => Some(BinaryOp::Eq),
            Some(TokenKind::Ne) => Some(BinaryOp::Ne),
            Some(TokenKind::Lt) => Some(BinaryOp::Lt),
            Some(TokenKind::Le) => Some(BinaryOp::Le),
            Some(TokenKind::Gt) => Some(BinaryOp::Gt),
            Some(TokenKind::Ge) => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let rhs = self.primary()?;
            return Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::LeftParen) {
            let expr = self.expr()?;
            self.expect(&TokenKind::RightParen)?;
            return Ok(expr);
        }

        if self.peek_keyword("MATCH") {
            self.pos += 1;
            self.expect(&TokenKind::LeftParen)?;
            let index = self.ident()?;
            self.expect(&TokenKind::Comma)?;
            let query = self.expr()?;
            self.expect(&TokenKind::RightParen)?;
            return Ok(Expr::Match {
                index,
                query: Box::new(query),
            });
        }

        let offset = self.offset();
        match self.advance() {
            Some(Token { kind: TokenKind::Number(n), .. }) => Ok(Expr::Literal(Value::from(n))),
            Some(Token { kind: TokenKind::String(s), .. }) => Ok(Expr::Literal(Value::from(s))),
            Some(Token { kind: TokenKind::Parameter(name), .. }) => Ok(Expr::Parameter(name)),
            Some(Token { kind: TokenKind::Ident(word), .. }) => {
                if word.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if word.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if word.eq_ignore_ascii_case("NULL") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if RESERVED.iter().any(|kw| word.eq_ignore_ascii_case(kw)) {
                    return Err(Error::query_syntax(
                        offset,
                        format!("expected an expression, found keyword `{word}`"),
                    ));
                }
                // Dotted property path.
                let mut path = word;
                while self.eat(&TokenKind::Dot) {
                    path.push('.');
                    path.push_str(&self.ident()?);
                }
                Ok(Expr::Property(path))
            }
            _ => Err(Error::query_syntax(offset, "expected an expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select_star() {
        let select = parse("SELECT * FROM inventory.hotels").unwrap();
        assert_eq!(select.columns, vec![Column::All]);
        assert_eq!(select.scope, "inventory");
        assert_eq!(select.collection, "hotels");
        assert!(select.predicate.is_none());
    }

    #[test]
    fn bare_collection_uses_default_scope() {
        let select = parse("SELECT name FROM people").unwrap();
        assert_eq!(select.scope, DEFAULT_SCOPE);
        assert_eq!(select.collection, "people");
    }

    #[test]
    fn parses_predicates_with_precedence() {
        let select =
            parse("SELECT name FROM p WHERE a = 1 OR b = 2 AND NOT c = 3").unwrap();
        // OR binds loosest: a=1 OR (b=2 AND (NOT c=3)).
        let Some(Expr::Binary { op: BinaryOp::Or, .. }) = select.predicate else {
            panic!("expected OR at the root");
        };
    }

    #[test]
    fn parses_count_star_and_aliases() {
        let select = parse("SELECT count(*) AS n FROM p").unwrap();
        assert_eq!(
            select.columns,
            vec![Column::CountAll { alias: Some("n".into()) }]
        );
    }

    #[test]
    fn parses_paths_params_like_and_is_null() {
        let select = parse(
            "SELECT address.city FROM p \
             WHERE name LIKE '%son' AND nick IS NOT NULL AND age >= $min",
        )
        .unwrap();
        let conjuncts: Vec<String> = select
            .predicate
            .unwrap()
            .conjuncts()
            .iter()
            .map(|e| e.render())
            .collect();
        assert_eq!(conjuncts[0], "(name LIKE \"%son\")");
        assert_eq!(conjuncts[1], "(nick IS NOT NULL)");
        assert_eq!(conjuncts[2], "(age >= $min)");
    }

    #[test]
    fn parses_match_and_order_limit_offset() {
        let select = parse(
            "SELECT name FROM p WHERE MATCH(fts, 'rust engine') \
             ORDER BY name DESC, age LIMIT 10 OFFSET 5",
        )
        .unwrap();
        assert!(matches!(select.predicate, Some(Expr::Match { .. })));
        assert_eq!(select.order_by.len(), 2);
        assert!(select.order_by[0].descending);
        assert!(!select.order_by[1].descending);
        assert_eq!(select.limit, Some(10));
        assert_eq!(select.offset, Some(5));
    }

    #[test]
    fn syntax_errors_carry_byte_positions() {
        let err = parse("SELECT FROM p").unwrap_err();
        assert!(matches!(err, Error::QuerySyntax { position: 7, .. }));

        let err = parse("SELECT * FROM p WHERE").unwrap_err();
        assert!(matches!(err, Error::QuerySyntax { position: 21, .. }));

        let err = parse("SELECT * FROM p trailing").unwrap_err();
        assert!(matches!(err, Error::QuerySyntax { position: 16, .. }));
    }
}
