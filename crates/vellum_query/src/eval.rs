//! Expression evaluation against a document.

use crate::ast::{BinaryOp, Expr};
use std::cmp::Ordering;
use vellum_core::{Document, Error, Object, Result, Value};

/// Evaluates an expression against a document's properties.
///
/// Missing properties evaluate to `Null`. Parameters resolve from the
/// bound parameter set; an unbound parameter is an error.
pub(crate) fn eval(expr: &Expr, doc: &Document, params: &Object) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Property(path) => Ok(doc
            .properties()
            .resolve_path(path)
            .cloned()
            .unwrap_or(Value::Null)),
        Expr::Parameter(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("unbound parameter ${name}"))),
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                let left = eval(lhs, doc, params)?;
                if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(eval(rhs, doc, params)?.is_truthy()))
            }
            BinaryOp::Or => {
                let left = eval(lhs, doc, params)?;
                if left.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(eval(rhs, doc, params)?.is_truthy()))
            }
            BinaryOp::Like => {
                let value = eval(lhs, doc, params)?;
                let pattern = eval(rhs, doc, params)?;
                match (value, pattern) {
                    (Value::String(text), Value::String(pattern)) => {
                        Ok(Value::Bool(like(&text, &pattern)))
                    }
                    _ => Ok(Value::Bool(false)),
                }
            }
            _ => {
                let left = eval(lhs, doc, params)?;
                let right = eval(rhs, doc, params)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
        },
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, doc, params)?.is_truthy())),
        Expr::IsNull { expr, negated } => {
            let is_null = matches!(eval(expr, doc, params)?, Value::Null);
            Ok(Value::Bool(is_null != *negated))
        }
        // MATCH is resolved by the scan; it never reaches evaluation.
        Expr::Match { .. } => Err(Error::invalid_argument(
            "MATCH cannot be evaluated outside an index scan",
        )),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::Eq => left == right,
        BinaryOp::Ne => left != right,
        // Ordering comparisons are type-strict: mismatched types are never
        // ordered relative to each other.
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if std::mem::discriminant(left) != std::mem::discriminant(right) {
                return false;
            }
            let ord = left.cmp_total(right);
            match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                _ => false,
            }
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Like => false,
    }
}

/// SQL LIKE: `%` matches any run, `_` matches one character.
/// Matching is case-insensitive.
pub(crate) fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    like_at(&text, &pattern)
}

fn like_at(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            // Try consuming zero or more characters.
            (0..=text.len()).any(|skip| like_at(&text[skip..], &pattern[1..]))
        }
        Some('_') => !text.is_empty() && like_at(&text[1..], &pattern[1..]),
        Some(&ch) => text.first() == Some(&ch) && like_at(&text[1..], &pattern[1..]),
    }
}
