//! The JSON-structured query dialect.
//!
//! A query is a JSON object with `SELECT` (or `WHAT`), `FROM`, and
//! optional `WHERE`, `ORDER_BY`, `LIMIT`, `OFFSET` keys:
//!
//! ```json
//! {
//!   "SELECT": ["name", {"expr": "address.city", "as": "city"}],
//!   "FROM": "inventory.hotels",
//!   "WHERE": {"and": [{"eq": ["type", {"value": "hotel"}]},
//!                     {"ge": ["rating", {"param": "min"}]}]},
//!   "ORDER_BY": [{"expr": "name", "desc": true}],
//!   "LIMIT": 10,
//!   "OFFSET": 0
//! }
//! ```
//!
//! Expression encoding: a bare string is a property path; `{"value": v}`
//! a literal; `{"param": "name"}` a parameter; operators are single-key
//! objects (`eq ne lt le gt ge like` over a two-element array, `and or`
//! over an array, `not` / `is_null` / `is_not_null` over one expression,
//! `match` over `[indexName, queryExpr]`). Bare numbers and booleans are
//! literals. `"*"` and `"count(*)"` are valid SELECT entries.

use crate::ast::{BinaryOp, Column, Expr, OrderKey, Select};
use serde_json::Value as Json;
use vellum_core::{Error, Result, Value, DEFAULT_SCOPE};

/// Parses a JSON dialect query into a [`Select`].
pub(crate) fn parse(source: &str) -> Result<Select> {
    let json: Json = serde_json::from_str(source).map_err(|e| {
        Error::query_syntax(byte_offset(source, e.line(), e.column()), e.to_string())
    })?;
    let Json::Object(map) = json else {
        return Err(Error::query_syntax(0, "query must be a JSON object"));
    };

    let mut columns = None;
    let mut from = None;
    let mut predicate = None;
    let mut order_by = Vec::new();
    let mut limit = None;
    let mut offset = None;

    for (key, value) in map {
        match key.to_ascii_uppercase().as_str() {
            "SELECT" | "WHAT" => columns = Some(parse_columns(&value)?),
            "FROM" => from = Some(parse_from(&value)?),
            "WHERE" => predicate = Some(parse_expr(&value)?),
            "ORDER_BY" => order_by = parse_order_by(&value)?,
            "LIMIT" => limit = Some(parse_unsigned(&value, "LIMIT")?),
            "OFFSET" => offset = Some(parse_unsigned(&value, "OFFSET")?),
            other => {
                return Err(Error::query_syntax(0, format!("unknown query key `{other}`")));
            }
        }
    }

    let (scope, collection) =
        from.ok_or_else(|| Error::query_syntax(0, "query is missing `FROM`"))?;
    let columns =
        columns.ok_or_else(|| Error::query_syntax(0, "query is missing `SELECT`"))?;

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

/// Maps a serde_json line/column to a byte offset into the source.
fn byte_offset(source: &str, line: usize, column: usize) -> usize {
    let mut remaining = line.saturating_sub(1);
    let mut offset = 0;
    for (i, b) in source.bytes().enumerate() {
        if remaining == 0 {
            break;
        }
        if b == b'\n' {
            remaining -= 1;
            offset = i + 1;
        }
    }
    (offset + column.saturating_sub(1)).min(source.len())
}

fn parse_columns(json: &Json) -> Result<Vec<Column>> {
    let entries = match json {
        Json::Array(entries) => entries.as_slice(),
        single => std::slice::from_ref(single),
    };
    entries.iter().map(parse_column).collect()
}

fn parse_column(json: &Json) -> Result<Column> {
    match json {
        Json::String(s) if s == "*" => Ok(Column::All),
        Json::String(s) if s.eq_ignore_ascii_case("count(*)") => {
            Ok(Column::CountAll { alias: None })
        }
        Json::Object(map) if map.contains_key("count") => Ok(Column::CountAll {
            alias: map.get("as").and_then(Json::as_str).map(str::to_string),
        }),
        Json::Object(map) if map.contains_key("expr") => {
            let expr = parse_expr(
                map.get("expr")
                    .ok_or_else(|| Error::query_syntax(0, "column is missing `expr`"))?,
            )?;
            let alias = map.get("as").and_then(Json::as_str).map(str::to_string);
            Ok(Column::Expr { expr, alias })
        }
        other => Ok(Column::Expr {
            expr: parse_expr(other)?,
            alias: None,
        }),
    }
}

fn parse_from(json: &Json) -> Result<(String, String)> {
    let Json::String(name) = json else {
        return Err(Error::query_syntax(0, "`FROM` must be a string"));
    };
    match name.split_once('.') {
        Some((scope, collection)) => Ok((scope.to_string(), collection.to_string())),
        None => Ok((DEFAULT_SCOPE.to_string(), name.clone())),
    }
}

fn parse_order_by(json: &Json) -> Result<Vec<OrderKey>> {
    let Json::Array(entries) = json else {
        return Err(Error::query_syntax(0, "`ORDER_BY` must be an array"));
    };
    entries
        .iter()
        .map(|entry| match entry {
            Json::String(path) => Ok(OrderKey {
                expr: Expr::Property(path.clone()),
                descending: false,
            }),
            Json::Object(map) => {
                let expr = parse_expr(
                    map.get("expr")
                        .ok_or_else(|| Error::query_syntax(0, "sort key is missing `expr`"))?,
                )?;
                let descending = map.get("desc").and_then(Json::as_bool).unwrap_or(false);
                Ok(OrderKey { expr, descending })
            }
            _ => Err(Error::query_syntax(0, "invalid ORDER_BY entry")),
        })
        .collect()
}

fn parse_unsigned(json: &Json, what: &str) -> Result<u64> {
    json.as_u64()
        .ok_or_else(|| Error::query_syntax(0, format!("`{what}` must be a non-negative integer")))
}

fn parse_expr(json: &Json) -> Result<Expr> {
    match json {
        Json::String(path) => Ok(Expr::Property(path.clone())),
        Json::Bool(b) => Ok(Expr::Literal(Value::Bool(*b))),
        Json::Null => Ok(Expr::Literal(Value::Null)),
        Json::Number(n) => Ok(Expr::Literal(Value::from(n.as_f64().unwrap_or(0.0)))),
        Json::Object(map) => {
            if map.len() != 1 {
                return Err(Error::query_syntax(
                    0,
                    "expression object must have exactly one key",
                ));
            }
            let (key, value) = map.iter().next().ok_or_else(|| {
                Error::query_syntax(0, "expression object must have exactly one key")
            })?;
            parse_operator(key, value)
        }
        Json::Array(_) => Err(Error::query_syntax(0, "bare arrays are not expressions")),
    }
}

fn parse_operator(key: &str, value: &Json) -> Result<Expr> {
    let comparison = |op: BinaryOp| -> Result<Expr> {
        let Json::Array(args) = value else {
            return Err(Error::query_syntax(0, format!("`{key}` expects an array")));
        };
        if args.len() != 2 {
            return Err(Error::query_syntax(
                0,
                format!("`{key}` expects exactly two operands"),
            ));
        }
        Ok(Expr::Binary {
            op,
            lhs: Box::new(parse_expr(&args[0])?),
            rhs: Box::new(parse_expr(&args[1])?),
        })
    };

    match key.to_ascii_lowercase().as_str() {
        "value" => Ok(Expr::Literal(json_to_value(value))),
        "param" => match value {
            Json::String(name) => Ok(Expr::Parameter(name.clone())),
            _ => Err(Error::query_syntax(0, "`param` expects a string name")),
        },
        "prop" => match value {
            Json::String(path) => Ok(Expr::Property(path.clone())),
            _ => Err(Error::query_syntax(0, "`prop` expects a string path")),
        },
        "eq" => comparison(BinaryOp::Eq),
        "ne" => comparison(BinaryOp::Ne),
        "lt" => comparison(BinaryOp::Lt),
        "le" => comparison(BinaryOp::Le),
        "gt" => comparison(BinaryOp::Gt),
        "ge" => comparison(BinaryOp::Ge),
        "like" => comparison(BinaryOp::Like),
        "and" | "or" => {
            let Json::Array(args) = value else {
                return Err(Error::query_syntax(0, format!("`{key}` expects an array")));
            };
            let op = if key.eq_ignore_ascii_case("and") {
                BinaryOp::And
            } else {
                BinaryOp::Or
            };
            let mut parsed = args.iter().map(parse_expr).collect::<Result<Vec<_>>>()?;
            let Some(first) = (!parsed.is_empty()).then(|| parsed.remove(0)) else {
                return Err(Error::query_syntax(0, format!("`{key}` needs operands")));
            };
            Ok(parsed.into_iter().fold(first, |acc, e| Expr::Binary {
                op,
                lhs: Box::new(acc),
                rhs: Box::new(e),
            }))
        }
        "not" => Ok(Expr::Not(Box::new(parse_expr(value)?))),
        "is_null" => Ok(Expr::IsNull {
            expr: Box::new(parse_expr(value)?),
            negated: false,
        }),
        "is_not_null" => Ok(Expr::IsNull {
            expr: Box::new(parse_expr(value)?),
            negated: true,
        }),
        "match" => {
            let Json::Array(args) = value else {
                return Err(Error::query_syntax(0, "`match` expects [index, query]"));
            };
            let (Some(Json::String(index)), Some(query)) = (args.first(), args.get(1)) else {
                return Err(Error::query_syntax(0, "`match` expects [index, query]"));
            };
            Ok(Expr::Match {
                index: index.clone(),
                query: Box::new(parse_expr(query)?),
            })
        }
        other => Err(Error::query_syntax(0, format!("unknown operator `{other}`"))),
    }
}

/// Converts raw JSON into the engine value model.
fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::from(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => Value::from(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        Json::Object(map) => {
            let mut object = vellum_core::Object::new();
            for (k, v) in map {
                object.set(k.clone(), json_to_value(v));
            }
            Value::Object(object)
        }
    }
}
