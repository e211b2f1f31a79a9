//! Query planning: choose a scan strategy from the predicate and the
//! collection's indexes.
//!
//! The planner is transparent: it narrows the candidate set with an index
//! when one fits, and the full predicate is still applied to every
//! candidate, so a plan is never wrong, only slower.

use crate::ast::{BinaryOp, Expr, Select};
use std::ops::Bound;
use vellum_core::{Collection, Error, Result};

/// The chosen access path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Scan {
    /// Walk every live document.
    Full,
    /// Exact-key lookup on a single-expression value index.
    IndexEq { index: String, key: Expr },
    /// Range scan over a value index's first key component.
    IndexRange {
        index: String,
        lower: Bound<Expr>,
        upper: Bound<Expr>,
    },
    /// Full-text match.
    Fts { index: String, query: Expr },
}

/// A compiled plan: access path plus the predicate applied to candidates.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plan {
    pub(crate) scan: Scan,
    pub(crate) residual: Option<Expr>,
}

/// Plans a select against a collection's current index set.
///
/// A `MATCH` must be a top-level conjunct of the predicate; anywhere else
/// (under `OR` or `NOT`) it cannot be answered and is rejected.
pub(crate) fn plan(select: &Select, collection: &Collection) -> Result<Plan> {
    let Some(predicate) = &select.predicate else {
        return Ok(Plan {
            scan: Scan::Full,
            residual: None,
        });
    };

    let conjuncts = predicate.conjuncts();

    // MATCH first: it can only be answered by its index.
    if let Some(pos) = conjuncts.iter().position(|e| matches!(e, Expr::Match { .. })) {
        let Expr::Match { index, query } = conjuncts[pos] else {
            unreachable!("position() matched a MATCH conjunct");
        };
        let rest: Vec<Expr> = conjuncts
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != pos)
            .map(|(_, e)| (*e).clone())
            .collect();
        if rest.iter().any(Expr::contains_match) || query.contains_match() {
            return Err(Error::invalid_argument(
                "only one MATCH is allowed per query",
            ));
        }
        return Ok(Plan {
            scan: Scan::Fts {
                index: index.clone(),
                query: (**query).clone(),
            },
            residual: Expr::conjoin(rest),
        });
    }

    if predicate.contains_match() {
        return Err(Error::invalid_argument(
            "MATCH must be a top-level AND condition",
        ));
    }

    // Look for a comparison conjunct answerable by a value index.
    let indexes = collection.indexes()?;
    for conjunct in &conjuncts {
        let Some((path, op, operand)) = comparison_parts(conjunct) else {
            continue;
        };
        let Some((name, spec)) = indexes
            .iter()
            .find(|(_, spec)| !spec.is_full_text() && spec.expressions().first().map(String::as_str) == Some(path))
        else {
            continue;
        };

        let scan = match op {
            BinaryOp::Eq if spec.expressions().len() == 1 => Scan::IndexEq {
                index: name.clone(),
                key: operand.clone(),
            },
            BinaryOp::Eq => Scan::IndexRange {
                index: name.clone(),
                lower: Bound::Included(operand.clone()),
                upper: Bound::Included(operand.clone()),
            },
            BinaryOp::Lt => Scan::IndexRange {
                index: name.clone(),
                lower: Bound::Unbounded,
                upper: Bound::Excluded(operand.clone()),
            },
            BinaryOp::Le => Scan::IndexRange {
                index: name.clone(),
                lower: Bound::Unbounded,
                upper: Bound::Included(operand.clone()),
            },
            BinaryOp::Gt => Scan::IndexRange {
                index: name.clone(),
                lower: Bound::Excluded(operand.clone()),
                upper: Bound::Unbounded,
            },
            BinaryOp::Ge => Scan::IndexRange {
                index: name.clone(),
                lower: Bound::Included(operand.clone()),
                upper: Bound::Unbounded,
            },
            _ => continue,
        };

        tracing::debug!(index = name, path, "query uses index");
        return Ok(Plan {
            scan,
            residual: Some((*predicate).clone()),
        });
    }

    Ok(Plan {
        scan: Scan::Full,
        residual: Some((*predicate).clone()),
    })
}

/// Decomposes `property <op> constant-ish` (either side) into parts.
///
/// Only literals and parameters may appear opposite the property, so the
/// bound can be evaluated before the scan.
fn comparison_parts(expr: &Expr) -> Option<(&str, BinaryOp, &Expr)> {
    let Expr::Binary { op, lhs, rhs } = expr else {
        return None;
    };
    let op = *op;
    if !matches!(
        op,
        BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
    ) {
        return None;
    }
    let constant = |e: &Expr| matches!(e, Expr::Literal(_) | Expr::Parameter(_));
    match (lhs.as_ref(), rhs.as_ref()) {
        (Expr::Property(path), operand) if constant(operand) => Some((path, op, operand)),
        (operand, Expr::Property(path)) if constant(operand) => Some((path, flip(op), operand)),
        _ => None,
    }
}

const fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

/// Renders the plan for `explain` output.
pub(crate) fn describe(select: &Select, plan: &Plan) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "FROM {}.{}\n",
        select.scope, select.collection
    ));
    match &plan.scan {
        Scan::Full => out.push_str("SCAN full collection\n"),
        Scan::IndexEq { index, key } => {
            out.push_str(&format!("SCAN index `{index}` key = {}\n", key.render()));
        }
        Scan::IndexRange { index, lower, upper } => {
            let bound = |b: &Bound<Expr>, open: &str, closed: &str| match b {
                Bound::Unbounded => "..".to_string(),
                Bound::Included(e) => format!("{closed}{}", e.render()),
                Bound::Excluded(e) => format!("{open}{}", e.render()),
            };
            out.push_str(&format!(
                "SCAN index `{index}` range {} to {}\n",
                bound(lower, ">", ">="),
                bound(upper, "<", "<=")
            ));
        }
        Scan::Fts { index, query } => {
            out.push_str(&format!("SCAN full-text `{index}` match {}\n", query.render()));
        }
    }
    if let Some(residual) = &plan.residual {
        out.push_str(&format!("FILTER {}\n", residual.render()));
    }
    if !select.order_by.is_empty() {
        let keys: Vec<String> = select
            .order_by
            .iter()
            .map(|k| {
                format!(
                    "{}{}",
                    k.expr.render(),
                    if k.descending { " DESC" } else { "" }
                )
            })
            .collect();
        out.push_str(&format!("ORDER BY {}\n", keys.join(", ")));
    }
    if let Some(limit) = select.limit {
        out.push_str(&format!("LIMIT {limit}\n"));
    }
    if let Some(offset) = select.offset {
        out.push_str(&format!("OFFSET {offset}\n"));
    }
    out
}
