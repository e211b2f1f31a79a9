//! The query AST both dialects lower to.

use vellum_core::Value;

/// A compiled SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub(crate) columns: Vec<Column>,
    pub(crate) scope: String,
    pub(crate) collection: String,
    pub(crate) predicate: Option<Expr>,
    pub(crate) order_by: Vec<OrderKey>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

/// One entry of the SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Column {
    /// `*`: the whole document under a column named after the collection.
    All,
    /// `count(*)`, optionally aliased.
    CountAll { alias: Option<String> },
    /// An expression, optionally aliased.
    Expr { expr: Expr, alias: Option<String> },
}

/// A sort key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OrderKey {
    pub(crate) expr: Expr,
    pub(crate) descending: bool,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
}

impl BinaryOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Like => "LIKE",
        }
    }
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// A constant.
    Literal(Value),
    /// A dotted property path into the document.
    Property(String),
    /// A named parameter (`$name`), bound at execute time.
    Parameter(String),
    /// A binary operation.
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Logical negation.
    Not(Box<Expr>),
    /// `IS NULL` / `IS NOT NULL`.
    IsNull { expr: Box<Expr>, negated: bool },
    /// `MATCH(indexName, queryText)` full-text predicate.
    Match { index: String, query: Box<Expr> },
}

impl Expr {
    /// Flattens an AND chain into its conjuncts.
    pub(crate) fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let mut out = lhs.conjuncts();
                out.extend(rhs.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Rebuilds an AND chain from conjuncts; `None` for an empty list.
    pub(crate) fn conjoin(mut exprs: Vec<Expr>) -> Option<Expr> {
        let first = if exprs.is_empty() {
            return None;
        } else {
            exprs.remove(0)
        };
        Some(exprs.into_iter().fold(first, |acc, e| Expr::Binary {
            op: BinaryOp::And,
            lhs: Box::new(acc),
            rhs: Box::new(e),
        }))
    }

    /// True if a `MATCH` appears anywhere in this expression.
    pub(crate) fn contains_match(&self) -> bool {
        match self {
            Expr::Match { .. } => true,
            Expr::Binary { lhs, rhs, .. } => lhs.contains_match() || rhs.contains_match(),
            Expr::Not(inner) => inner.contains_match(),
            Expr::IsNull { expr, .. } => expr.contains_match(),
            Expr::Literal(_) | Expr::Property(_) | Expr::Parameter(_) => false,
        }
    }

    /// Renders the expression for `explain` output.
    pub(crate) fn render(&self) -> String {
        match self {
            Expr::Literal(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| "<literal>".into())
            }
            Expr::Property(path) => path.clone(),
            Expr::Parameter(name) => format!("${name}"),
            Expr::Binary { op, lhs, rhs } => {
                format!("({} {} {})", lhs.render(), op.symbol(), rhs.render())
            }
            Expr::Not(inner) => format!("(NOT {})", inner.render()),
            Expr::IsNull { expr, negated } => {
                let suffix = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("({} {suffix})", expr.render())
            }
            Expr::Match { index, query } => format!("MATCH({index}, {})", query.render()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(p: &str) -> Expr {
        Expr::Property(p.into())
    }

    fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::And,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[test]
    fn conjuncts_flatten_nested_ands() {
        let expr = and(and(prop("a"), prop("b")), prop("c"));
        let parts = expr.conjuncts();
        assert_eq!(parts, vec![&prop("a"), &prop("b"), &prop("c")]);
    }

    #[test]
    fn conjoin_round_trips() {
        let rebuilt = Expr::conjoin(vec![prop("a"), prop("b"), prop("c")]).unwrap();
        assert_eq!(
            rebuilt.conjuncts(),
            vec![&prop("a"), &prop("b"), &prop("c")]
        );
        assert_eq!(Expr::conjoin(vec![]), None);
    }

    #[test]
    fn match_detection_descends() {
        let m = Expr::Match {
            index: "fts".into(),
            query: Box::new(Expr::Literal(Value::from("term"))),
        };
        assert!(Expr::Not(Box::new(m.clone())).contains_match());
        assert!(!prop("x").contains_match());
        assert!(and(prop("x"), m).contains_match());
    }
}
