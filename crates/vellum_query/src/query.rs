//! Compiled queries, execution, and result sets.

use crate::ast::{Column, Expr, Select};
use crate::eval::eval;
use crate::planner::{self, Plan, Scan};
use crate::{json_dialect, parser};
use parking_lot::Mutex;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vellum_core::{Collection, Database, Document, Error, Object, Result, Value};

/// Source language of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQL-like text: `SELECT ... FROM scope.collection WHERE ...`.
    Sql,
    /// JSON object form with `SELECT`/`FROM`/`WHERE`/... keys.
    Json,
}

/// A compiled, reusable query.
///
/// Compilation fixes the column list; parameters may be rebound between
/// executions. Each `execute` snapshots the collection and returns an
/// independent [`ResultSet`].
pub struct Query {
    db: Database,
    select: Select,
    columns: Arc<Vec<String>>,
    params: Mutex<Object>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("scope", &self.select.scope)
            .field("collection", &self.select.collection)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl Query {
    /// Compiles query source against a database.
    ///
    /// # Errors
    ///
    /// Fails with `QuerySyntax` on a parse error and `InvalidArgument` on
    /// a structurally invalid query (for example `count(*)` mixed with
    /// other columns).
    pub fn compile(db: &Database, source: &str, dialect: Dialect) -> Result<Self> {
        let select = match dialect {
            Dialect::Sql => parser::parse(source)?,
            Dialect::Json => json_dialect::parse(source)?,
        };

        let has_count = select
            .columns
            .iter()
            .any(|c| matches!(c, Column::CountAll { .. }));
        if has_count && select.columns.len() > 1 {
            return Err(Error::invalid_argument(
                "count(*) cannot be combined with other columns",
            ));
        }

        let columns = Arc::new(column_names(&select));
        Ok(Self {
            db: db.clone(),
            select,
            columns,
            params: Mutex::new(Object::new()),
        })
    }

    /// Names of the result columns, fixed at compile time.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Binds the parameter set used by subsequent `execute` calls.
    ///
    /// Rebinding replaces the previous set entirely.
    pub fn set_parameters(&self, params: Object) {
        *self.params.lock() = params;
    }

    /// The currently bound parameters.
    #[must_use]
    pub fn parameters(&self) -> Object {
        self.params.lock().clone()
    }

    pub(crate) fn collection(&self) -> Result<Collection> {
        self.db.collection(&self.select.scope, &self.select.collection)
    }

    /// Runs the query against the current committed state.
    ///
    /// The result is a finite snapshot; re-run `execute` to observe later
    /// commits.
    pub fn execute(&self) -> Result<ResultSet> {
        let collection = self.collection()?;
        let params = self.params.lock().clone();
        let plan = planner::plan(&self.select, &collection)?;

        let mut docs = self.scan(&collection, &plan, &params)?;

        if let Some(residual) = &plan.residual {
            let mut kept = Vec::with_capacity(docs.len());
            for doc in docs {
                if eval(residual, &doc, &params)?.is_truthy() {
                    kept.push(doc);
                }
            }
            docs = kept;
        }

        if self
            .select
            .columns
            .iter()
            .any(|c| matches!(c, Column::CountAll { .. }))
        {
            let count = docs.len();
            return Ok(ResultSet::new(
                Arc::clone(&self.columns),
                vec![vec![Value::from(count as f64)]],
            ));
        }

        if !self.select.order_by.is_empty() {
            let mut keyed: Vec<(Vec<Value>, Document)> = Vec::with_capacity(docs.len());
            for doc in docs {
                let mut keys = Vec::with_capacity(self.select.order_by.len());
                for key in &self.select.order_by {
                    keys.push(eval(&key.expr, &doc, &params)?);
                }
                keyed.push((keys, doc));
            }
            let order = &self.select.order_by;
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, key) in order.iter().enumerate() {
                    let ord = a[i].cmp_total(&b[i]);
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            docs = keyed.into_iter().map(|(_, doc)| doc).collect();
        }

        let offset = self.select.offset.unwrap_or(0) as usize;
        let limit = self.select.limit.map_or(usize::MAX, |l| l as usize);
        let window = docs.into_iter().skip(offset).take(limit);

        let mut rows = Vec::new();
        for doc in window {
            let mut row = Vec::with_capacity(self.select.columns.len());
            for column in &self.select.columns {
                match column {
                    Column::All => row.push(Value::Object(doc.properties().clone())),
                    Column::Expr { expr, .. } => row.push(eval(expr, &doc, &params)?),
                    Column::CountAll { .. } => unreachable!("count handled above"),
                }
            }
            rows.push(row);
        }

        tracing::debug!(
            collection = %self.select.collection,
            rows = rows.len(),
            "query executed"
        );
        Ok(ResultSet::new(Arc::clone(&self.columns), rows))
    }

    /// Renders the access plan the next `execute` would use.
    ///
    /// The output is human-readable and has no stability contract.
    pub fn explain(&self) -> Result<String> {
        let collection = self.collection()?;
        let plan = planner::plan(&self.select, &collection)?;
        Ok(planner::describe(&self.select, &plan))
    }

    fn scan(
        &self,
        collection: &Collection,
        plan: &Plan,
        params: &Object,
    ) -> Result<Vec<Document>> {
        match &plan.scan {
            Scan::Full => collection.all_documents(),
            Scan::IndexEq { index, key } => {
                let key = eval_const(key, params)?;
                collection.scan_index_eq(index, &[key])
            }
            Scan::IndexRange { index, lower, upper } => {
                let lower = eval_bound(lower, params)?;
                let upper = eval_bound(upper, params)?;
                collection.scan_index_range(index, as_ref_bound(&lower), as_ref_bound(&upper))
            }
            Scan::Fts { index, query } => {
                let query = eval_const(query, params)?;
                let Value::String(text) = query else {
                    return Err(Error::invalid_argument(
                        "MATCH query must evaluate to a string",
                    ));
                };
                collection.full_text_match(index, &text)
            }
        }
    }
}

/// Evaluates a constant expression (literal or parameter).
fn eval_const(expr: &Expr, params: &Object) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Parameter(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("unbound parameter ${name}"))),
        _ => Err(Error::invalid_argument(
            "index bound must be a literal or parameter",
        )),
    }
}

fn eval_bound(bound: &Bound<Expr>, params: &Object) -> Result<Bound<Value>> {
    Ok(match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(expr) => Bound::Included(eval_const(expr, params)?),
        Bound::Excluded(expr) => Bound::Excluded(eval_const(expr, params)?),
    })
}

fn as_ref_bound(bound: &Bound<Value>) -> Bound<&Value> {
    match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(v) => Bound::Included(v),
        Bound::Excluded(v) => Bound::Excluded(v),
    }
}

/// Derives the fixed column names of a select.
fn column_names(select: &Select) -> Vec<String> {
    select
        .columns
        .iter()
        .enumerate()
        .map(|(position, column)| match column {
            Column::All => select.collection.clone(),
            Column::CountAll { alias } => alias.clone().unwrap_or_else(|| "count".to_string()),
            Column::Expr { expr, alias } => alias.clone().unwrap_or_else(|| match expr {
                Expr::Property(path) => path.clone(),
                _ => format!("${}", position + 1),
            }),
        })
        .collect()
}

/// A finite, pull-based set of query results.
///
/// Not restartable; run the query again for fresh results.
pub struct ResultSet {
    columns: Arc<Vec<String>>,
    rows: std::vec::IntoIter<Vec<Value>>,
    generation: Arc<AtomicU64>,
}

impl ResultSet {
    fn new(columns: Arc<Vec<String>>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advances to the next row.
    ///
    /// Advancing invalidates the previously returned [`Row`]; reading it
    /// afterwards fails with `StaleResultAccess`.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Row> {
        let values = self.rows.next()?;
        let stamp = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Some(Row {
            columns: Arc::clone(&self.columns),
            values,
            generation: Arc::clone(&self.generation),
            stamp,
        })
    }

    /// Names of the result columns.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Drains all remaining rows into owned objects.
    pub fn into_objects(mut self) -> Result<Vec<Object>> {
        let mut out = Vec::new();
        while let Some(row) = self.next() {
            out.push(row.as_object()?);
        }
        Ok(out)
    }
}

/// One result row, valid until its result set advances.
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
    generation: Arc<AtomicU64>,
    stamp: u64,
}

impl Row {
    fn check_current(&self) -> Result<()> {
        if self.generation.load(Ordering::Acquire) != self.stamp {
            return Err(Error::StaleResultAccess);
        }
        Ok(())
    }

    /// Value at a column position.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the position is out of range and
    /// `StaleResultAccess` if the result set has advanced past this row.
    pub fn value_at(&self, position: usize) -> Result<&Value> {
        self.check_current()?;
        self.values
            .get(position)
            .ok_or_else(|| Error::invalid_argument(format!("no column at position {position}")))
    }

    /// Value under a column name.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` for an unknown name and
    /// `StaleResultAccess` if the result set has advanced past this row.
    pub fn value(&self, name: &str) -> Result<&Value> {
        self.check_current()?;
        let position = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::invalid_argument(format!("unknown column `{name}`")))?;
        self.values
            .get(position)
            .ok_or_else(|| Error::invalid_argument(format!("unknown column `{name}`")))
    }

    /// The whole row as an object keyed by column name.
    pub fn as_object(&self) -> Result<Object> {
        self.check_current()?;
        let mut object = Object::new();
        for (name, value) in self.columns.iter().zip(self.values.iter()) {
            object.set(name.clone(), value.clone());
        }
        Ok(object)
    }
}
