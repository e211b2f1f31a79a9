//! # Vellum Query
//!
//! Query engine for VellumDB collections.
//!
//! Queries compile from either of two dialects, a SQL-like text form or a
//! JSON object form, into one shared plan representation. Execution scans
//! a collection (using a value or full-text index when the predicate
//! allows), filters with the full predicate, then orders, windows, and
//! projects rows.
//!
//! ```no_run
//! use vellum_core::Database;
//! use vellum_query::{Dialect, Query};
//!
//! # fn main() -> vellum_core::Result<()> {
//! let db = Database::open_in_memory("demo")?;
//! let query = Query::compile(
//!     &db,
//!     "SELECT name, age FROM _default WHERE age >= $min ORDER BY age",
//!     Dialect::Sql,
//! )?;
//! let mut params = vellum_core::Object::new();
//! params.set("min", 21.0);
//! query.set_parameters(params);
//! let mut results = query.execute()?;
//! while let Some(row) = results.next() {
//!     println!("{:?}", row.as_object()?);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod ast;
mod eval;
mod json_dialect;
mod lexer;
mod live;
mod parser;
mod planner;
mod query;

pub use query::{Dialect, Query, ResultSet, Row};
