//! End-to-end query tests across both dialects.

use vellum_core::{Database, Error, IndexSpec, MutableDocument, Object, Timestamp, Value};
use vellum_query::{Dialect, Query};

fn seed_people(db: &Database) {
    let col = db.default_collection().unwrap();
    let people = [
        ("alice", r#"{"name": "Alice", "age": 30, "city": "Oslo"}"#),
        ("bob", r#"{"name": "Bob", "age": 25, "city": "Bergen"}"#),
        ("carol", r#"{"name": "Carol", "age": 41, "city": "Oslo"}"#),
        ("dave", r#"{"name": "Dave", "age": 25, "city": "Trondheim"}"#),
    ];
    for (id, json) in people {
        let mut doc = MutableDocument::new(id);
        doc.set_json(json).unwrap();
        col.save(&mut doc).unwrap();
    }
}

fn names(query: &Query) -> Vec<String> {
    let mut out = Vec::new();
    let mut results = query.execute().unwrap();
    while let Some(row) = results.next() {
        match row.value("name").unwrap() {
            Value::String(s) => out.push(s.clone()),
            other => panic!("expected string, got {other:?}"),
        }
    }
    out
}

#[test]
fn filter_order_limit_offset() {
    let db = Database::open_in_memory("q1").unwrap();
    seed_people(&db);

    let query = Query::compile(
        &db,
        "SELECT name FROM _default WHERE age >= 25 ORDER BY age DESC, name LIMIT 2 OFFSET 1",
        Dialect::Sql,
    )
    .unwrap();
    assert_eq!(names(&query), vec!["Alice", "Bob"]);
}

#[test]
fn both_dialects_return_the_same_rows() {
    let db = Database::open_in_memory("q2").unwrap();
    seed_people(&db);

    let sql = Query::compile(
        &db,
        "SELECT name FROM _default WHERE city = 'Oslo' ORDER BY name",
        Dialect::Sql,
    )
    .unwrap();
    let json = Query::compile(
        &db,
        r#"{"SELECT": ["name"],
            "FROM": "_default",
            "WHERE": {"eq": ["city", {"value": "Oslo"}]},
            "ORDER_BY": ["name"]}"#,
        Dialect::Json,
    )
    .unwrap();

    assert_eq!(names(&sql), vec!["Alice", "Carol"]);
    assert_eq!(names(&sql), names(&json));
}

#[test]
fn parameters_rebind_between_executions() {
    let db = Database::open_in_memory("q3").unwrap();
    seed_people(&db);

    let query = Query::compile(
        &db,
        "SELECT name FROM _default WHERE age = $age ORDER BY name",
        Dialect::Sql,
    )
    .unwrap();

    let mut params = Object::new();
    params.set("age", 25.0);
    query.set_parameters(params);
    assert_eq!(names(&query), vec!["Bob", "Dave"]);

    let mut params = Object::new();
    params.set("age", 41.0);
    query.set_parameters(params);
    assert_eq!(names(&query), vec!["Carol"]);
}

#[test]
fn unbound_parameter_fails_execution() {
    let db = Database::open_in_memory("q4").unwrap();
    seed_people(&db);

    let query = Query::compile(
        &db,
        "SELECT name FROM _default WHERE age = $age",
        Dialect::Sql,
    )
    .unwrap();
    assert!(matches!(
        query.execute(),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn select_star_column_is_named_after_the_collection() {
    let db = Database::open_in_memory("q5").unwrap();
    seed_people(&db);

    let query = Query::compile(
        &db,
        "SELECT * FROM _default WHERE name = 'Alice'",
        Dialect::Sql,
    )
    .unwrap();
    assert_eq!(query.column_names(), ["_default"]);

    let mut results = query.execute().unwrap();
    let row = results.next().unwrap();
    let Value::Object(props) = row.value("_default").unwrap() else {
        panic!("expected object column");
    };
    let stored = db
        .default_collection()
        .unwrap()
        .document("alice")
        .unwrap()
        .unwrap();
    assert_eq!(props, stored.properties());
    assert!(results.next().is_none());
}

#[test]
fn count_star_returns_one_row() {
    let db = Database::open_in_memory("q6").unwrap();
    seed_people(&db);

    let query = Query::compile(
        &db,
        "SELECT count(*) AS total FROM _default WHERE age = 25",
        Dialect::Sql,
    )
    .unwrap();
    assert_eq!(query.column_names(), ["total"]);

    let mut results = query.execute().unwrap();
    let row = results.next().unwrap();
    assert_eq!(row.value("total").unwrap(), &Value::from(2.0));
    assert!(results.next().is_none());
}

#[test]
fn count_star_mixed_with_columns_is_rejected() {
    let db = Database::open_in_memory("q7").unwrap();
    assert!(matches!(
        Query::compile(&db, "SELECT count(*), name FROM _default", Dialect::Sql),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn index_scan_matches_full_scan_results() {
    let db = Database::open_in_memory("q8").unwrap();
    seed_people(&db);

    let sql = "SELECT name FROM _default WHERE age >= 25 AND age < 41 ORDER BY name";
    let unindexed = Query::compile(&db, sql, Dialect::Sql).unwrap();
    let before = names(&unindexed);

    let col = db.default_collection().unwrap();
    col.create_index("by-age", IndexSpec::value(["age"])).unwrap();

    let indexed = Query::compile(&db, sql, Dialect::Sql).unwrap();
    assert!(indexed.explain().unwrap().contains("by-age"));
    assert_eq!(names(&indexed), before);
}

#[test]
fn full_text_match_with_residual_filter() {
    let db = Database::open_in_memory("q9").unwrap();
    let col = db.default_collection().unwrap();
    col.create_index("fts-bio", IndexSpec::full_text(["bio"]))
        .unwrap();

    let docs = [
        ("a", r#"{"name": "Ada", "age": 36, "bio": "Writes compilers in Rust"}"#),
        ("b", r#"{"name": "Ben", "age": 20, "bio": "Writes Rust every day"}"#),
        ("c", r#"{"name": "Cy", "age": 50, "bio": "Prefers spreadsheets"}"#),
    ];
    for (id, json) in docs {
        let mut doc = MutableDocument::new(id);
        doc.set_json(json).unwrap();
        col.save(&mut doc).unwrap();
    }

    let query = Query::compile(
        &db,
        "SELECT name FROM _default WHERE MATCH(fts-bio, 'rust') AND age > 21 ORDER BY name",
        Dialect::Sql,
    )
    .unwrap();
    assert_eq!(names(&query), vec!["Ada"]);
    assert!(query.explain().unwrap().contains("fts-bio"));
}

#[test]
fn advancing_the_result_set_invalidates_the_previous_row() {
    let db = Database::open_in_memory("q10").unwrap();
    seed_people(&db);

    let query = Query::compile(
        &db,
        "SELECT name FROM _default ORDER BY name",
        Dialect::Sql,
    )
    .unwrap();
    let mut results = query.execute().unwrap();

    let first = results.next().unwrap();
    assert!(first.value("name").is_ok());

    let _second = results.next().unwrap();
    assert!(matches!(
        first.value("name"),
        Err(Error::StaleResultAccess)
    ));
    assert!(matches!(first.value_at(0), Err(Error::StaleResultAccess)));
}

#[test]
fn expired_documents_are_not_returned() {
    let db = Database::open_in_memory("q11").unwrap();
    seed_people(&db);

    let col = db.default_collection().unwrap();
    col.set_expiration("alice", Some(Timestamp::from_millis(1)))
        .unwrap();

    let query = Query::compile(
        &db,
        "SELECT name FROM _default ORDER BY name",
        Dialect::Sql,
    )
    .unwrap();
    assert_eq!(names(&query), vec!["Bob", "Carol", "Dave"]);
}

#[test]
fn queries_reach_named_scopes_and_collections() {
    let db = Database::open_in_memory("q12").unwrap();
    let sensors = db.create_collection("measures", "temperatures").unwrap();
    for i in 0..5 {
        let mut doc = MutableDocument::new(format!("t{i}"));
        doc.set_json(&format!(r#"{{"celsius": {}}}"#, 15 + i)).unwrap();
        sensors.save(&mut doc).unwrap();
    }

    let query = Query::compile(
        &db,
        "SELECT count(*) FROM measures.temperatures WHERE celsius >= 17",
        Dialect::Sql,
    )
    .unwrap();
    let mut results = query.execute().unwrap();
    let row = results.next().unwrap();
    assert_eq!(row.value("count").unwrap(), &Value::from(3.0));
}

#[test]
fn querying_a_missing_collection_fails() {
    let db = Database::open_in_memory("q13").unwrap();
    let query = Query::compile(&db, "SELECT * FROM nope.nothing", Dialect::Sql).unwrap();
    assert!(matches!(query.execute(), Err(Error::NotFound { .. })));
}

#[test]
fn row_lookup_by_unknown_column_fails() {
    let db = Database::open_in_memory("q14").unwrap();
    seed_people(&db);

    let query = Query::compile(&db, "SELECT name FROM _default LIMIT 1", Dialect::Sql).unwrap();
    let mut results = query.execute().unwrap();
    let row = results.next().unwrap();
    assert!(matches!(
        row.value("ghost"),
        Err(Error::InvalidArgument { .. })
    ));
}
