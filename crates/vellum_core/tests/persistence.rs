//! On-disk behavior: reopen, crash recovery, compaction.

use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;
use vellum_core::{
    ConcurrencyControl, Config, Database, Error, IndexSpec, MutableDocument, SequenceNumber,
    Timestamp, Value,
};

fn save(db: &Database, id: &str, json: &str) {
    let col = db.default_collection().unwrap();
    let mut doc = MutableDocument::new(id);
    doc.set_json(json).unwrap();
    col.save(&mut doc).unwrap();
}

#[test]
fn documents_survive_reopen() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    {
        let db = Database::open(&path).unwrap();
        save(&db, "alpha", r#"{"n": 1}"#);
        save(&db, "beta", r#"{"n": 2, "nested": {"deep": true}}"#);
        db.close().unwrap();
    }

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();
    assert_eq!(col.count().unwrap(), 2);

    let doc = col.document("beta").unwrap().unwrap();
    assert_eq!(
        doc.properties().resolve_path("nested.deep"),
        Some(&Value::Bool(true))
    );
}

#[test]
fn sequences_continue_after_reopen() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    {
        let db = Database::open(&path).unwrap();
        save(&db, "a", r#"{"n": 1}"#);
        save(&db, "b", r#"{"n": 2}"#);
    }

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();
    assert_eq!(col.last_sequence().unwrap(), SequenceNumber::new(2));

    save(&db, "c", r#"{"n": 3}"#);
    let doc = col.document("c").unwrap().unwrap();
    assert_eq!(doc.sequence(), SequenceNumber::new(3));
}

#[test]
fn tombstones_and_purges_survive_reopen() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    {
        let db = Database::open(&path).unwrap();
        save(&db, "kept", r#"{"n": 1}"#);
        save(&db, "deleted", r#"{"n": 2}"#);
        save(&db, "purged", r#"{"n": 3}"#);

        let col = db.default_collection().unwrap();
        let doc = col.document("deleted").unwrap().unwrap();
        col.delete(&doc).unwrap();
        col.purge_by_id("purged").unwrap();
    }

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();
    assert_eq!(col.count().unwrap(), 1);
    assert_eq!(col.document("deleted").unwrap(), None);

    let changes = col.changes_since(SequenceNumber::new(0), None).unwrap();
    let ids: Vec<&str> = changes.iter().map(|c| c.document_id.as_str()).collect();
    assert!(ids.contains(&"deleted"));
    assert!(!ids.contains(&"purged"));
    assert!(changes.iter().any(|c| c.document_id == "deleted" && c.deleted));
}

#[test]
fn collections_and_indexes_rebuild_on_open() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    {
        let db = Database::open(&path).unwrap();
        let col = db.create_collection("inventory", "hotels").unwrap();
        col.create_index("by-city", IndexSpec::value(["city"])).unwrap();

        let mut doc = MutableDocument::new("h1");
        doc.set("city", "Oslo");
        col.save(&mut doc).unwrap();
    }

    let db = Database::open(&path).unwrap();
    let col = db.collection("inventory", "hotels").unwrap();
    assert_eq!(col.index_names().unwrap(), vec!["by-city".to_string()]);

    let hits = col.scan_index_eq("by-city", &[Value::from("Oslo")]).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id(), "h1");
}

#[test]
fn expiration_survives_reopen() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");
    let far_future = Timestamp::now().saturating_add(std::time::Duration::from_secs(3600));

    {
        let db = Database::open(&path).unwrap();
        save(&db, "ttl", r#"{"n": 1}"#);
        let col = db.default_collection().unwrap();
        col.set_expiration("ttl", Some(far_future)).unwrap();
    }

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();
    assert_eq!(col.expiration("ttl").unwrap(), Some(far_future));
    assert!(col.document("ttl").unwrap().is_some());
}

#[test]
fn torn_journal_tail_recovers_committed_prefix() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    {
        let db = Database::open(&path).unwrap();
        save(&db, "a", r#"{"n": 1}"#);
        save(&db, "b", r#"{"n": 2}"#);
    }

    // Simulate a crash mid-append: garbage after the last record.
    let journal = path.join("journal.vlm");
    let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
    file.write_all(&[0x13, 0x00, 0x00]).unwrap();
    file.sync_all().unwrap();

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();
    assert_eq!(col.count().unwrap(), 2);

    // The store accepts writes again after recovery.
    save(&db, "c", r#"{"n": 3}"#);
    assert_eq!(col.count().unwrap(), 3);
}

#[test]
fn compaction_preserves_state_and_shrinks_journal() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();

    let mut doc = MutableDocument::new("churn");
    for n in 0..50 {
        doc.set("n", n);
        col.save(&mut doc).unwrap();
    }
    save(&db, "stable", r#"{"x": true}"#);
    let deleted = col.document("churn").unwrap().unwrap();
    col.delete(&deleted).unwrap();
    db.set_metadata("ckpt", "99").unwrap();

    let before = std::fs::metadata(path.join("journal.vlm")).unwrap().len();
    db.compact().unwrap();
    let after = std::fs::metadata(path.join("journal.vlm")).unwrap().len();
    assert!(after < before);

    db.close().unwrap();
    drop(db);

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();
    assert_eq!(col.count().unwrap(), 1);
    assert_eq!(col.document("churn").unwrap(), None);
    assert_eq!(db.metadata("ckpt").unwrap(), Some("99".to_string()));

    // The tombstone is still visible to the change history.
    let changes = col.changes_since(SequenceNumber::new(0), None).unwrap();
    assert!(changes.iter().any(|c| c.document_id == "churn" && c.deleted));
}

#[test]
fn second_process_cannot_open_locked_database() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    let _db = Database::open(&path).unwrap();
    let second = Database::open(&path);
    assert!(matches!(second, Err(Error::StoreUnavailable { .. })));
}

#[test]
fn missing_database_without_create_fails() {
    let temp = tempdir().unwrap();
    let result = Database::open_with_config(
        temp.path().join("absent"),
        Config::new().create_if_missing(false),
    );
    assert!(matches!(result, Err(Error::StoreUnavailable { .. })));
}

#[test]
fn conflict_detection_survives_reopen() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("db");

    {
        let db = Database::open(&path).unwrap();
        save(&db, "doc", r#"{"v": 1}"#);
    }

    let db = Database::open(&path).unwrap();
    let col = db.default_collection().unwrap();

    let mut first = col.mutable_document("doc").unwrap().unwrap();
    let mut second = col.mutable_document("doc").unwrap().unwrap();

    first.set("v", 2);
    col.save_with(&mut first, ConcurrencyControl::FailOnConflict)
        .unwrap();

    second.set("v", 3);
    let err = col
        .save_with(&mut second, ConcurrencyControl::FailOnConflict)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn arbitrary_string_properties_round_trip(
        entries in proptest::collection::btree_map("[a-z]{1,8}", ".{0,32}", 1..8)
    ) {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        {
            let db = Database::open(&path).unwrap();
            let col = db.default_collection().unwrap();
            let mut doc = MutableDocument::new("p");
            for (k, v) in &entries {
                doc.set(k.clone(), v.clone());
            }
            col.save(&mut doc).unwrap();
        }

        let db = Database::open(&path).unwrap();
        let col = db.default_collection().unwrap();
        let doc = col.document("p").unwrap().unwrap();
        for (k, v) in &entries {
            prop_assert_eq!(doc.get(k), Some(&Value::from(v.clone())));
        }
    }
}
