//! End-to-end replication over the loopback transport.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vellum_core::{Database, MutableDocument, Value};
use vellum_repl::{
    Activity, CollectionConfig, Direction, LoopbackTransport, MockTransport, ReplError,
    Replicator, ReplicatorConfig, ReplicatorStatus, RetryConfig,
};

/// Route session logs through the test harness; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn save(db: &Database, id: &str, json: &str) {
    let col = db.default_collection().unwrap();
    let mut doc = MutableDocument::new(id);
    doc.set_json(json).unwrap();
    col.save(&mut doc).unwrap();
}

fn default_config(endpoint: &str) -> ReplicatorConfig {
    ReplicatorConfig::new(endpoint)
        .with_collection(CollectionConfig::new("_default", "_default"))
        .with_retry(RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            add_jitter: false,
        })
}

/// Starts the replicator and collects every status until `Stopped`.
fn run_to_completion(replicator: &Replicator, reset: bool) -> Vec<ReplicatorStatus> {
    init_tracing();
    let (tx, rx) = mpsc::channel();
    let _token = replicator.add_status_listener(move |status| {
        let _ = tx.send(status.clone());
    });
    replicator.start(reset);

    let mut seen = Vec::new();
    loop {
        let status = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("replicator made no progress");
        let stopped = status.activity == Activity::Stopped;
        seen.push(status);
        if stopped {
            return seen;
        }
    }
}

#[test]
fn push_and_pull_converge_both_directions() {
    let a = Database::open_in_memory("conv-a").unwrap();
    let b = Database::open_in_memory("conv-b").unwrap();
    save(&a, "from-a", r#"{"origin": "a"}"#);
    save(&b, "from-b", r#"{"origin": "b"}"#);

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b"),
        LoopbackTransport::new(b.clone()),
    )
    .unwrap();
    let statuses = run_to_completion(&replicator, false);
    assert!(statuses.last().unwrap().error.is_none());

    for db in [&a, &b] {
        let col = db.default_collection().unwrap();
        assert!(col.document("from-a").unwrap().is_some());
        assert!(col.document("from-b").unwrap().is_some());
    }
}

#[test]
fn pull_direction_does_not_push() {
    let a = Database::open_in_memory("pull-a").unwrap();
    let b = Database::open_in_memory("pull-b").unwrap();
    save(&a, "local-only", r#"{"n": 1}"#);
    save(&b, "remote", r#"{"n": 2}"#);

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b").with_direction(Direction::Pull),
        LoopbackTransport::new(b.clone()),
    )
    .unwrap();
    run_to_completion(&replicator, false);

    assert!(a
        .default_collection()
        .unwrap()
        .document("remote")
        .unwrap()
        .is_some());
    assert!(b
        .default_collection()
        .unwrap()
        .document("local-only")
        .unwrap()
        .is_none());
}

#[test]
fn continuous_session_goes_idle_and_reacts_to_commits() {
    let a = Database::open_in_memory("cont-a").unwrap();
    let b = Database::open_in_memory("cont-b").unwrap();

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b")
            .with_continuous(true)
            .with_heartbeat(Duration::from_secs(60)),
        LoopbackTransport::new(b.clone()),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    let _token = replicator.add_status_listener(move |status| {
        let _ = tx.send(status.activity);
    });
    replicator.start(false);

    let mut seen = Vec::new();
    while !seen.contains(&Activity::Idle) {
        seen.push(rx.recv_timeout(Duration::from_secs(10)).unwrap());
    }
    assert!(seen.contains(&Activity::Connecting));
    assert!(seen.contains(&Activity::Busy));

    // A commit while idle wakes the session and replicates.
    save(&a, "late", r#"{"n": 3}"#);
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while b
        .default_collection()
        .unwrap()
        .document("late")
        .unwrap()
        .is_none()
    {
        assert!(std::time::Instant::now() < deadline, "commit not replicated");
        std::thread::sleep(Duration::from_millis(10));
    }

    replicator.stop();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while replicator.status().activity != Activity::Stopped {
        assert!(std::time::Instant::now() < deadline, "did not stop");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn transport_loss_reports_offline_then_stops_after_max_attempts() {
    let a = Database::open_in_memory("off-a").unwrap();
    save(&a, "d", r#"{"n": 1}"#);

    let transport = MockTransport::new();
    transport.set_connected(false);

    let replicator = Replicator::new(
        &a,
        default_config("mock://down").with_max_attempts(2),
        transport,
    )
    .unwrap();
    let statuses = run_to_completion(&replicator, false);

    assert!(statuses.iter().any(|s| s.activity == Activity::Offline));
    let last = statuses.last().unwrap();
    assert_eq!(last.activity, Activity::Stopped);
    assert!(matches!(
        last.error.as_deref(),
        Some(ReplError::Transport { retryable: true, .. })
    ));
}

#[test]
fn recoverable_failure_retries_and_succeeds() {
    let a = Database::open_in_memory("retry-a").unwrap();
    let b = Database::open_in_memory("retry-b").unwrap();
    save(&b, "remote", r#"{"n": 1}"#);

    let transport = MockTransport::new();
    transport.enqueue_pull(Err(ReplError::transport_retryable("blip")));

    // First cycle fails, second (scripted queue empty) succeeds.
    let replicator = Replicator::new(&a, default_config("mock://flaky"), transport).unwrap();
    let statuses = run_to_completion(&replicator, false);

    assert!(statuses.iter().any(|s| s.activity == Activity::Offline));
    let last = statuses.last().unwrap();
    assert!(last.error.is_none(), "error should clear after recovery");
    drop(b);
}

#[test]
fn bad_credentials_stop_without_retry() {
    let a = Database::open_in_memory("auth-a").unwrap();
    let b = Database::open_in_memory("auth-b").unwrap();

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b"),
        LoopbackTransport::new(b).with_credentials("sync", "s3cret"),
    )
    .unwrap();
    let statuses = run_to_completion(&replicator, false);

    assert!(!statuses.iter().any(|s| s.activity == Activity::Offline));
    assert!(matches!(
        statuses.last().unwrap().error.as_deref(),
        Some(ReplError::Authentication(_))
    ));
}

#[test]
fn push_filter_keeps_documents_local() {
    let a = Database::open_in_memory("pf-a").unwrap();
    let b = Database::open_in_memory("pf-b").unwrap();
    save(&a, "public-1", r#"{"kind": "public"}"#);
    save(&a, "private-1", r#"{"kind": "private"}"#);

    let config = ReplicatorConfig::new("loopback://b")
        .with_direction(Direction::Push)
        .with_collection(
            CollectionConfig::new("_default", "_default")
                .with_push_filter(|delta| delta.id.starts_with("public-")),
        );
    let replicator =
        Replicator::new(&a, config, LoopbackTransport::new(b.clone())).unwrap();
    run_to_completion(&replicator, false);

    let col = b.default_collection().unwrap();
    assert!(col.document("public-1").unwrap().is_some());
    assert!(col.document("private-1").unwrap().is_none());
}

#[test]
fn pull_filter_rejects_incoming_changes() {
    let a = Database::open_in_memory("plf-a").unwrap();
    let b = Database::open_in_memory("plf-b").unwrap();
    save(&b, "wanted", r#"{"n": 1}"#);
    save(&b, "unwanted", r#"{"n": 2}"#);

    let config = ReplicatorConfig::new("loopback://b")
        .with_direction(Direction::Pull)
        .with_collection(
            CollectionConfig::new("_default", "_default")
                .with_pull_filter(|delta| delta.id != "unwanted"),
        );
    let replicator = Replicator::new(&a, config, LoopbackTransport::new(b)).unwrap();
    run_to_completion(&replicator, false);

    let col = a.default_collection().unwrap();
    assert!(col.document("wanted").unwrap().is_some());
    assert!(col.document("unwanted").unwrap().is_none());
}

#[test]
fn deletions_replicate_and_newer_local_tombstone_wins() {
    let a = Database::open_in_memory("del-a").unwrap();
    let b = Database::open_in_memory("del-b").unwrap();
    save(&a, "doomed", r#"{"n": 1}"#);

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b"),
        LoopbackTransport::new(b.clone()),
    )
    .unwrap();
    run_to_completion(&replicator, false);
    assert!(b
        .default_collection()
        .unwrap()
        .document("doomed")
        .unwrap()
        .is_some());

    // Delete locally, then pull: the local tombstone is newer than the
    // peer's live revision and survives the pull before the push removes
    // the peer's copy.
    let col = a.default_collection().unwrap();
    let doc = col.document("doomed").unwrap().unwrap();
    col.delete(&doc).unwrap();

    run_to_completion(&replicator, false);
    assert!(col.document("doomed").unwrap().is_none());
    assert!(b
        .default_collection()
        .unwrap()
        .document("doomed")
        .unwrap()
        .is_none());
}

#[test]
fn listener_may_drop_another_listener_from_its_callback() {
    let a = Database::open_in_memory("ldrop-a").unwrap();
    let b = Database::open_in_memory("ldrop-b").unwrap();
    save(&a, "d", r#"{"n": 1}"#);

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b"),
        LoopbackTransport::new(b),
    )
    .unwrap();

    let (noise_tx, _noise_rx) = mpsc::channel();
    let token = replicator.add_status_listener(move |status| {
        let _ = noise_tx.send(status.activity);
    });

    let parked = Mutex::new(Some(token));
    let _dropper = replicator.add_status_listener(move |_| {
        drop(parked.lock().unwrap().take());
    });

    // run_to_completion registers its own listener and waits for Stopped;
    // a dispatch thread wedged by the in-callback drop would time it out.
    let statuses = run_to_completion(&replicator, false);
    assert!(statuses.last().unwrap().error.is_none());
}

#[test]
fn checkpoints_resume_and_reset_rescans() {
    let a = Database::open_in_memory("ck-a").unwrap();
    let b = Database::open_in_memory("ck-b").unwrap();
    save(&a, "one", r#"{"n": 1}"#);
    save(&a, "two", r#"{"n": 2}"#);

    let config = default_config("loopback://b").with_direction(Direction::Push);
    let replicator =
        Replicator::new(&a, config.clone(), LoopbackTransport::new(b.clone())).unwrap();

    let pushed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&pushed);
    let _token = replicator.add_document_listener(move |event| {
        seen.lock().unwrap().push(event.id.clone());
    });

    run_to_completion(&replicator, false);
    assert_eq!(pushed.lock().unwrap().len(), 2);

    // A second session resumes from the checkpoint: only the new change
    // is offered.
    save(&a, "three", r#"{"n": 3}"#);
    run_to_completion(&replicator, false);
    assert_eq!(pushed.lock().unwrap().len(), 3);

    // Resetting the checkpoint rescans everything from sequence zero.
    run_to_completion(&replicator, true);
    assert_eq!(pushed.lock().unwrap().len(), 6);
}

#[test]
fn checkpoints_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ckpt-db");

    let b = Database::open_in_memory("ckr-b").unwrap();
    {
        let a = Database::open(&path).unwrap();
        save(&a, "one", r#"{"n": 1}"#);
        let replicator = Replicator::new(
            &a,
            default_config("loopback://b").with_direction(Direction::Push),
            LoopbackTransport::new(b.clone()),
        )
        .unwrap();
        run_to_completion(&replicator, false);
        drop(replicator);
        a.close().unwrap();
    }

    let a = Database::open(&path).unwrap();
    let replicator = Replicator::new(
        &a,
        default_config("loopback://b").with_direction(Direction::Push),
        LoopbackTransport::new(b.clone()),
    )
    .unwrap();

    let pushed = Arc::new(Mutex::new(0u64));
    let count = Arc::clone(&pushed);
    let _token = replicator.add_document_listener(move |_| {
        *count.lock().unwrap() += 1;
    });
    run_to_completion(&replicator, false);

    // Nothing changed since the persisted checkpoint.
    assert_eq!(*pushed.lock().unwrap(), 0);
}

#[test]
fn pull_document_events_carry_the_deleted_flag() {
    let a = Database::open_in_memory("ev-a").unwrap();
    let b = Database::open_in_memory("ev-b").unwrap();
    save(&b, "alive", r#"{"n": 1}"#);
    save(&b, "gone", r#"{"n": 2}"#);
    let col = b.default_collection().unwrap();
    let doc = col.document("gone").unwrap().unwrap();
    col.delete(&doc).unwrap();

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b").with_direction(Direction::Pull),
        LoopbackTransport::new(b),
    )
    .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _token = replicator.add_document_listener(move |event| {
        sink.lock()
            .unwrap()
            .push((event.id.clone(), event.deleted, event.pushed));
    });
    run_to_completion(&replicator, false);

    let events = events.lock().unwrap();
    assert!(events.contains(&("alive".to_string(), false, false)));
    assert!(events.contains(&("gone".to_string(), true, false)));
}

#[test]
fn replicated_documents_keep_their_properties() {
    let a = Database::open_in_memory("prop-a").unwrap();
    let b = Database::open_in_memory("prop-b").unwrap();
    save(&a, "rich", r#"{"name": "Ada", "tags": ["x", "y"], "depth": {"n": 4}}"#);

    let replicator = Replicator::new(
        &a,
        default_config("loopback://b").with_direction(Direction::Push),
        LoopbackTransport::new(b.clone()),
    )
    .unwrap();
    run_to_completion(&replicator, false);

    let doc = b
        .default_collection()
        .unwrap()
        .document("rich")
        .unwrap()
        .unwrap();
    assert_eq!(doc.properties().get("name"), Some(&Value::from("Ada")));
    assert_eq!(
        doc.properties().resolve_path("depth.n"),
        Some(&Value::from(4.0))
    );
}
