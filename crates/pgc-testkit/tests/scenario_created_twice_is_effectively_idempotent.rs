//! Scenario: redelivered Created events are effectively applied once.
//!
//! Delivery is at-least-once: after a reconnect the source may replay an
//! event the controller already processed. The second application must find
//! the database and role in place and perform only the grant — no second
//! CREATE, no re-run of extensions or extra SQL.

use pgc_reconcile::Reconciler;
use pgc_testkit::{added, claim_spec, merge_spec, test_resolver, RecordingFactory, ScriptedSource, StreamScript};
use pgc_watch::{Driver, DriverExit};
use serde_json::json;
use std::sync::Arc;

async fn run(scripts: Vec<StreamScript>, factory: Arc<RecordingFactory>) -> (DriverExit, Vec<String>) {
    let source = ScriptedSource::new(scripts);
    let opened_at = source.opened_at();
    let mut reconciler = Reconciler::new(test_resolver(), factory);
    let mut driver = Driver::new(source);
    let exit = driver.run(&mut reconciler, std::future::pending()).await;
    let cursors = opened_at.lock().unwrap().clone();
    (exit, cursors)
}

fn rich_spec() -> serde_json::Value {
    merge_spec(
        claim_spec("appdb", "approle"),
        json!({
            "dbExtensions": ["pgcrypto"],
            "extraSQL": "CREATE TABLE seeded (id int);"
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn replay_within_one_stream_creates_once() {
    let factory = RecordingFactory::new();
    let scripts = vec![StreamScript::Events(vec![
        added("claim-1", "1", rich_spec()),
        added("claim-1", "2", rich_spec()),
    ])];

    let (exit, _) = run(scripts, Arc::clone(&factory)).await;

    assert_eq!(exit, DriverExit::Unauthorized("script exhausted".to_string()));
    assert_eq!(
        factory.statements(),
        vec![
            // First delivery: full first-time initialization.
            "CREATE DATABASE appdb",
            "CREATE ROLE approle",
            "GRANT appdb TO approle",
            "CREATE EXTENSION appdb.pgcrypto",
            "EXTRA SQL ON appdb AS approle",
            // Redelivery: only the grant.
            "GRANT appdb TO approle",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn replay_across_a_reconnect_creates_once() {
    let factory = RecordingFactory::new();
    let scripts = vec![
        StreamScript::Events(vec![added("claim-1", "1", rich_spec())]),
        // The reconnect replays the same resource version.
        StreamScript::Events(vec![added("claim-1", "1", rich_spec())]),
    ];

    run(scripts, Arc::clone(&factory)).await;

    let statements = factory.statements();
    let creates = statements
        .iter()
        .filter(|s| s.starts_with("CREATE DATABASE"))
        .count();
    let extras = statements.iter().filter(|s| s.starts_with("EXTRA SQL")).count();
    assert_eq!(creates, 1, "redelivery must not re-create: {statements:?}");
    assert_eq!(extras, 1, "extra SQL must run exactly once: {statements:?}");
    // One gateway per event — connections are never reused across events.
    assert_eq!(factory.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn pre_existing_database_never_sees_extra_sql() {
    use pgc_testkit::RecordingState;

    let mut state = RecordingState::default();
    state.databases.insert("appdb".to_string());
    let factory = RecordingFactory::with_state(state);

    let scripts = vec![StreamScript::Events(vec![added("claim-1", "1", rich_spec())])];
    run(scripts, Arc::clone(&factory)).await;

    let statements = factory.statements();
    assert!(
        statements.iter().all(|s| !s.starts_with("EXTRA SQL")),
        "extra SQL must not run against a database that already existed: {statements:?}"
    );
    assert!(statements.iter().all(|s| !s.starts_with("CREATE EXTENSION")));
    // The role was still ensured and granted.
    assert!(statements.contains(&"CREATE ROLE approle".to_string()));
    assert!(statements.contains(&"GRANT appdb TO approle".to_string()));
}
