//! Scenario: cursor expiry repairs the stream position.
//!
//! A `Gone` frame means the held cursor can no longer be resumed from
//! history. When its diagnostic carries a replacement version, the next open
//! must use it; when it does not, the cursor resets and the controller
//! resyncs from current state. Either way the invalidated stream is
//! abandoned immediately.

use pgc_reconcile::Reconciler;
use pgc_testkit::{added, claim_spec, gone, test_resolver, RecordingFactory, ScriptedSource, StreamScript};
use pgc_watch::Driver;
use std::sync::Arc;

async fn run(scripts: Vec<StreamScript>, factory: Arc<RecordingFactory>) -> Vec<String> {
    let source = ScriptedSource::new(scripts);
    let opened_at = source.opened_at();
    let mut reconciler = Reconciler::new(test_resolver(), factory);
    let mut driver = Driver::new(source);
    driver.run(&mut reconciler, std::future::pending()).await;
    let cursors = opened_at.lock().unwrap().clone();
    cursors
}

#[tokio::test(start_paused = true)]
async fn parseable_notice_moves_the_cursor_to_the_embedded_version() {
    let factory = RecordingFactory::new();
    let scripts = vec![
        StreamScript::Events(vec![
            added("claim-1", "12345", claim_spec("appdb", "approle")),
            gone("too old resource version: seen 12345 (9999)"),
            // Anything after the Gone frame belongs to an invalidated
            // stream and must never be read.
            added("claim-ignored", "99999", claim_spec("ghostdb", "ghostrole")),
        ]),
        StreamScript::Events(vec![added("claim-2", "10001", claim_spec("otherdb", "otherrole"))]),
    ];

    let cursors = run(scripts, Arc::clone(&factory)).await;

    assert_eq!(cursors[0], "");
    assert_eq!(cursors[1], "9999", "reopen must use the extracted version");
    assert_eq!(cursors[2], "10001");

    let statements = factory.statements();
    assert!(
        statements.iter().all(|s| !s.contains("ghostdb")),
        "events past a Gone frame must not be processed: {statements:?}"
    );
    // The stream after resumption keeps reconciling.
    assert!(statements.contains(&"CREATE DATABASE otherdb".to_string()));
}

#[tokio::test(start_paused = true)]
async fn unparseable_notice_resets_to_a_full_resync() {
    let factory = RecordingFactory::new();
    let scripts = vec![StreamScript::Events(vec![
        added("claim-1", "12345", claim_spec("appdb", "approle")),
        gone("watch cache torn down for maintenance"),
    ])];

    let cursors = run(scripts, factory).await;

    assert_eq!(cursors[0], "");
    assert_eq!(
        cursors[1], "",
        "an unparseable expiry notice must force a resync from current state"
    );
}
