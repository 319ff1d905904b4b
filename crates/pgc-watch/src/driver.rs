//! The outer watch loop.
//!
//! Opens the stream at the held cursor, delivers events to the handler one
//! at a time in arrival order, repairs the cursor on expiry, and reopens on
//! resumable interruptions with bounded backoff. This loop is the only retry
//! mechanism in the system; per-event failures are contained inside the
//! handler and never terminate it.

use crate::cursor::{parse_expiry_notice, Cursor};
use crate::source::{EventSource, SourceError};
use async_trait::async_trait;
use pgc_schemas::ChangeEvent;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Consumes decoded events. Implementations log-and-continue internally; a
/// failed reconcile pass must not stop the stream.
#[async_trait]
pub trait EventHandler: Send {
    async fn handle(&mut self, event: ChangeEvent);
}

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverExit {
    /// Cooperative shutdown — not an error.
    Shutdown,
    /// Resource type not registered at the source; deployment error.
    NotRegistered(String),
    /// Authentication/authorization failure.
    Unauthorized(String),
}

/// Bounded exponential backoff between stream reopens.
///
/// Reset after every successfully processed event, so a healthy stream that
/// periodically times out reopens promptly while a failing source is never
/// hot-looped against.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Whether the current stream iteration keeps reading or terminates.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Reopen,
}

/// The watch-resume-reconcile engine's outer loop.
pub struct Driver<S> {
    source: S,
    cursor: Cursor,
    backoff: Backoff,
}

impl<S: EventSource> Driver<S> {
    pub fn new(source: S) -> Self {
        Driver {
            source,
            cursor: Cursor::start(),
            backoff: Backoff::default(),
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Run until a terminal condition or until `shutdown` resolves.
    ///
    /// `shutdown` is observed between events and between reopen attempts —
    /// an in-flight reconcile pass is allowed to complete.
    pub async fn run<H, F>(&mut self, handler: &mut H, shutdown: F) -> DriverExit
    where
        H: EventHandler,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            info!(cursor = %self.cursor, "opening watch stream");
            let opened = tokio::select! {
                _ = &mut shutdown => return DriverExit::Shutdown,
                opened = self.source.open(&self.cursor) => opened,
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    if let Some(exit) = terminal_exit(&err) {
                        return exit;
                    }
                    warn!(error = %err, "watch open failed; retrying");
                    let delay = self.backoff.next_delay();
                    tokio::select! {
                        _ = &mut shutdown => return DriverExit::Shutdown,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            loop {
                let next = tokio::select! {
                    _ = &mut shutdown => return DriverExit::Shutdown,
                    next = stream.next_event() => next,
                };

                match next {
                    Ok(Some(raw)) => {
                        let event = ChangeEvent::decode(&raw);
                        if self.process(event, handler).await == Step::Reopen {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("watch stream ended; reopening");
                        break;
                    }
                    Err(err) => {
                        if let Some(exit) = terminal_exit(&err) {
                            return exit;
                        }
                        warn!(error = %err, "watch stream interrupted; reopening");
                        break;
                    }
                }
            }

            let delay = self.backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "pausing before reopen");
            tokio::select! {
                _ = &mut shutdown => return DriverExit::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn process<H: EventHandler>(&mut self, event: ChangeEvent, handler: &mut H) -> Step {
        match event {
            ChangeEvent::Malformed { detail } => {
                // Skipped without advancing or resetting the cursor.
                error!(detail = %detail, "skipping malformed event");
                Step::Continue
            }
            ChangeEvent::Gone { notice } => {
                // Continuing to read an invalidated stream is undefined;
                // repair the cursor and force a reopen either way.
                match parse_expiry_notice(&notice) {
                    Some(version) => {
                        warn!(resume_from = version, "cursor expired; resuming from replacement");
                        self.cursor.set(version.to_string());
                    }
                    None => {
                        warn!(notice = %notice, "cursor expired, notice unparseable; resyncing from current state");
                        self.cursor.reset();
                    }
                }
                Step::Reopen
            }
            event => {
                if let Some(version) = event.cursor() {
                    self.cursor.advance(version);
                    debug!(cursor = %self.cursor, "cursor advanced");
                }
                handler.handle(event).await;
                self.backoff.reset();
                Step::Continue
            }
        }
    }
}

fn terminal_exit(err: &SourceError) -> Option<DriverExit> {
    match err {
        SourceError::NotRegistered(msg) => {
            error!(error = %err, "resource type not registered; stopping");
            Some(DriverExit::NotRegistered(msg.clone()))
        }
        SourceError::Unauthorized(msg) => {
            error!(error = %err, "watch unauthorized; stopping");
            Some(DriverExit::Unauthorized(msg.clone()))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EventStream;
    use pgc_schemas::RawWatchEvent;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn added(name: &str, rv: &str) -> RawWatchEvent {
        RawWatchEvent {
            kind: "ADDED".to_string(),
            object: json!({
                "metadata": {"name": name, "resourceVersion": rv},
                "spec": {"dbName": "d", "dbRoleName": "r", "dbRolePassword": "p"}
            }),
        }
    }

    fn gone(message: &str) -> RawWatchEvent {
        RawWatchEvent {
            kind: "ERROR".to_string(),
            object: json!({"code": 410, "message": message}),
        }
    }

    struct ScriptedStream {
        events: VecDeque<RawWatchEvent>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<Option<RawWatchEvent>, SourceError> {
            Ok(self.events.pop_front())
        }
    }

    /// Pops one scripted iteration per open; records the cursor each open
    /// was positioned at. Exhaustion is unauthorized so runs terminate.
    struct ScriptedSource {
        streams: VecDeque<Result<Vec<RawWatchEvent>, SourceError>>,
        opened_at: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn open(&mut self, cursor: &Cursor) -> Result<Box<dyn EventStream>, SourceError> {
            self.opened_at
                .lock()
                .unwrap()
                .push(cursor.as_str().to_string());
            match self.streams.pop_front() {
                Some(Ok(events)) => Ok(Box::new(ScriptedStream {
                    events: events.into(),
                })),
                Some(Err(err)) => Err(err),
                None => Err(SourceError::Unauthorized("script exhausted".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        created: usize,
        updated: usize,
        deleted: usize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&mut self, event: ChangeEvent) {
            match event {
                ChangeEvent::Created(_) => self.created += 1,
                ChangeEvent::Updated(_) => self.updated += 1,
                ChangeEvent::Deleted(_) => self.deleted += 1,
                ChangeEvent::Gone { .. } | ChangeEvent::Malformed { .. } => {
                    panic!("driver must not hand Gone/Malformed to the handler")
                }
            }
        }
    }

    fn driver_with(
        streams: Vec<Result<Vec<RawWatchEvent>, SourceError>>,
    ) -> (Driver<ScriptedSource>, Arc<Mutex<Vec<String>>>) {
        let opened_at = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource {
            streams: streams.into(),
            opened_at: Arc::clone(&opened_at),
        };
        (Driver::new(source), opened_at)
    }

    #[tokio::test(start_paused = true)]
    async fn gone_reopens_with_the_replacement_cursor() {
        let (mut driver, opened_at) = driver_with(vec![Ok(vec![
            added("claim-1", "41"),
            gone("too old resource version: seen 41 (9999)"),
        ])]);
        let mut handler = CountingHandler::default();

        let exit = driver.run(&mut handler, std::future::pending()).await;

        assert_eq!(exit, DriverExit::Unauthorized("script exhausted".to_string()));
        assert_eq!(handler.created, 1);
        assert_eq!(*opened_at.lock().unwrap(), vec!["", "9999"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_gone_resets_to_a_full_resync() {
        let (mut driver, opened_at) = driver_with(vec![Ok(vec![
            added("claim-1", "41"),
            gone("stream state lost, no hint"),
        ])]);
        let mut handler = CountingHandler::default();

        driver.run(&mut handler, std::future::pending()).await;

        assert_eq!(*opened_at.lock().unwrap(), vec!["", ""]);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_events_do_not_move_the_cursor() {
        let malformed = RawWatchEvent {
            kind: "ADDED".to_string(),
            object: json!({"metadata": {"name": "x", "resourceVersion": "77"}}),
        };
        let (mut driver, opened_at) =
            driver_with(vec![Ok(vec![malformed, added("claim-1", "88")])]);
        let mut handler = CountingHandler::default();

        driver.run(&mut handler, std::future::pending()).await;

        // The malformed event's version 77 must never appear; the reopen
        // carries the last well-shaped event's version.
        assert_eq!(*opened_at.lock().unwrap(), vec!["", "88"]);
        assert_eq!(handler.created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn orderly_end_of_stream_reopens_with_held_cursor() {
        let (mut driver, opened_at) = driver_with(vec![
            Ok(vec![added("claim-1", "5")]),
            Ok(vec![added("claim-2", "6")]),
        ]);
        let mut handler = CountingHandler::default();

        driver.run(&mut handler, std::future::pending()).await;

        assert_eq!(*opened_at.lock().unwrap(), vec!["", "5", "6"]);
        assert_eq!(handler.created, 2);
        assert_eq!(handler.updated, 0);
        assert_eq!(handler.deleted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resumable_open_failure_retries_instead_of_exiting() {
        let (mut driver, opened_at) = driver_with(vec![
            Err(SourceError::Interrupted("connection refused".to_string())),
            Ok(vec![added("claim-1", "5")]),
        ]);
        let mut handler = CountingHandler::default();

        driver.run(&mut handler, std::future::pending()).await;

        assert_eq!(opened_at.lock().unwrap().len(), 3);
        assert_eq!(handler.created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_registered_is_terminal() {
        let (mut driver, _) = driver_with(vec![Err(SourceError::NotRegistered(
            "pgdatabases".to_string(),
        ))]);
        let mut handler = CountingHandler::default();

        let exit = driver.run(&mut handler, std::future::pending()).await;

        assert_eq!(exit, DriverExit::NotRegistered("pgdatabases".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wins_before_any_open() {
        let (mut driver, opened_at) = driver_with(vec![Ok(vec![added("claim-1", "5")])]);
        let mut handler = CountingHandler::default();

        let exit = driver.run(&mut handler, std::future::ready(())).await;

        assert_eq!(exit, DriverExit::Shutdown);
        assert!(opened_at.lock().unwrap().is_empty());
        assert_eq!(handler.created, 0);
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(16));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
