//! A watch source that plays back scripted stream iterations.

use async_trait::async_trait;
use pgc_schemas::RawWatchEvent;
use pgc_watch::{Cursor, EventSource, EventStream, SourceError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One scripted `open()` outcome: a finite stream of events (ending in an
/// orderly end-of-stream), or a failure.
pub enum StreamScript {
    Events(Vec<RawWatchEvent>),
    Fail(SourceError),
}

/// Plays one [`StreamScript`] per `open()` call and records the cursor each
/// open was positioned at.
///
/// When the script runs out, `open()` fails with
/// `Unauthorized("script exhausted")` so driver runs always terminate;
/// scenarios that end this way assert on that exit value.
pub struct ScriptedSource {
    scripts: VecDeque<StreamScript>,
    opened_at: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSource {
    pub fn new(scripts: Vec<StreamScript>) -> Self {
        ScriptedSource {
            scripts: scripts.into(),
            opened_at: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the recorded open cursors.
    pub fn opened_at(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.opened_at)
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

#[async_trait]
impl EventSource for ScriptedSource {
    async fn open(&mut self, cursor: &Cursor) -> Result<Box<dyn EventStream>, SourceError> {
        self.opened_at
            .lock()
            .unwrap()
            .push(cursor.as_str().to_string());
        match self.scripts.pop_front() {
            Some(StreamScript::Events(events)) => Ok(Box::new(ScriptedStream {
                events: events.into(),
            })),
            Some(StreamScript::Fail(err)) => Err(err),
            None => Err(SourceError::Unauthorized("script exhausted".to_string())),
        }
    }
}
