//! The event-source seam.
//!
//! The transport behind these traits produces a lazy, restartable sequence of
//! change notifications keyed by a monotonically increasing cursor. The
//! driver neither knows nor cares whether that is an HTTP watch, a message
//! queue, or a scripted test fixture.

use crate::Cursor;
use async_trait::async_trait;
use pgc_schemas::RawWatchEvent;
use std::fmt;

/// Errors a stream open or read may surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The watched resource type does not exist at the source — a deployment
    /// error, not retriable.
    NotRegistered(String),
    /// Authentication or authorization failed — not retriable.
    Unauthorized(String),
    /// Operator-visible interruption (connection dropped, transport error).
    /// The driver reopens with the held cursor.
    Interrupted(String),
    /// The transport delivered bytes that could not be decoded into an
    /// event frame. Terminates the iteration; resumable.
    Protocol(String),
}

impl SourceError {
    /// Terminal errors stop the process; everything else restarts the loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourceError::NotRegistered(_) | SourceError::Unauthorized(_)
        )
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NotRegistered(msg) => {
                write!(f, "WATCH_NOT_REGISTERED: resource type not registered: {msg}")
            }
            SourceError::Unauthorized(msg) => write!(f, "WATCH_UNAUTHORIZED: {msg}"),
            SourceError::Interrupted(msg) => write!(f, "watch interrupted: {msg}"),
            SourceError::Protocol(msg) => write!(f, "watch protocol error: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// One open watch iteration.
#[async_trait]
pub trait EventStream: Send {
    /// Next notification. `Ok(None)` is an orderly end of stream — the
    /// driver reopens with the held cursor.
    async fn next_event(&mut self) -> Result<Option<RawWatchEvent>, SourceError>;
}

/// A restartable change-notification source.
#[async_trait]
pub trait EventSource: Send {
    /// Open a stream positioned at `cursor`.
    async fn open(&mut self, cursor: &Cursor) -> Result<Box<dyn EventStream>, SourceError>;
}
