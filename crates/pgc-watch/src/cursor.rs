//! Stream position tracking and expiry-notice parsing.

use std::fmt;

/// Opaque resumption token marking position in the change stream.
///
/// Starts empty, meaning "from current state, no history". Owned exclusively
/// by the driver and mutated only between event-processing steps. Lives in
/// memory only — a process restart resyncs from current state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn start() -> Self {
        Cursor(String::new())
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Advance to the resource version of a successfully-shaped event.
    pub fn advance(&mut self, resource_version: &str) {
        self.0 = resource_version.to_string();
    }

    /// Jump to a replacement token extracted from an expiry notice.
    pub fn set(&mut self, value: String) {
        self.0 = value;
    }

    /// Back to "from current state" — a full resync.
    pub fn reset(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<start>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Extract the resumable cursor from a "too old resource version" notice.
///
/// The diagnostic has the shape `"too old resource version: seen <N> (<M>)"`;
/// the trailing parenthesized integer is the version the source can resume
/// from. Returns `None` when the text does not carry one — the caller must
/// then reset the cursor and resync from current state.
pub fn parse_expiry_notice(notice: &str) -> Option<u64> {
    let trimmed = notice.trim();
    let open = trimmed.rfind('(')?;
    let rest = &trimmed[open + 1..];
    let close = rest.find(')')?;
    rest[..close].trim().parse().ok()
}
