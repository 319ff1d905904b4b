//! Watch-stream plumbing: cursor and resume logic, the event-source seam,
//! and the outer driver loop.

pub mod cursor;
pub mod driver;
pub mod source;

pub use cursor::{parse_expiry_notice, Cursor};
pub use driver::{Driver, DriverExit, EventHandler};
pub use source::{EventSource, EventStream, SourceError};
