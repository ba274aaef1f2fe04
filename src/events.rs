//! Events emitted by a session's playback driver.
//!
//! Subscribe with [`Session::subscribe`](crate::session::Session::subscribe)
//! to announce what is playing, or to wait for the driver to act on a
//! command.
//!
//! # Example
//!
//! ```rust
//! use jukebox::events::Event;
//!
//! fn announce(event: &Event) -> Option<String> {
//!     match event {
//!         Event::TrackChanged(entry) => Some(format!("Now playing {entry}")),
//!         Event::Idle => Some("Queue finished".to_owned()),
//!         _ => None,
//!     }
//! }
//! ```

use crate::entry::Entry;

/// Significant changes of the playback state.
///
/// Control commands change the session state synchronously; these events
/// report when the driver has carried them out on the sink.
#[derive(Clone, Debug)]
pub enum Event {
    /// A new entry was handed to the sink.
    TrackChanged(Entry),

    /// The sink was suspended.
    Paused,

    /// The sink continued after a pause.
    Resumed,

    /// An entry ended by itself, normally or through a sink failure, and
    /// went to the history.
    Finished(Entry),

    /// The current entry was cut off by a stop or a skip.
    Halted,

    /// The queue ran dry and the driver is waiting for more.
    Idle,

    /// The sink failed to start or play an entry.
    SinkFailed(String),

    /// The driver ended and released its sink.
    Disconnected,
}
