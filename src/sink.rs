//! Interface to the audio transport.
//!
//! A [`Sink`] is owned by exactly one playback driver, which is the only
//! caller of its control methods. All methods are non-blocking commands;
//! the end of a stream is reported through the [`Done`] receiver returned by
//! [`Sink::start`].

use std::ops::{Deref, DerefMut};

use tokio::sync::oneshot;

use crate::{entry::StreamHandle, error::Result, registry::SessionId};

/// Completion of a started stream: `Ok(())` when it ended naturally, an
/// error when the transport failed mid-stream. A dropped sender counts as a
/// failure.
pub type Done = oneshot::Receiver<Result<()>>;

pub trait Sink: Send + 'static {
    /// Starts streaming, replacing anything that was playing.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream cannot be started.
    fn start(&mut self, stream: &StreamHandle) -> Result<Done>;

    /// Suspends the current stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the command.
    fn pause(&mut self) -> Result<()>;

    /// Continues a suspended stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the command.
    fn resume(&mut self) -> Result<()>;

    /// Halts the current stream immediately. Its [`Done`] may or may not
    /// fire afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the command.
    fn stop(&mut self) -> Result<()>;

    /// Leaves the channel and releases the transport. Called exactly once.
    fn disconnect(&mut self);
}

/// Opens sinks for sessions, e.g. by joining the requester's voice channel.
pub trait Connector: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an error when no sink can be opened for `session`.
    fn connect(&self, session: SessionId) -> Result<Box<dyn Sink>>;
}

/// Owns a connected sink and disconnects it when dropped, whichever way the
/// owning task ends.
pub(crate) struct SinkGuard {
    sink: Box<dyn Sink>,
}

impl SinkGuard {
    pub(crate) fn new(sink: Box<dyn Sink>) -> Self {
        Self { sink }
    }
}

impl Deref for SinkGuard {
    type Target = dyn Sink;

    fn deref(&self) -> &Self::Target {
        self.sink.as_ref()
    }
}

impl DerefMut for SinkGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.sink.as_mut()
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        debug!("disconnecting sink");
        self.sink.disconnect();
    }
}
