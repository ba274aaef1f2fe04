//! Error handling for jukebox.
//!
//! Every fallible operation returns [`Result`], carrying an [`Error`] that
//! pairs a closed [`ErrorKind`] with the underlying details. Command layers
//! match on the kind to decide what to tell the user; the details are meant
//! for logs.
//!
//! # Error Categories
//!
//! * Playback control: [`InvalidState`](ErrorKind::InvalidState),
//!   [`NotFound`](ErrorKind::NotFound), [`OutOfRange`](ErrorKind::OutOfRange)
//! * Collaborators: [`ResolutionFailure`](ErrorKind::ResolutionFailure),
//!   [`SinkFailure`](ErrorKind::SinkFailure), [`Unavailable`](ErrorKind::Unavailable)
//! * Plumbing: timeouts, cancellation, configuration and internal errors
//!
//! # Example
//!
//! ```rust
//! use jukebox::error::{Error, ErrorKind, Result};
//!
//! fn pick(position: usize, len: usize) -> Result<usize> {
//!     if position == 0 || position > len {
//!         return Err(Error::out_of_range(format!("{position} is not a valid position")));
//!     }
//!     Ok(position - 1)
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for jukebox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
///
/// The set is closed: callers are expected to match exhaustively and map
/// each kind onto a one-line response.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// A removal or lookup target is absent.
    #[error("not found")]
    NotFound,

    /// A position lies outside of the queue.
    #[error("out of range")]
    OutOfRange,

    /// The playback state machine does not allow the operation right now,
    /// e.g. pausing while nothing plays or going back without history.
    #[error("invalid state")]
    InvalidState,

    /// Media metadata or stream information could not be resolved.
    #[error("resolution failed")]
    ResolutionFailure,

    /// The audio sink errored while starting or streaming.
    #[error("sink failure")]
    SinkFailure,

    /// Input could not be used, such as a malformed configuration file.
    #[error("invalid argument specified")]
    InvalidArgument,

    /// A collaborator call took longer than allowed.
    #[error("operation timed out")]
    DeadlineExceeded,

    /// The operation was cancelled, usually because its session ended.
    #[error("operation was cancelled")]
    Cancelled,

    /// A collaborator is not available, such as a sink that cannot connect.
    #[error("service unavailable")]
    Unavailable,

    /// Broken internal invariant or crashed task.
    #[error("internal error")]
    Internal,

    /// Anything else.
    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "no such entry");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Creates an error for absent removal or lookup targets.
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    /// Creates an error for positions outside of the queue.
    pub fn out_of_range<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::OutOfRange, error)
    }

    /// Creates an error for operations the playback state does not allow.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::invalid_state("nothing is playing");
    /// assert_eq!(err.kind, ErrorKind::InvalidState);
    /// ```
    pub fn invalid_state<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidState, error)
    }

    /// Creates an error for media that could not be resolved.
    pub fn resolution_failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ResolutionFailure, error)
    }

    /// Creates an error for audio sink failures.
    pub fn sink_failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::SinkFailure, error)
    }

    /// Creates an error for unusable input.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for calls that exceeded their deadline.
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for cancelled operations.
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an error for unavailable collaborators.
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    /// Creates an error for broken internal invariants.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Creates an error that does not fit any other category.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            AddrNotAvailable | ConnectionRefused | NotConnected | BrokenPipe
            | ConnectionReset | ConnectionAborted => Self::unavailable(err),
            Interrupted => Self::cancelled(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts configuration parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(err)
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::invalid_argument(err)
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

/// Converts task join errors.
///
/// * Cancelled tasks -> `Cancelled`
/// * Panicked tasks -> `Internal`
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}

/// Converts semaphore errors to `Cancelled`: the worker pool only closes on
/// shutdown.
impl From<tokio::sync::AcquireError> for Error {
    fn from(e: tokio::sync::AcquireError) -> Self {
        Self::cancelled(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_kind_and_details() {
        let err = Error::invalid_state("nothing is playing");
        assert_eq!(err.to_string(), "invalid state: nothing is playing");
    }

    #[test]
    fn io_errors_map_to_kinds() {
        let err = Error::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "jukebox.toml",
        ));
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.downcast::<std::io::Error>().is_some());

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
    }
}
