//! Error types for the session engine.
//!
//! [`SessionError`] is what callers of the public session API see.
//! [`ProtocolError`] is returned by command handlers; the dispatcher logs it
//! and keeps serving the connection.

use thiserror::Error;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be opened, written or read.
    #[error("connection error: {0}")]
    Connection(String),
    /// `connect` was called on a session that already has a live transport.
    #[error("session {0} is already connected")]
    AlreadyConnected(String),
    /// An operation needed a live transport but there is none.
    #[error("session {0} is not connected")]
    NotConnected(String),
    /// The server sent something the engine could not make sense of.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// No token could be obtained, or the server rejected it.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The server did not acknowledge the login in time.
    #[error("login not acknowledged within {0:?}")]
    Timeout(std::time::Duration),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

/// A malformed or unexpected inbound command.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer arguments than the action requires.
    #[error("{action}: expected at least {expected} arguments, got {got}")]
    MissingArguments {
        /// Action name.
        action: &'static str,
        /// Minimum argument count.
        expected: usize,
        /// Argument count received.
        got: usize,
    },
    /// An argument could not be parsed.
    #[error("{action}: invalid argument {value:?}")]
    InvalidArgument {
        /// Action name.
        action: &'static str,
        /// Offending value.
        value: String,
    },
}

impl ProtocolError {
    /// Check that `args` holds at least `expected` entries.
    pub fn require(action: &'static str, args: &[&str], expected: usize) -> Result<(), Self> {
        if args.len() < expected {
            return Err(Self::MissingArguments {
                action,
                expected,
                got: args.len(),
            });
        }
        Ok(())
    }

    /// Build an [`ProtocolError::InvalidArgument`].
    pub fn invalid(action: &'static str, value: &str) -> Self {
        Self::InvalidArgument {
            action,
            value: value.to_string(),
        }
    }
}
