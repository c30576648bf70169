//! Session level errors
//!
//! Every failure here is local to one session. The listener logs it and
//! keeps accepting.

use crate::tls::TlsError;
use std::io;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Session operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The TLS handshake (or TLS setup) failed
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// A read or write exceeded its configured timeout
    #[error("Timeout")]
    Timeout,

    /// The peer reset or aborted the connection mid-session
    #[error("Connection reset by peer")]
    ConnectionReset,

    /// Bytes received do not form valid UTF-8
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation attempted on a closed session
    #[error("Session closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl Error {
    /// Classify a raw I/O error from the record layer
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Error::ConnectionReset,
            _ => Error::Io(err),
        }
    }

    /// True for failures that amount to the peer going away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::ConnectionReset)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_io(err)
    }
}
