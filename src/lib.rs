//! tlsterm - TLS terminating message server
//!
//! Accepts TCP connections, authenticates itself with an X.509 identity,
//! greets each client and then reads framed text messages until the client
//! sends the exit command, closes the connection, or goes quiet for too long.
//!
//! By default a message ends at a newline, so a client must send `exit\n`;
//! a bare `exit` sits in the buffer until the read timeout. Select
//! [`Framing::ReadBoundary`] to treat every read as one message instead.
//!
//! The pieces, bottom up:
//!
//! - [`tls`]: certificate loading, handshake policy and the encrypted session
//! - [`framer`]: turns a byte stream into complete text messages
//! - [`session`]: the per-connection state machine
//! - [`server`]: listener and accept loop
//! - [`config`]: TOML configuration

pub mod config;
pub mod error;
pub mod framer;
pub mod logging;
pub mod ops;
pub mod server;
pub mod session;
pub mod tls;

pub use config::{ConfigError, ServerConfig};
pub use error::{Error, Result};
pub use framer::{Framing, Message, MessageFramer};
pub use ops::SessionOps;
pub use server::{AcceptMode, Server, ShutdownHandle};
pub use session::{SessionOutcome, SessionReport, SessionSettings, SessionState};
