//! Session orchestration
//!
//! Drives one accepted connection through its lifecycle:
//!
//! ```text
//! Accepted -> Handshaking -> Authenticated -> Serving -> Closed
//!                    \
//!                     -> HandshakeFailed -> Closed
//! ```
//!
//! Every connection gets its own run of this state machine. Nothing but the
//! immutable `TlsConfig` and `SessionSettings` is shared between runs.

use crate::framer::{Framing, MessageFramer, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_MESSAGE_LEN};
use crate::ops::SessionOps;
use crate::tls::session::{DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use crate::tls::{RawStream, SessionParameters, TlsConfig, TlsError};
use crate::{Error, Result};
use std::time::Duration;

/// Greeting written right after the handshake
pub const DEFAULT_GREETING: &str = "Hello from the server.";

/// Command that ends a session
pub const DEFAULT_SENTINEL: &str = "EXIT";

/// Per-session behaviour, shared read-only by all sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub greeting: String,
    pub sentinel: String,
    pub framing: Framing,
    pub buffer_size: usize,
    pub max_message_len: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            greeting: DEFAULT_GREETING.to_string(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            framing: Framing::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Handshaking,
    HandshakeFailed,
    Authenticated,
    Serving,
    Closed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Accepted, Handshaking)
                | (Handshaking, Authenticated)
                | (Handshaking, HandshakeFailed)
                | (HandshakeFailed, Closed)
                | (Authenticated, Serving)
                | (Authenticated, Closed)
                | (Serving, Closed)
        )
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client sent the sentinel command
    ExitCommand,
    /// The client closed the stream
    PeerClosed,
    /// The client reset the connection
    ConnectionReset,
    TimedOut,
    HandshakeFailed,
    DecodeFailed,
    Failed,
}

impl SessionOutcome {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::Tls(_) => SessionOutcome::HandshakeFailed,
            Error::Timeout => SessionOutcome::TimedOut,
            Error::ConnectionReset => SessionOutcome::ConnectionReset,
            Error::Decode(_) => SessionOutcome::DecodeFailed,
            _ => SessionOutcome::Failed,
        }
    }

    /// Normal ends, as opposed to failures worth a warning
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            SessionOutcome::ExitCommand | SessionOutcome::PeerClosed | SessionOutcome::ConnectionReset
        )
    }
}

/// Summary of one finished session
#[derive(Debug)]
pub struct SessionReport {
    pub id: u64,
    pub peer: String,
    pub outcome: SessionOutcome,
    /// Every state visited, in order
    pub states: Vec<SessionState>,
    pub messages: Vec<String>,
    pub parameters: Option<SessionParameters>,
    pub error: Option<Error>,
}

/// Tracks the state walk of a single session
#[derive(Debug)]
struct Lifecycle {
    states: Vec<SessionState>,
}

impl Lifecycle {
    fn new() -> Self {
        Lifecycle { states: vec![SessionState::Accepted] }
    }

    fn current(&self) -> SessionState {
        self.states.last().copied().unwrap_or(SessionState::Accepted)
    }

    fn enter(&mut self, next: SessionState) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "invalid session transition {:?} -> {:?}",
            current,
            next
        );
        tracing::debug!(from = ?current, to = ?next, "session state");
        self.states.push(next);
    }
}

/// Why the serving loop stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeEnd {
    ExitCommand,
    PeerClosed,
}

/// Send the greeting, then read messages until the sentinel or end of stream.
///
/// Received messages are appended to `messages` as they arrive.
pub fn serve<O: SessionOps>(
    session: &mut O,
    settings: &SessionSettings,
    messages: &mut Vec<String>,
) -> Result<ServeEnd> {
    tracing::debug!("sending greeting");
    session.write_all(settings.greeting.as_bytes())?;

    let mut framer = MessageFramer::new(
        settings.framing.clone(),
        settings.buffer_size,
        settings.max_message_len,
    );

    tracing::debug!("waiting for client messages");
    loop {
        let message = match framer.next_message(session)? {
            Some(message) => message,
            None => return Ok(ServeEnd::PeerClosed),
        };

        tracing::info!(message = %message.text(), "received");
        let is_exit = message.is_command(&settings.sentinel);
        messages.push(message.into_text());

        if is_exit {
            return Ok(ServeEnd::ExitCommand);
        }
    }
}

/// Socket errors after the handshake are I/O failures, not handshake failures
fn socket_setup_error(err: TlsError) -> Error {
    match err {
        TlsError::Io(e) => Error::from_io(e),
        other => Error::Tls(other),
    }
}

/// Drive one connection from accept to close
pub fn run_session<S: RawStream>(
    id: u64,
    peer: &str,
    stream: S,
    tls: &TlsConfig,
    settings: &SessionSettings,
) -> SessionReport {
    let mut lifecycle = Lifecycle::new();
    let mut messages = Vec::new();

    lifecycle.enter(SessionState::Handshaking);
    let mut session = match tls.accept(stream) {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(
                error = %err,
                cause = err.cause().unwrap_or("none"),
                "authentication failed, closing the connection"
            );
            lifecycle.enter(SessionState::HandshakeFailed);
            lifecycle.enter(SessionState::Closed);
            return SessionReport {
                id,
                peer: peer.to_string(),
                outcome: SessionOutcome::HandshakeFailed,
                states: lifecycle.states,
                messages,
                parameters: None,
                error: Some(Error::Tls(err)),
            };
        }
    };

    lifecycle.enter(SessionState::Authenticated);
    let result = match session.set_timeouts(settings.read_timeout, settings.write_timeout) {
        Ok(()) => {
            session.parameters().log();
            lifecycle.enter(SessionState::Serving);
            serve(&mut session, settings, &mut messages)
        }
        Err(err) => Err(socket_setup_error(err)),
    };
    let parameters = Some(session.parameters().clone());

    let (outcome, error) = match result {
        Ok(ServeEnd::ExitCommand) => (SessionOutcome::ExitCommand, None),
        Ok(ServeEnd::PeerClosed) => (SessionOutcome::PeerClosed, None),
        Err(err) => (SessionOutcome::from_error(&err), Some(err)),
    };

    if let Err(err) = session.close() {
        tracing::debug!(error = %err, "error while closing session");
    }
    lifecycle.enter(SessionState::Closed);

    match (&error, outcome.is_clean()) {
        (None, _) => tracing::info!(?outcome, messages = messages.len(), "session closed"),
        (Some(err), true) => tracing::info!(?outcome, error = %err, "session closed"),
        (Some(err), false) => tracing::warn!(?outcome, error = %err, "session failed"),
    }

    SessionReport {
        id,
        peer: peer.to_string(),
        outcome,
        states: lifecycle.states,
        messages,
        parameters,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::ScriptedSession;
    use crate::tls::TlsConfig;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;

    #[test]
    fn test_greeting_precedes_reads() {
        let mut session = ScriptedSession::new().chunk(b"exit\n");
        let mut messages = Vec::new();
        let end = serve(&mut session, &SessionSettings::default(), &mut messages).unwrap();

        assert_eq!(end, ServeEnd::ExitCommand);
        assert_eq!(session.written, b"Hello from the server.");
        assert_eq!(messages, vec!["exit"]);
    }

    #[test]
    fn test_no_reads_after_sentinel() {
        let mut session = ScriptedSession::new().chunk(b"ping\nEXIT\nnever read\n");
        let settings = SessionSettings { buffer_size: 1, ..SessionSettings::default() };
        let mut messages = Vec::new();
        let end = serve(&mut session, &settings, &mut messages).unwrap();

        assert_eq!(end, ServeEnd::ExitCommand);
        assert_eq!(messages, vec!["ping", "EXIT"]);
        // One byte per read: "ping\nEXIT\n" is exactly ten reads
        assert_eq!(session.read_calls, 10);
    }

    #[test]
    fn test_non_sentinel_keeps_serving() {
        let mut session = ScriptedSession::new().chunk(b"exits\nexit now\n");
        let mut messages = Vec::new();
        let end = serve(&mut session, &SessionSettings::default(), &mut messages).unwrap();

        assert_eq!(end, ServeEnd::PeerClosed);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_custom_sentinel() {
        let mut session = ScriptedSession::new().chunk(b"exit\nquit\n");
        let settings = SessionSettings { sentinel: "QUIT".to_string(), ..SessionSettings::default() };
        let mut messages = Vec::new();
        assert_eq!(serve(&mut session, &settings, &mut messages).unwrap(), ServeEnd::ExitCommand);
        assert_eq!(messages, vec!["exit", "quit"]);
    }

    #[test]
    fn test_post_handshake_socket_errors_are_io_failures() {
        let reset = TlsError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        let err = socket_setup_error(reset);
        assert!(matches!(err, Error::ConnectionReset));
        assert_eq!(SessionOutcome::from_error(&err), SessionOutcome::ConnectionReset);

        let other = TlsError::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput));
        assert_eq!(SessionOutcome::from_error(&socket_setup_error(other)), SessionOutcome::Failed);

        let config = TlsError::InvalidConfig("bad".to_string());
        assert!(matches!(socket_setup_error(config), Error::Tls(_)));
    }

    #[test]
    fn test_bare_exit_needs_read_boundary_framing() {
        // Line framing keeps waiting for the newline
        let mut session = ScriptedSession::new().chunk(b"exit").fail(Error::Timeout);
        let mut messages = Vec::new();
        let err = serve(&mut session, &SessionSettings::default(), &mut messages).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(messages.is_empty());

        let mut session = ScriptedSession::new().chunk(b"exit").fail(Error::Timeout);
        let settings = SessionSettings { framing: Framing::ReadBoundary, ..SessionSettings::default() };
        let mut messages = Vec::new();
        assert_eq!(serve(&mut session, &settings, &mut messages).unwrap(), ServeEnd::ExitCommand);
        assert_eq!(messages, vec!["exit"]);
        assert_eq!(session.read_calls, 1);
    }

    #[test]
    fn test_serve_propagates_timeout() {
        let mut session = ScriptedSession::new().chunk(b"ping\n").fail(Error::Timeout);
        let mut messages = Vec::new();
        let err = serve(&mut session, &SessionSettings::default(), &mut messages).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(SessionOutcome::from_error(&err), SessionOutcome::TimedOut);
        assert_eq!(messages, vec!["ping"]);
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Accepted.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(HandshakeFailed));
        assert!(Serving.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Serving));
        assert!(!HandshakeFailed.can_transition_to(Authenticated));
    }

    #[test]
    fn test_run_session_handshake_failure() {
        let (server, mut client) = UnixStream::pair().unwrap();
        let tls = TlsConfig::server().unwrap().build().unwrap();

        let peer = thread::spawn(move || {
            let _ = client.write_all(b"this is not TLS\r\n\r\n");
            let mut buf = [0u8; 64];
            let _ = client.read(&mut buf);
        });

        let report = run_session(1, "unix", server, &tls, &SessionSettings::default());
        peer.join().unwrap();

        assert_eq!(report.outcome, SessionOutcome::HandshakeFailed);
        assert_eq!(
            report.states,
            vec![
                SessionState::Accepted,
                SessionState::Handshaking,
                SessionState::HandshakeFailed,
                SessionState::Closed
            ]
        );
        assert!(report.parameters.is_none());
        assert!(matches!(report.error, Some(Error::Tls(_))));
    }

    #[test]
    fn test_run_session_exit() {
        let (server, client) = UnixStream::pair().unwrap();
        let tls = TlsConfig::server().unwrap().build().unwrap();

        let peer = thread::spawn(move || {
            let client_tls = TlsConfig::client().unwrap().build().unwrap();
            let mut session = client_tls.connect(client).unwrap();

            let mut greeting = vec![0u8; DEFAULT_GREETING.len()];
            let mut got = 0;
            while got < greeting.len() {
                got += session.read(&mut greeting[got..]).unwrap();
            }
            assert_eq!(greeting, DEFAULT_GREETING.as_bytes());

            session.write_all(b"ping\nExit\n").unwrap();
            let mut buf = [0u8; 16];
            // Server closes after the sentinel
            let _ = session.read(&mut buf);
        });

        let report = run_session(7, "unix", server, &tls, &SessionSettings::default());
        peer.join().unwrap();

        assert_eq!(report.id, 7);
        assert_eq!(report.outcome, SessionOutcome::ExitCommand);
        assert_eq!(report.messages, vec!["ping", "Exit"]);
        assert_eq!(report.states.last(), Some(&SessionState::Closed));
        assert!(report.states.contains(&SessionState::Serving));

        let params = report.parameters.unwrap();
        assert!(params.is_server);
        assert_eq!(params.read_timeout, Some(DEFAULT_READ_TIMEOUT));
    }
}
