//! TLS handshake driver
//!
//! The handshake runs on a blocking socket bounded by socket-level timeouts.
//! OpenSSL errors are folded into `TlsError::HandshakeFailed` with a readable
//! reason and the library's own message as the nested cause.

use super::config::TlsError;
use openssl::ssl::{ErrorCode, HandshakeError, MidHandshakeSslStream, Ssl, SslStream};
use socket2::SockRef;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::fd::AsFd;
use std::time::Duration;

/// Apply read and write timeouts to the socket behind `stream`
pub(crate) fn set_socket_timeouts<S: AsFd>(
    stream: &S,
    read: Option<Duration>,
    write: Option<Duration>,
) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_read_timeout(read)?;
    sock.set_write_timeout(write)
}

/// Run the server side of the handshake
pub(crate) fn accept<S: Read + Write + AsFd>(
    ssl: Ssl,
    stream: S,
    timeout: Option<Duration>,
) -> Result<SslStream<S>, TlsError> {
    set_socket_timeouts(&stream, timeout, timeout)?;
    ssl.accept(stream).map_err(|e| map_handshake_error(e, timeout))
}

/// Run the client side of the handshake
pub(crate) fn connect<S: Read + Write + AsFd>(
    ssl: Ssl,
    stream: S,
    timeout: Option<Duration>,
) -> Result<SslStream<S>, TlsError> {
    set_socket_timeouts(&stream, timeout, timeout)?;
    ssl.connect(stream).map_err(|e| map_handshake_error(e, timeout))
}

fn map_handshake_error<S: Read + Write + AsFd>(
    err: HandshakeError<S>,
    timeout: Option<Duration>,
) -> TlsError {
    match err {
        HandshakeError::SetupFailure(stack) => TlsError::OpenSsl(stack),
        HandshakeError::Failure(mid) => {
            let err = describe(&mid);
            abandon(mid);
            err
        }
        // A blocking socket only reports WANT_READ/WANT_WRITE when its timeout fires
        HandshakeError::WouldBlock(mid) => {
            abandon(mid);
            TlsError::HandshakeTimeout(timeout.unwrap_or_default())
        }
    }
}

fn describe<S>(mid: &MidHandshakeSslStream<S>) -> TlsError {
    let error = mid.error();

    let code = error.code();
    let reason = if code == ErrorCode::SSL {
        "TLS protocol error"
    } else if code == ErrorCode::ZERO_RETURN {
        "peer closed the connection during the handshake"
    } else if code == ErrorCode::SYSCALL && error.io_error().is_none() {
        "peer aborted the handshake"
    } else if code == ErrorCode::SYSCALL {
        "I/O error during the handshake"
    } else {
        "handshake could not complete"
    };

    let cause = error
        .ssl_error()
        .map(|stack| stack.to_string())
        .or_else(|| error.io_error().map(|io| io.to_string()));

    TlsError::HandshakeFailed {
        reason: reason.to_string(),
        cause,
    }
}

/// Shut the raw stream down before it is dropped
fn abandon<S: AsFd>(mid: MidHandshakeSslStream<S>) {
    let _ = SockRef::from(mid.get_ref()).shutdown(Shutdown::Both);
}
