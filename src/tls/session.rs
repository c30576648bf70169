//! TLS session operations
//!
//! `TlsSession` wraps an OpenSSL `SslStream` over any raw byte stream backed
//! by a socket and implements `SessionOps` with timed reads and writes.

use super::config::{TlsConfig, TlsError};
use super::handshake;
use super::params::SessionParameters;
use crate::ops::{poll_fd, PollEvents, SessionOps};
use crate::{Error, Result};
use openssl::ssl::{Ssl, SslStream};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;

/// Default read timeout applied after the handshake
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default write timeout applied after the handshake
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5000);

/// A raw bidirectional byte stream backed by a socket
pub trait RawStream: Read + Write + AsFd {}

impl<T: Read + Write + AsFd> RawStream for T {}

/// TLS session
///
/// Closing is idempotent and also happens on drop, so the stream is released
/// on every exit path.
pub struct TlsSession<S: RawStream> {
    stream: SslStream<S>,
    params: SessionParameters,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    failed: bool,
    closed: bool,
}

impl<S: RawStream> TlsSession<S> {
    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(stream: S, config: &TlsConfig) -> std::result::Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;
        let ssl_stream = handshake::accept(ssl, stream, config.handshake_timeout)?;
        let params = SessionParameters::from_ssl(ssl_stream.ssl(), true, config.check_revocation);
        Self::established(ssl_stream, params)
    }

    /// Create a client TLS connection (perform handshake)
    pub fn connect(stream: S, config: &TlsConfig) -> std::result::Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        // Set SNI servername if configured
        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername)?;
        }

        let ssl_stream = handshake::connect(ssl, stream, config.handshake_timeout)?;
        let params = SessionParameters::from_ssl(ssl_stream.ssl(), false, false);
        Self::established(ssl_stream, params)
    }

    fn established(
        stream: SslStream<S>,
        params: SessionParameters,
    ) -> std::result::Result<Self, TlsError> {
        let mut session = TlsSession {
            stream,
            params,
            read_timeout: None,
            write_timeout: None,
            failed: false,
            closed: false,
        };
        session.set_timeouts(Some(DEFAULT_READ_TIMEOUT), Some(DEFAULT_WRITE_TIMEOUT))?;
        Ok(session)
    }

    /// Set read/write timeouts; `None` blocks forever
    pub fn set_timeouts(
        &mut self,
        read: Option<Duration>,
        write: Option<Duration>,
    ) -> std::result::Result<(), TlsError> {
        handshake::set_socket_timeouts(self.stream.get_ref(), read, write)?;
        self.read_timeout = read;
        self.write_timeout = write;
        self.params.read_timeout = read;
        self.params.write_timeout = write;
        Ok(())
    }

    /// Negotiated parameters snapshot
    pub fn parameters(&self) -> &SessionParameters {
        &self.params
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Get reference to underlying stream
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Wait for readiness, honouring data OpenSSL already buffered
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        if events == PollEvents::Read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        let fd = self.stream.get_ref().as_fd().as_raw_fd();
        poll_fd(fd, events, timeout).map_err(Error::Io)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.failed = true;
        err
    }
}

impl<S: RawStream> SessionOps for TlsSession<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if !self.poll(PollEvents::Read, self.read_timeout)? {
            return Err(self.fail(Error::Timeout));
        }

        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(Error::from_io(e))),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if !self.poll(PollEvents::Write, self.write_timeout)? {
            return Err(self.fail(Error::Timeout));
        }

        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(Error::from_io(e))),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Send close_notify only while the record layer is healthy
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        match SockRef::from(self.stream.get_ref()).shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl<S: RawStream> Drop for TlsSession<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
