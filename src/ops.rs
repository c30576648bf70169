//! Session operations abstraction
//!
//! The framer and the orchestrator only talk to a session through
//! `SessionOps`, so they work the same over a TLS session or any other
//! transport that can read, write and close.

use crate::{Error, Result};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Session operations trait
pub trait SessionOps {
    /// Read data from the session. `Ok(0)` means the peer closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write the whole buffer
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(Error::ConnectionReset);
            }
            written += n;
        }
        Ok(())
    }
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Wait until `fd` is ready for `events`.
///
/// Returns `Ok(false)` when the timeout expires first. `None` waits forever.
pub fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1);

    loop {
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
        if result >= 0 {
            return Ok(result > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_poll_read_ready() {
        let (mut a, b) = UnixStream::pair().unwrap();
        a.write_all(b"x").unwrap();
        assert!(poll_fd(b.as_raw_fd(), PollEvents::Read, Some(Duration::from_secs(1))).unwrap());
    }

    #[test]
    fn test_poll_timeout() {
        let (_a, b) = UnixStream::pair().unwrap();
        let ready = poll_fd(b.as_raw_fd(), PollEvents::Read, Some(Duration::from_millis(50))).unwrap();
        assert!(!ready);
    }

    #[test]
    fn test_write_all_loops() {
        let mut session = testing::ScriptedSession::new();
        session.write_all(b"Hello from the server.").unwrap();
        assert_eq!(session.written, b"Hello from the server.");
    }
}
