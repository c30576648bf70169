//! TCP listener and accept loop
//!
//! Each accepted stream runs through `run_session` inside its own failure
//! boundary, so a misbehaving session never stops the listener.

use crate::session::{run_session, SessionReport, SessionSettings};
use crate::tls::TlsConfig;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 12345;

const LISTEN_BACKLOG: i32 = 128;

/// Pause before retrying after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Longer pause while the process is out of file descriptors
const ACCEPT_EXHAUSTED_DELAY: Duration = Duration::from_millis(500);

fn accept_backoff(err: &io::Error) -> Duration {
    match err.raw_os_error() {
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM) => {
            ACCEPT_EXHAUSTED_DELAY
        }
        _ => ACCEPT_RETRY_DELAY,
    }
}

/// How accepted connections are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcceptMode {
    /// Finish one session before accepting the next
    Sequential,
    /// One thread per session
    #[default]
    ThreadPerConnection,
}

/// Shared, read-only state handed to every session
struct ServerContext {
    tls: TlsConfig,
    settings: SessionSettings,
    next_id: AtomicU64,
    reports: Option<Sender<SessionReport>>,
}

/// Stops a running server from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    /// Ask the accept loop to return. In-flight sessions run to completion.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the blocking accept
        let _ = TcpStream::connect_timeout(&self.addr, Duration::from_secs(1));
    }
}

/// TLS terminating server
pub struct Server {
    listener: TcpListener,
    mode: AcceptMode,
    ctx: Arc<ServerContext>,
    stop: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listening socket
    pub fn bind(
        addr: SocketAddr,
        mode: AcceptMode,
        tls: TlsConfig,
        settings: SessionSettings,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        let listener: TcpListener = socket.into();

        tracing::info!(address = %listener.local_addr()?, ?mode, "listener bound");

        Ok(Server {
            listener,
            mode,
            ctx: Arc::new(ServerContext {
                tls,
                settings,
                next_id: AtomicU64::new(1),
                reports: None,
            }),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Publish a `SessionReport` for every finished session
    pub fn with_reports(mut self, reports: Sender<SessionReport>) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.reports = Some(reports);
        }
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        let mut addr = self.listener.local_addr()?;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        Ok(ShutdownHandle { stop: Arc::clone(&self.stop), addr })
    }

    /// Accept connections until shut down
    pub fn run(&self) -> io::Result<()> {
        loop {
            tracing::debug!("waiting for a client to connect");
            let accepted = self.listener.accept();

            if self.stop.load(Ordering::SeqCst) {
                if let Ok((stream, _)) = accepted {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                tracing::info!("listener stopped");
                return Ok(());
            }

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    let delay = accept_backoff(&e);
                    tracing::warn!(error = %e, retry_ms = delay.as_millis() as u64, "accept failed");
                    thread::sleep(delay);
                    continue;
                }
            };

            let id = self.ctx.next_id.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(id, peer = %peer, "connection accepted");

            match self.mode {
                AcceptMode::Sequential => {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        handle_connection(&self.ctx, id, peer, stream)
                    }));
                    if result.is_err() {
                        tracing::error!(id, "session panicked");
                    }
                }
                AcceptMode::ThreadPerConnection => {
                    let ctx = Arc::clone(&self.ctx);
                    let spawned = thread::Builder::new()
                        .name(format!("session-{}", id))
                        .spawn(move || handle_connection(&ctx, id, peer, stream));
                    if let Err(e) = spawned {
                        tracing::error!(id, error = %e, "failed to spawn session thread");
                    }
                }
            }
        }
    }
}

fn handle_connection(ctx: &ServerContext, id: u64, peer: SocketAddr, stream: TcpStream) {
    let span = tracing::info_span!("session", id, peer = %peer);
    let _guard = span.enter();

    let report = run_session(id, &peer.to_string(), stream, &ctx.tls, &ctx.settings);
    if let Some(reports) = &ctx.reports {
        let _ = reports.send(report);
    }
}
