//! TLS support for the server
//!
//! This module wraps OpenSSL for the server side of a connection and, for
//! probing and tests, the client side.
//!
//! # Architecture
//!
//! 1. `TlsIdentity` holds the certificate chain and private key, loaded once
//! 2. `TlsConfig` bakes the identity and handshake policy into an immutable
//!    `SslContext` that every session shares
//! 3. `TlsSession` runs the handshake over a raw stream and implements
//!    `SessionOps` with timed, encrypted I/O
//! 4. `SessionParameters` is the negotiated-parameter snapshot for diagnostics
//!
//! # Examples
//!
//! ```no_run
//! use tlsterm::tls::{ClientVerify, TlsConfig, TlsIdentity, TlsVersion};
//! use std::net::TcpListener;
//!
//! let identity = TlsIdentity::from_pkcs12_file("server.p12", "secret").unwrap();
//! let tls_config = TlsConfig::server()
//!     .unwrap()
//!     .identity(&identity)
//!     .unwrap()
//!     .min_version(Some(TlsVersion::Tls12))
//!     .unwrap()
//!     .client_verify(ClientVerify::None)
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("0.0.0.0:12345").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let session = tls_config.accept(tcp_stream).unwrap();
//! println!("negotiated {}", session.parameters().protocol);
//! ```

pub mod builtin_cert;
pub mod cert;
pub mod config;
pub mod handshake;
pub mod identity;
pub mod params;
pub mod session;

pub use cert::CertInfo;
pub use config::{
    ClientConfigBuilder, ClientVerify, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion,
};
pub use identity::TlsIdentity;
pub use params::SessionParameters;
pub use session::{RawStream, TlsSession};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
