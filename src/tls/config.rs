//! TLS configuration
//!
//! This module provides TLS configuration builders for both server and client.
//! A built `TlsConfig` is immutable and cheap to clone; every session shares it.

use super::identity::TlsIdentity;
use super::session::{RawStream, TlsSession};
use openssl::ssl::{SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::X509;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Map a negotiated OpenSSL version back
    pub fn from_openssl_version(version: openssl::ssl::SslVersion) -> Option<Self> {
        use openssl::ssl::SslVersion;
        if version == SslVersion::TLS1 {
            Some(TlsVersion::Tls10)
        } else if version == SslVersion::TLS1_1 {
            Some(TlsVersion::Tls11)
        } else if version == SslVersion::TLS1_2 {
            Some(TlsVersion::Tls12)
        } else if version == SslVersion::TLS1_3 {
            Some(TlsVersion::Tls13)
        } else {
            None
        }
    }

    /// Parse a protocol floor: `any` means no floor beyond the library default
    pub fn parse_floor(s: &str) -> Result<Option<Self>, TlsError> {
        if s.trim().eq_ignore_ascii_case("any") {
            Ok(None)
        } else {
            s.parse().map(Some)
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// Client certificate verification mode (server-side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientVerify {
    /// Don't request client certificates
    #[default]
    None,
    /// Request client certificate but don't require it
    Optional,
    /// Require client certificate
    Required,
}

impl FromStr for ClientVerify {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ClientVerify::None),
            "optional" => Ok(ClientVerify::Optional),
            "required" => Ok(ClientVerify::Required),
            _ => Err(TlsError::InvalidConfig(format!("unknown client_verify mode: {}", s))),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Authentication failure with an optional nested cause
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        reason: String,
        cause: Option<String>,
    },

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
}

impl TlsError {
    /// Nested cause of a handshake failure, if the TLS library reported one
    pub fn cause(&self) -> Option<&str> {
        match self {
            TlsError::HandshakeFailed { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: openssl::ssl::SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
    pub(crate) handshake_timeout: Option<Duration>,
    pub(crate) check_revocation: bool,
    pub(crate) client_verify: ClientVerify,
}

impl TlsConfig {
    /// Create a new server configuration builder
    pub fn server() -> Result<ServerConfigBuilder, TlsError> {
        ServerConfigBuilder::new()
    }

    /// Create a new client configuration builder
    pub fn client() -> Result<ClientConfigBuilder, TlsError> {
        ClientConfigBuilder::new()
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept<S: RawStream>(&self, stream: S) -> Result<TlsSession<S>, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        TlsSession::accept(stream, self)
    }

    /// Connect to a server with TLS (client-side)
    pub fn connect<S: RawStream>(&self, stream: S) -> Result<TlsSession<S>, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        TlsSession::connect(stream, self)
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    pub fn client_verify(&self) -> ClientVerify {
        self.client_verify
    }
}

fn set_version_range(
    ctx_builder: &mut SslContextBuilder,
    min: Option<TlsVersion>,
    max: Option<TlsVersion>,
) -> Result<(), TlsError> {
    ctx_builder.set_min_proto_version(min.map(|v| v.to_openssl_version()))?;
    ctx_builder.set_max_proto_version(max.map(|v| v.to_openssl_version()))?;
    Ok(())
}

/// Server configuration builder
pub struct ServerConfigBuilder {
    ctx_builder: SslContextBuilder,
    has_cert: bool,
    handshake_timeout: Option<Duration>,
    check_revocation: bool,
    client_verify: ClientVerify,
}

impl ServerConfigBuilder {
    fn new() -> Result<Self, TlsError> {
        let ctx_builder = SslContextBuilder::new(SslMethod::tls_server())?;

        Ok(ServerConfigBuilder {
            ctx_builder,
            has_cert: false,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            check_revocation: false,
            client_verify: ClientVerify::None,
        })
    }

    /// Install the server identity (certificate, chain and key)
    pub fn identity(mut self, identity: &TlsIdentity) -> Result<Self, TlsError> {
        identity.apply(&mut self.ctx_builder)?;
        self.has_cert = true;
        Ok(self)
    }

    /// Minimum protocol version; `None` accepts any version the library allows
    pub fn min_version(mut self, min: Option<TlsVersion>) -> Result<Self, TlsError> {
        self.ctx_builder.set_min_proto_version(min.map(|v| v.to_openssl_version()))?;
        Ok(self)
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Result<Self, TlsError> {
        set_version_range(&mut self.ctx_builder, Some(version), Some(version))?;
        Ok(self)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        set_version_range(&mut self.ctx_builder, Some(min), Some(max))?;
        Ok(self)
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Result<Self, TlsError> {
        self.ctx_builder.set_cipher_list(ciphers)?;
        Ok(self)
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: &str) -> Result<Self, TlsError> {
        self.ctx_builder.set_ciphersuites(ciphers)?;
        Ok(self)
    }

    /// Set client certificate verification mode
    pub fn client_verify(mut self, mode: ClientVerify) -> Self {
        let verify_mode = match mode {
            ClientVerify::None => SslVerifyMode::NONE,
            ClientVerify::Optional => SslVerifyMode::PEER,
            ClientVerify::Required => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        };

        self.ctx_builder.set_verify(verify_mode);
        self.client_verify = mode;
        self
    }

    /// Set CA file for client certificate verification
    pub fn client_verify_ca<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        self.ctx_builder.set_ca_file(path.as_ref())?;
        Ok(self)
    }

    /// Trust a single certificate when verifying clients
    pub fn trust_client_cert(mut self, cert: &X509) -> Result<Self, TlsError> {
        self.ctx_builder.cert_store_mut().add_cert(cert.clone())?;
        Ok(self)
    }

    /// Check certificate revocation lists when verifying the peer
    pub fn check_revocation(mut self, check: bool) -> Result<Self, TlsError> {
        if check {
            self.ctx_builder
                .verify_param_mut()
                .set_flags(X509VerifyFlags::CRL_CHECK | X509VerifyFlags::CRL_CHECK_ALL)?;
        }
        self.check_revocation = check;
        Ok(self)
    }

    /// Bound the handshake duration; `None` waits forever
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the TLS configuration
    pub fn build(mut self) -> Result<TlsConfig, TlsError> {
        // If no certificate was loaded, use the built-in certificate
        if !self.has_cert {
            tracing::warn!("no server identity configured, using the built-in development certificate");
            self = self.identity(&TlsIdentity::builtin()?)?;
        }

        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: true,
            servername: None,
            handshake_timeout: self.handshake_timeout,
            check_revocation: self.check_revocation,
            client_verify: self.client_verify,
        })
    }
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    ctx_builder: SslContextBuilder,
    servername: Option<String>,
    handshake_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    fn new() -> Result<Self, TlsError> {
        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())?;

        // Default: don't verify peer
        ctx_builder.set_verify(SslVerifyMode::NONE);

        Ok(ClientConfigBuilder {
            ctx_builder,
            servername: None,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        })
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Result<Self, TlsError> {
        set_version_range(&mut self.ctx_builder, Some(version), Some(version))?;
        Ok(self)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        set_version_range(&mut self.ctx_builder, Some(min), Some(max))?;
        Ok(self)
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Result<Self, TlsError> {
        self.ctx_builder.set_cipher_list(ciphers)?;
        Ok(self)
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        if verify {
            self.ctx_builder.set_verify(SslVerifyMode::PEER);
        } else {
            self.ctx_builder.set_verify(SslVerifyMode::NONE);
        }
        self
    }

    /// Trust a certificate as a root when verifying the server
    pub fn trust_cert(mut self, cert: &X509) -> Result<Self, TlsError> {
        self.ctx_builder.cert_store_mut().add_cert(cert.clone())?;
        Ok(self)
    }

    /// Present a client certificate
    pub fn identity(mut self, identity: &TlsIdentity) -> Result<Self, TlsError> {
        identity.apply(&mut self.ctx_builder)?;
        Ok(self)
    }

    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: false,
            servername: self.servername,
            handshake_timeout: self.handshake_timeout,
            check_revocation: false,
            client_verify: ClientVerify::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("tlsv1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("TLS1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert!("invalid".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn test_protocol_floor() {
        assert_eq!(TlsVersion::parse_floor("any").unwrap(), None);
        assert_eq!(TlsVersion::parse_floor("ANY").unwrap(), None);
        assert_eq!(TlsVersion::parse_floor("TLSv1.2").unwrap(), Some(TlsVersion::Tls12));
        assert!(TlsVersion::parse_floor("SSLv2").is_err());
        assert!(TlsVersion::Tls10 < TlsVersion::Tls13);
    }

    #[test]
    fn test_openssl_version_mapping() {
        for v in [TlsVersion::Tls10, TlsVersion::Tls11, TlsVersion::Tls12, TlsVersion::Tls13] {
            assert_eq!(TlsVersion::from_openssl_version(v.to_openssl_version()), Some(v));
        }
    }

    #[test]
    fn test_client_verify_parsing() {
        assert_eq!("none".parse::<ClientVerify>().unwrap(), ClientVerify::None);
        assert_eq!("Required".parse::<ClientVerify>().unwrap(), ClientVerify::Required);
        assert!("always".parse::<ClientVerify>().is_err());
    }

    #[test]
    fn test_server_config_builder() {
        // Server with built-in cert
        let config = TlsConfig::server()
            .unwrap()
            .min_version(Some(TlsVersion::Tls12))
            .unwrap()
            .client_verify(ClientVerify::Optional)
            .check_revocation(true)
            .unwrap()
            .build()
            .unwrap();

        assert!(config.is_server());
        assert!(config.check_revocation);
        assert_eq!(config.client_verify(), ClientVerify::Optional);
        assert_eq!(config.handshake_timeout(), Some(DEFAULT_HANDSHAKE_TIMEOUT));
    }

    #[test]
    fn test_client_config_builder() {
        let config = TlsConfig::client()
            .unwrap()
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .unwrap()
            .servername("example.com")
            .verify_peer(false)
            .build()
            .unwrap();

        assert!(!config.is_server());
        assert_eq!(config.servername, Some("example.com".to_string()));
    }

    #[test]
    fn test_handshake_failure_cause() {
        let err = TlsError::HandshakeFailed {
            reason: "TLS protocol error".to_string(),
            cause: Some("wrong version number".to_string()),
        };
        assert_eq!(err.cause(), Some("wrong version number"));
        assert!(TlsError::InvalidVersion("x".into()).cause().is_none());
    }
}
