//! Server configuration
//!
//! Loaded from a TOML file. Every section and field is optional; missing
//! values fall back to the defaults below. Validation reports every problem
//! at once instead of stopping at the first.

use crate::framer::{Framing, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_MESSAGE_LEN};
use crate::server::{AcceptMode, DEFAULT_PORT};
use crate::session::{SessionSettings, DEFAULT_GREETING, DEFAULT_SENTINEL};
use crate::tls::config::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::tls::{ClientVerify, TlsConfig, TlsError, TlsIdentity, TlsVersion};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listener: ListenerConfig,
    pub tls: TlsSettings,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind; all interfaces by default
    pub bind_address: IpAddr,
    pub port: u16,
    pub mode: AcceptMode,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            mode: AcceptMode::default(),
        }
    }
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Where the server identity comes from
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum IdentitySource {
    /// Built-in self-signed development certificate
    #[default]
    Builtin,
    /// PEM certificate chain; the key is read from `key_path` or the same file
    Pem {
        cert_path: PathBuf,
        key_path: Option<PathBuf>,
    },
    /// Password protected PKCS#12 archive
    Pkcs12 { path: PathBuf, password: String },
    /// Certificate store directory searched by subject name
    Store { dir: PathBuf, subject: String },
}

impl IdentitySource {
    pub fn load(&self) -> Result<TlsIdentity, TlsError> {
        match self {
            IdentitySource::Builtin => TlsIdentity::builtin(),
            IdentitySource::Pem { cert_path, key_path: None } => {
                TlsIdentity::from_pem_file(cert_path)
            }
            IdentitySource::Pem { cert_path, key_path: Some(key_path) } => {
                TlsIdentity::from_pem_files(cert_path, key_path)
            }
            IdentitySource::Pkcs12 { path, password } => {
                TlsIdentity::from_pkcs12_file(path, password)
            }
            IdentitySource::Store { dir, subject } => TlsIdentity::from_store(dir, subject),
        }
    }
}

/// TLS handshake policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsSettings {
    pub identity: IdentitySource,
    /// `any` or a version such as `TLSv1.2`
    pub min_protocol: String,
    /// `none`, `optional` or `required`
    pub client_verify: String,
    pub client_ca: Option<PathBuf>,
    pub check_revocation: bool,
    pub handshake_timeout_ms: u64,
    /// OpenSSL cipher list for TLS 1.2 and below
    pub cipher_list: Option<String>,
    /// OpenSSL cipher suites for TLS 1.3
    pub ciphersuites: Option<String>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        TlsSettings {
            identity: IdentitySource::default(),
            min_protocol: "any".to_string(),
            client_verify: "none".to_string(),
            client_ca: None,
            check_revocation: false,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            cipher_list: None,
            ciphersuites: None,
        }
    }
}

/// Per-session behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub buffer_size: usize,
    pub max_message_len: usize,
    pub greeting: String,
    pub sentinel: String,
    pub framing: Framing,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            greeting: DEFAULT_GREETING.to_string(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            framing: Framing::default(),
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Err(e) = TlsVersion::parse_floor(&self.tls.min_protocol) {
            errors.push(format!("tls.min_protocol: {}", e));
        }
        match self.tls.client_verify.parse::<ClientVerify>() {
            Ok(ClientVerify::None) => {}
            Ok(_) if self.tls.client_ca.is_none() => {
                errors.push("tls.client_ca is required when client_verify is enabled".to_string());
            }
            Ok(_) => {}
            Err(e) => errors.push(format!("tls.client_verify: {}", e)),
        }
        if matches!(&self.tls.cipher_list, Some(c) if c.trim().is_empty()) {
            errors.push("tls.cipher_list must not be empty".to_string());
        }
        if matches!(&self.tls.ciphersuites, Some(c) if c.trim().is_empty()) {
            errors.push("tls.ciphersuites must not be empty".to_string());
        }
        if self.tls.handshake_timeout_ms == 0 {
            errors.push("tls.handshake_timeout_ms must be greater than 0".to_string());
        }

        let session = &self.session;
        if session.read_timeout_ms == 0 {
            errors.push("session.read_timeout_ms must be greater than 0".to_string());
        }
        if session.write_timeout_ms == 0 {
            errors.push("session.write_timeout_ms must be greater than 0".to_string());
        }
        if session.buffer_size == 0 {
            errors.push("session.buffer_size must be at least 1".to_string());
        }
        if session.max_message_len == 0 {
            errors.push("session.max_message_len must be at least 1".to_string());
        }
        if session.sentinel.trim().is_empty() {
            errors.push("session.sentinel must not be empty".to_string());
        }
        if let Framing::Terminator { terminator } = &session.framing {
            if terminator.is_empty() {
                errors.push("session.framing.terminator must not be empty".to_string());
            }
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(format!("logging.format: unknown format '{}'", self.logging.format));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load the identity and build the shared server TLS configuration
    pub fn tls_config(&self) -> Result<TlsConfig, ConfigError> {
        let identity = self.tls.identity.load()?;
        let info = identity.info();
        tracing::info!(
            subject = %info.distinguished_name,
            not_before = %info.not_before,
            not_after = %info.not_after,
            "server identity loaded"
        );

        let client_verify = self.tls.client_verify.parse::<ClientVerify>()?;
        let mut builder = TlsConfig::server()?
            .identity(&identity)?
            .min_version(TlsVersion::parse_floor(&self.tls.min_protocol)?)?
            .client_verify(client_verify)
            .check_revocation(self.tls.check_revocation)?
            .handshake_timeout(Some(Duration::from_millis(self.tls.handshake_timeout_ms)));

        if let Some(ca) = &self.tls.client_ca {
            builder = builder.client_verify_ca(ca)?;
        }
        if let Some(ciphers) = &self.tls.cipher_list {
            builder = builder.cipher_list(ciphers)?;
        }
        if let Some(ciphers) = &self.tls.ciphersuites {
            builder = builder.ciphersuites(ciphers)?;
        }

        Ok(builder.build()?)
    }

    pub fn session_settings(&self) -> SessionSettings {
        let session = &self.session;
        SessionSettings {
            read_timeout: Some(Duration::from_millis(session.read_timeout_ms)),
            write_timeout: Some(Duration::from_millis(session.write_timeout_ms)),
            greeting: session.greeting.clone(),
            sentinel: session.sentinel.clone(),
            framing: session.framing.clone(),
            buffer_size: session.buffer_size,
            max_message_len: session.max_message_len,
        }
    }
}
