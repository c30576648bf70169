//! Negotiated session parameters
//!
//! Captured once after the handshake and exposed read-only for diagnostics.

use super::cert::CertInfo;
use super::config::TlsVersion;
use openssl::nid::Nid;
use openssl::ssl::{NameType, SslRef};
use std::time::Duration;

const UNDEF: &str = "<undef>";

/// TLS parameters available after handshake
#[derive(Debug, Clone)]
pub struct SessionParameters {
    /// Negotiated TLS version string (e.g., "TLSv1.3")
    pub protocol: String,
    pub protocol_version: Option<TlsVersion>,

    /// Negotiated cipher suite name
    pub cipher: String,
    /// Bulk cipher algorithm (e.g., "aes-256-gcm")
    pub cipher_algorithm: String,
    /// Secret bits of the bulk cipher
    pub cipher_strength: u32,

    /// Handshake digest of the suite (e.g., "sha384")
    pub hash_algorithm: String,
    pub hash_strength: u32,

    /// Key exchange algorithm
    pub key_exchange_algorithm: String,
    /// Bit size of the server key used to authenticate the exchange
    pub key_exchange_strength: u32,

    /// Authentication algorithm (e.g., "rsa")
    pub authentication_algorithm: String,

    pub is_authenticated: bool,
    pub is_server: bool,
    /// Records carry integrity protection
    pub is_signed: bool,
    /// Records are encrypted
    pub is_encrypted: bool,
    /// Certificate revocation lists are consulted for the peer certificate
    pub revocation_checked: bool,
    pub session_reused: bool,

    /// SNI servername sent by the client
    pub servername: Option<String>,

    pub local_certificate: Option<CertInfo>,
    pub remote_certificate: Option<CertInfo>,

    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

fn nid_name(nid: Option<Nid>) -> String {
    nid.and_then(|n| n.long_name().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| UNDEF.to_string())
}

/// `Kx=`, `Au=`, `Enc=` and `Mac=` fields of an OpenSSL cipher description,
/// e.g. `ECDHE-RSA-AES256-GCM-SHA384 TLSv1.2 Kx=ECDH Au=RSA Enc=AESGCM(256) Mac=AEAD`
#[derive(Debug, Default, PartialEq, Eq)]
struct CipherDescription {
    kx: Option<String>,
    au: Option<String>,
    enc: Option<String>,
    mac: Option<String>,
}

impl CipherDescription {
    fn parse(description: &str) -> Self {
        let mut fields = CipherDescription::default();
        for token in description.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let value = Some(value.to_string());
            match key {
                "Kx" => fields.kx = value,
                "Au" => fields.au = value,
                "Enc" => fields.enc = value,
                "Mac" => fields.mac = value,
                _ => {}
            }
        }
        fields
    }

    /// Records carry a MAC or an AEAD tag
    fn has_integrity(&self) -> bool {
        self.mac
            .as_deref()
            .is_some_and(|mac| !mac.is_empty() && !mac.eq_ignore_ascii_case("none"))
    }
}

fn or_undef(value: Option<String>) -> String {
    value.unwrap_or_else(|| UNDEF.to_string())
}

impl SessionParameters {
    /// Snapshot the parameters of an established SSL connection
    pub fn from_ssl(ssl: &SslRef, is_server: bool, revocation_checked: bool) -> Self {
        let local_certificate = ssl.certificate().map(CertInfo::from_x509_ref);
        let remote_certificate = ssl
            .peer_certificate()
            .map(|cert| CertInfo::from_x509_ref(&cert));

        let key_exchange_strength = ssl
            .certificate()
            .and_then(|cert| cert.public_key().ok())
            .map(|key| key.bits())
            .unwrap_or(0);

        let mut params = SessionParameters {
            protocol: ssl.version_str().to_string(),
            protocol_version: ssl.version2().and_then(TlsVersion::from_openssl_version),
            cipher: UNDEF.to_string(),
            cipher_algorithm: UNDEF.to_string(),
            cipher_strength: 0,
            hash_algorithm: UNDEF.to_string(),
            hash_strength: 0,
            key_exchange_algorithm: UNDEF.to_string(),
            key_exchange_strength,
            authentication_algorithm: UNDEF.to_string(),
            is_authenticated: false,
            is_server,
            is_signed: false,
            is_encrypted: false,
            revocation_checked,
            session_reused: ssl.session_reused(),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            local_certificate,
            remote_certificate,
            read_timeout: None,
            write_timeout: None,
        };

        if let Some(cipher) = ssl.current_cipher() {
            let fields = CipherDescription::parse(&cipher.description());

            params.cipher = cipher.name().to_string();
            params.cipher_algorithm = match cipher.cipher_nid() {
                Some(nid) => nid_name(Some(nid)),
                None => or_undef(fields.enc.clone()),
            };
            params.cipher_strength = cipher.bits().secret.max(0) as u32;
            params.is_signed = fields.has_integrity();
            params.key_exchange_algorithm = or_undef(fields.kx);
            params.authentication_algorithm = or_undef(fields.au);

            if let Some(md) = cipher.handshake_digest() {
                params.hash_algorithm = nid_name(Some(md.type_()));
                params.hash_strength = (md.size() * 8) as u32;
            }

            params.is_encrypted = params.cipher_strength > 0;
            params.is_authenticated = params.is_encrypted;
        }

        params
    }

    /// Emit the diagnostics surface as structured log events
    pub fn log(&self) {
        tracing::info!(
            cipher = %self.cipher,
            cipher_algorithm = %self.cipher_algorithm,
            cipher_strength = self.cipher_strength,
            hash_algorithm = %self.hash_algorithm,
            hash_strength = self.hash_strength,
            key_exchange_algorithm = %self.key_exchange_algorithm,
            key_exchange_strength = self.key_exchange_strength,
            protocol = %self.protocol,
            "security level"
        );
        tracing::info!(
            authenticated = self.is_authenticated,
            server = self.is_server,
            signed = self.is_signed,
            encrypted = self.is_encrypted,
            session_reused = self.session_reused,
            "security services"
        );
        tracing::info!(revocation_checked = self.revocation_checked, "certificate revocation");
        Self::log_cert("local", self.local_certificate.as_ref());
        Self::log_cert("remote", self.remote_certificate.as_ref());
        tracing::info!(
            read_timeout_ms = self.read_timeout.map(|d| d.as_millis() as u64),
            write_timeout_ms = self.write_timeout.map(|d| d.as_millis() as u64),
            "stream properties"
        );
    }

    fn log_cert(role: &'static str, cert: Option<&CertInfo>) {
        match cert {
            Some(cert) => tracing::info!(
                role,
                subject = %cert.distinguished_name,
                issuer = %cert.issuer,
                not_before = %cert.not_before,
                not_after = %cert.not_after,
                expired = cert.expired,
                "certificate"
            ),
            None => tracing::info!(role, "no certificate"),
        }
    }
}

impl Default for SessionParameters {
    fn default() -> Self {
        SessionParameters {
            protocol: UNDEF.to_string(),
            protocol_version: None,
            cipher: UNDEF.to_string(),
            cipher_algorithm: UNDEF.to_string(),
            cipher_strength: 0,
            hash_algorithm: UNDEF.to_string(),
            hash_strength: 0,
            key_exchange_algorithm: UNDEF.to_string(),
            key_exchange_strength: 0,
            authentication_algorithm: UNDEF.to_string(),
            is_authenticated: false,
            is_server: false,
            is_signed: false,
            is_encrypted: false,
            revocation_checked: false,
            session_reused: false,
            servername: None,
            local_certificate: None,
            remote_certificate: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
