//! Certificate handling and parsing
//!
//! Extracts the fields the diagnostics surface reports about the local and
//! remote certificates.

use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};
use std::cmp::Ordering;

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Full subject distinguished name, e.g. `CN=example.com, O=Acme, C=NO`
    pub distinguished_name: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
    /// Start of the validity window
    pub not_before: String,
    /// End of the validity window
    pub not_after: String,
    /// Whether `not_after` is already in the past
    pub expired: bool,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate reference
    pub fn from_x509_ref(cert: &X509Ref) -> Self {
        CertInfo {
            subject: Self::get_cn(cert.subject_name()),
            distinguished_name: Self::get_dn(cert.subject_name()),
            issuer: Self::get_cn(cert.issuer_name()),
            subject_alt_names: Self::get_subject_alt_names(cert),
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
            expired: Self::is_expired(cert),
        }
    }

    /// Get Common Name from X509_NAME
    fn get_cn(name: &X509NameRef) -> String {
        name.entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<undef>".to_string())
    }

    /// Render every name entry as `SN=value`, most specific first
    fn get_dn(name: &X509NameRef) -> String {
        let mut parts: Vec<String> = name
            .entries()
            .filter_map(|entry| {
                let key = entry.object().nid().short_name().ok()?;
                let value = entry.data().as_utf8().ok()?;
                Some(format!("{}={}", key, value))
            })
            .collect();
        parts.reverse();
        parts.join(", ")
    }

    /// Get Subject Alternative Names
    fn get_subject_alt_names(cert: &X509Ref) -> Vec<String> {
        let mut names = Vec::new();

        if let Some(san_ext) = cert.subject_alt_names() {
            for name in san_ext {
                if let Some(dns) = name.dnsname() {
                    names.push(format!("DNS:{}", dns));
                } else if let Some(ip) = name.ipaddress() {
                    match ip.len() {
                        4 => {
                            let octets: [u8; 4] = [ip[0], ip[1], ip[2], ip[3]];
                            names.push(format!("IP:{}", std::net::Ipv4Addr::from(octets)));
                        }
                        16 => {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(ip);
                            names.push(format!("IP:{}", std::net::Ipv6Addr::from(octets)));
                        }
                        _ => {}
                    }
                }
            }
        }

        names
    }

    fn is_expired(cert: &X509Ref) -> bool {
        Asn1Time::days_from_now(0)
            .ok()
            .and_then(|now| cert.not_after().compare(&now).ok())
            .map(|ord| ord == Ordering::Less)
            .unwrap_or(false)
    }
}
