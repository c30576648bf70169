//! Shared helpers for the integration tests

#![allow(dead_code)]

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509NameBuilder, X509};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tlsterm::tls::{TlsConfig, TlsSession};
use tlsterm::{AcceptMode, Server, SessionOps, SessionReport, SessionSettings, ShutdownHandle};

pub const GREETING: &str = "Hello from the server.";

/// A server running on a background thread
pub struct TestServer {
    pub addr: SocketAddr,
    pub reports: Receiver<SessionReport>,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestServer {
    pub fn start(mode: AcceptMode, tls: TlsConfig, settings: SessionSettings) -> Self {
        let (tx, rx) = mpsc::channel();
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), mode, tls, settings)
            .unwrap()
            .with_reports(tx);
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle().unwrap();
        let thread = thread::spawn(move || server.run());

        TestServer { addr, reports: rx, handle, thread: Some(thread) }
    }

    /// Server with the built-in identity and default settings
    pub fn builtin(mode: AcceptMode) -> Self {
        let tls = TlsConfig::server().unwrap().build().unwrap();
        Self::start(mode, tls, SessionSettings::default())
    }

    pub fn next_report(&self) -> SessionReport {
        self.reports
            .recv_timeout(Duration::from_secs(10))
            .expect("no session report within 10s")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Client that skips server verification
pub fn client_config() -> TlsConfig {
    TlsConfig::client().unwrap().build().unwrap()
}

pub fn connect(addr: SocketAddr, config: &TlsConfig) -> TlsSession<TcpStream> {
    let stream = TcpStream::connect(addr).unwrap();
    config.connect(stream).unwrap()
}

/// Read exactly `len` bytes and return them as text
pub fn read_text(session: &mut TlsSession<TcpStream>, len: usize) -> String {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = session.read(&mut buf[filled..]).unwrap();
        assert!(n > 0, "stream ended after {} of {} bytes", filled, len);
        filled += n;
    }
    String::from_utf8(buf).unwrap()
}

pub fn read_greeting(session: &mut TlsSession<TcpStream>) -> String {
    read_text(session, GREETING.len())
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

/// Self-signed certificate valid between the two offsets from now, in days
pub fn self_signed(common_name: &str, from_days: i64, to_days: i64) -> (X509, PKey<Private>) {
    let key = ec_key();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    name.append_entry_by_text("O", "tlsterm tests").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(unix_now() as u32).unwrap();
    builder
        .set_serial_number(&Asn1Integer::from_bn(&serial).unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();

    let now = unix_now();
    let not_before = Asn1Time::from_unix(now + from_days * 86_400).unwrap();
    let not_after = Asn1Time::from_unix(now + to_days * 86_400).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();

    // Acts as its own trust anchor
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_cert_sign()
                .build()
                .unwrap(),
        )
        .unwrap();

    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}

pub fn valid_cert(common_name: &str) -> (X509, PKey<Private>) {
    self_signed(common_name, -1, 30)
}

pub fn expired_cert(common_name: &str) -> (X509, PKey<Private>) {
    self_signed(common_name, -30, -1)
}

/// PEM bundle with the certificate followed by the key
pub fn pem_bundle(cert: &X509, key: &PKey<Private>) -> Vec<u8> {
    let mut pem = cert.to_pem().unwrap();
    pem.extend_from_slice(&key.private_key_to_pem_pkcs8().unwrap());
    pem
}
