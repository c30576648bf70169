use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tlsterm::config::{ConfigError, IdentitySource, ServerConfig};
use tlsterm::logging::{self, LogFormat};
use tlsterm::{AcceptMode, Framing, Server};

#[derive(Parser)]
#[command(name = "tlsterm")]
#[command(about = "TLS terminating message server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// PEM certificate chain (may also hold the key)
    #[arg(long, conflicts_with_all = ["pkcs12", "store_dir"])]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Password protected PKCS#12 identity
    #[arg(long, conflicts_with = "store_dir")]
    pkcs12: Option<PathBuf>,

    /// PKCS#12 password
    #[arg(long, requires = "pkcs12")]
    password: Option<String>,

    /// Certificate store directory
    #[arg(long, requires = "subject")]
    store_dir: Option<PathBuf>,

    /// Subject name to look up in the store
    #[arg(long, requires = "store_dir")]
    subject: Option<String>,

    /// Lowest accepted protocol version (any, TLSv1.2, ...)
    #[arg(long)]
    min_protocol: Option<String>,

    /// Reject clients without a trusted certificate
    #[arg(long)]
    require_client_cert: bool,

    /// CA bundle used to verify client certificates
    #[arg(long)]
    client_ca: Option<PathBuf>,

    /// Serve one connection at a time
    #[arg(long)]
    sequential: bool,

    /// Message framing (line, terminator:<text>, length_prefixed, read_boundary, until_close).
    /// The default `line` expects newline-terminated messages; `read_boundary`
    /// treats each read as a message
    #[arg(long)]
    framing: Option<String>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (text or json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if self.sequential {
            config.listener.mode = AcceptMode::Sequential;
        }

        if let Some(cert) = &self.cert {
            config.tls.identity = IdentitySource::Pem {
                cert_path: cert.clone(),
                key_path: self.key.clone(),
            };
        } else if let Some(path) = &self.pkcs12 {
            config.tls.identity = IdentitySource::Pkcs12 {
                path: path.clone(),
                password: self.password.clone().unwrap_or_default(),
            };
        } else if let (Some(dir), Some(subject)) = (&self.store_dir, &self.subject) {
            config.tls.identity = IdentitySource::Store {
                dir: dir.clone(),
                subject: subject.clone(),
            };
        }

        if let Some(min) = &self.min_protocol {
            config.tls.min_protocol = min.clone();
        }
        if let Some(ca) = &self.client_ca {
            config.tls.client_ca = Some(ca.clone());
        }
        if self.require_client_cert {
            config.tls.client_verify = "required".to_string();
        }

        if let Some(framing) = &self.framing {
            config.session.framing = Framing::parse(framing).ok_or_else(|| {
                ConfigError::Validation(vec![format!("--framing: unknown framing '{}'", framing)])
            })?;
        }

        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }

        config.validate()
    }
}

fn load(cli: &Cli) -> Result<ServerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config)?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            let _ = logging::init("info", LogFormat::Text);
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let format = LogFormat::parse(&config.logging.format).unwrap_or(LogFormat::Text);
    if let Err(e) = logging::init(&config.logging.level, format) {
        eprintln!("failed to initialise logging: {}", e);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.socket_addr(),
        mode = ?config.listener.mode,
        framing = ?config.session.framing,
        "tlsterm starting"
    );

    let tls = match config.tls_config() {
        Ok(tls) => tls,
        Err(e) => {
            tracing::error!(error = %e, "failed to load server identity");
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::bind(
        config.listener.socket_addr(),
        config.listener.mode,
        tls,
        config.session_settings(),
    ) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, address = %config.listener.socket_addr(), "bind failed");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}
