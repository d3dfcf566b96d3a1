//! Server configuration, read once from `MAITRE_*` environment variables.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::engine::EngineSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("both MAITRE_TLS_CERT and MAITRE_TLS_KEY must be set, or neither")]
    PartialTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Certificate and key paths; TLS is off when absent.
    pub tls: Option<(PathBuf, PathBuf)>,
    pub lock_timeout_ms: u64,
    pub lock_attempts: u32,
    pub lock_backoff_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls = match (lookup("MAITRE_TLS_CERT"), lookup("MAITRE_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            _ => return Err(ConfigError::PartialTls),
        };
        Ok(Self {
            port: parsed(&lookup, "MAITRE_PORT")?.unwrap_or(5433),
            bind: lookup("MAITRE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("MAITRE_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            password: lookup("MAITRE_PASSWORD").unwrap_or_else(|| "maitre".into()),
            max_connections: parsed(&lookup, "MAITRE_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "MAITRE_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parsed(&lookup, "MAITRE_METRICS_PORT")?,
            tls,
            lock_timeout_ms: parsed(&lookup, "MAITRE_LOCK_TIMEOUT_MS")?.unwrap_or(250),
            lock_attempts: parsed(&lookup, "MAITRE_LOCK_ATTEMPTS")?.unwrap_or(5),
            lock_backoff_ms: parsed(&lookup, "MAITRE_LOCK_BACKOFF_MS")?.unwrap_or(10),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            lock_attempts: self.lock_attempts.max(1),
            lock_backoff: Duration::from_millis(self.lock_backoff_ms),
        }
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        match &self.tls {
            None => Ok(None),
            Some((cert, key)) => load_tls_acceptor(cert, key).map(Some),
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> io::Result<TlsAcceptor> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
