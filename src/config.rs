//! Server configuration.
//!
//! Options are plain data resolved by the binary entry point; the only
//! loading logic lives here: turning PEM files into the process-wide TLS
//! configuration every connection shares by reference.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Tls(rustls::Error),
    /// The key file held no usable private key.
    MissingKey(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Tls(e) => write!(f, "TLS error: {}", e),
            ConfigError::MissingKey(path) => {
                write!(f, "no private key found in {}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<rustls::Error> for ConfigError {
    fn from(e: rustls::Error) -> Self {
        ConfigError::Tls(e)
    }
}

/// TLS material locations.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Server options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Listen address.
    pub addr: String,
    /// When present, SSL requests are accepted using this material.
    pub tls: Option<TlsOptions>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:15432".to_string(),
            tls: None,
        }
    }
}

impl ServerOptions {
    /// Resolves options from the environment, falling back to defaults.
    ///
    /// `PORTICO_ADDR` overrides the listen address; `PORTICO_TLS_CERT` and
    /// `PORTICO_TLS_KEY` (both required together) enable TLS.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(addr) = std::env::var("PORTICO_ADDR") {
            options.addr = addr;
        }
        if let (Ok(cert), Ok(key)) = (
            std::env::var("PORTICO_TLS_CERT"),
            std::env::var("PORTICO_TLS_KEY"),
        ) {
            options.tls = Some(TlsOptions {
                cert_path: cert.into(),
                key_path: key.into(),
            });
        }
        options
    }
}

/// Builds the process-wide TLS configuration from PEM files.
pub fn load_tls(options: &TlsOptions) -> Result<Arc<rustls::ServerConfig>, ConfigError> {
    let mut cert_reader = BufReader::new(File::open(&options.cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    let mut key_reader = BufReader::new(File::open(&options.key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| ConfigError::MissingKey(options.key_path.clone()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ServerOptions::default();
        assert_eq!(options.addr, "127.0.0.1:15432");
        assert!(options.tls.is_none());
    }

    #[test]
    fn test_missing_cert_file_is_io_error() {
        let options = TlsOptions {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(load_tls(&options), Err(ConfigError::Io(_))));
    }
}
