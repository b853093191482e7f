use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Stratum error: {0}")]
    Stratum(String),

    #[error("Blob too short for nonce: {len} bytes")]
    BlobTooShort { len: usize },

    #[error("Hash function returned {len} bytes")]
    HashOutput { len: usize },

    #[error("RandomX error: {0}")]
    RandomX(#[from] randomx_rs::RandomXError),

    #[error("Thread error: {0}")]
    Thread(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found or empty: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Pool closed the connection")]
    Disconnected,
}

impl Error {
    /// Failures the pool session recovers from by backing off and logging in
    /// again on the same connection.
    pub fn needs_relogin(&self) -> bool {
        matches!(
            self,
            Error::Malformed(_)
                | Error::Stratum(_)
                | Error::InvalidHex(_)
                | Error::Json(_)
                | Error::BlobTooShort { .. }
        )
    }

    /// Failures that invalidate the connection itself.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Connect { .. }
                | Error::Tls(_)
                | Error::TlsHandshake(_)
                | Error::Disconnected
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
