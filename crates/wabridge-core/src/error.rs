//! Error types for the gateway core.

use thiserror::Error;

/// Core error type for gateway operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Device store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// Session backup encryption/decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Session persistence is disabled (no valid encryption key configured).
    #[error("no encryption key")]
    NoSessionKey,

    /// Remote backup endpoint failure.
    #[error("backup error: {0}")]
    Backup(String),

    /// Malformed JID supplied by a caller.
    #[error("invalid jid: {0}")]
    InvalidJid(String),

    /// Upstream client is not connected.
    #[error("not connected")]
    NotConnected,

    /// Upstream client has no authenticated session.
    #[error("not logged in")]
    NotLoggedIn,

    /// Connect was called on a client that already holds a live connection.
    /// Callers coerce this to success.
    #[error("already connected")]
    AlreadyConnected,

    /// Failure reported by the upstream protocol client.
    #[error("{0}")]
    Upstream(String),

    /// Media download exhausted its retry ladder without yielding content.
    #[error("media download returned empty content after retries")]
    MediaUnavailable,
}

/// Result type alias using the gateway's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Backup(e.to_string())
    }
}
