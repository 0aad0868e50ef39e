//! Error types for the FAPI auth service

use std::io;

use thiserror::Error;

/// Result type alias for crate-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors (startup, configuration, key material, I/O).
///
/// Protocol errors surfaced to OAuth2 clients live in
/// [`crate::issuer::OAuthError`]; consumer-side failures live in
/// [`crate::verifier::VerifyError`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key generation or loading failed
    #[error("Key error: {0}")]
    Key(String),

    /// JOSE encoding/decoding error
    #[error("JOSE error: {0}")]
    Jose(#[from] crate::jose::JoseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a key error from anything displayable.
    pub fn key(reason: impl std::fmt::Display) -> Self {
        Self::Key(reason.to_string())
    }
}
