//! FAPI Auth Library
//!
//! A FAPI-style OAuth 2.0 / OpenID Connect authorization server with the
//! client library that consumes it.
//!
//! # Features
//!
//! - **Pushed Authorization Requests**: RFC 9126 `request_uri` handles with a TTL
//! - **Single-use codes**: atomic consumption, `invalid_grant` on reuse
//! - **Signed tokens**: RS256/PS256 access tokens, published via JWKS
//! - **Encrypted identity tokens**: RSA-OAEP + A256GCM around a nested JWS
//! - **Verifier**: cached, single-flighted token acquisition and signed
//!   payload verification with automatic key-set refresh
//! - **Revocation**: RFC 7662 introspection and RFC 7009 revocation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod claims;
pub mod cli;
pub mod config;
pub mod error;
pub mod issuer;
pub mod jose;
pub mod keys;
pub mod verifier;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
