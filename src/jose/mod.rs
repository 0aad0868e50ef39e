//! JOSE primitives: compact JWS, compact JWE and JSON Web Key sets.
//!
//! # Wire formats
//!
//! | Object | Segments | Layout |
//! |--------|----------|--------|
//! | JWS | 3 | `header.payload.signature` |
//! | JWE | 5 | `header.encrypted_key.iv.ciphertext.tag` |
//!
//! Every segment is base64url without padding. Signing is delegated to
//! `jsonwebtoken` (RS256 / PS256); key wrapping uses RSA-OAEP from the `rsa`
//! crate and content encryption uses AES-256-GCM from `aes-gcm`.

pub mod jwe;
pub mod jwk;
pub mod jws;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

pub use jwe::CompactJwe;
pub use jwk::{JsonWebKey, JsonWebKeySet, KeyUse};
pub use jws::CompactJws;

/// Errors raised while building or parsing JOSE objects.
#[derive(Debug, thiserror::Error)]
pub enum JoseError {
    /// The compact serialization is structurally invalid.
    #[error("Malformed {kind}: {reason}")]
    Malformed {
        /// Which object was being parsed (e.g. `"JWS"`).
        kind: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The header names an algorithm this crate does not implement.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The object was produced for a different key.
    #[error("Key ID mismatch: expected {expected}, got {actual}")]
    KeyMismatch {
        /// Key ID held by the local key manager.
        expected: String,
        /// Key ID named in the header.
        actual: String,
    },

    /// Key unwrapping or authenticated decryption failed.
    ///
    /// Carries no detail about which step failed.
    #[error("Decryption failed")]
    Decryption,

    /// Signing, verification or key conversion failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Header or payload JSON could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JoseError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn crypto(reason: impl std::fmt::Display) -> Self {
        Self::Crypto(reason.to_string())
    }
}

/// Base64url-encode without padding.
pub(crate) fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base64url-decode a single compact segment.
pub(crate) fn b64_decode(kind: &'static str, segment: &str) -> Result<Vec<u8>, JoseError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JoseError::malformed(kind, format!("invalid base64url segment: {e}")))
}

/// Number of `.`-separated segments in a compact serialization.
#[must_use]
pub fn segment_count(compact: &str) -> usize {
    compact.split('.').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64_round_trips_without_padding() {
        let encoded = b64_encode(b"any carnal pleas");
        assert!(!encoded.contains('='));
        assert_eq!(b64_decode("test", &encoded).unwrap(), b"any carnal pleas");
    }

    #[test]
    fn b64_decode_rejects_standard_alphabet_padding() {
        let err = b64_decode("JWS", "YQ==").unwrap_err();
        assert!(matches!(err, JoseError::Malformed { kind: "JWS", .. }));
    }

    #[test]
    fn segment_count_counts_dots() {
        assert_eq!(segment_count("a.b.c"), 3);
        assert_eq!(segment_count("a.b.c.d.e"), 5);
    }
}
