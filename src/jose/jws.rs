//! Compact JWS (RFC 7515) over arbitrary payloads.
//!
//! Typed claim sets go through `jsonwebtoken::encode`/`decode` directly; this
//! module covers the cases where the payload is opaque bytes (signed resource
//! responses) or where the header must be inspected before a key is chosen.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};

use super::{JoseError, b64_decode, b64_encode};

/// Sign `payload` under `header` and return the compact serialization.
pub fn sign(header: &Header, payload: &[u8], key: &EncodingKey) -> Result<String, JoseError> {
    let header_b64 = b64_encode(serde_json::to_vec(header)?);
    let signing_input = format!("{header_b64}.{}", b64_encode(payload));
    let signature = jsonwebtoken::crypto::sign(signing_input.as_bytes(), key, header.alg)
        .map_err(JoseError::crypto)?;
    Ok(format!("{signing_input}.{signature}"))
}

/// A parsed (not yet verified) compact JWS.
#[derive(Debug)]
pub struct CompactJws<'a> {
    header: Header,
    signing_input: &'a str,
    payload_b64: &'a str,
    signature: &'a str,
}

impl<'a> CompactJws<'a> {
    /// Split and decode the header of a compact JWS.
    ///
    /// Headers naming an algorithm `jsonwebtoken` does not know (including
    /// `none`) fail here as [`JoseError::Malformed`].
    pub fn parse(token: &'a str) -> Result<Self, JoseError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(JoseError::malformed("JWS", "expected 3 segments"));
        };

        let header: Header = serde_json::from_slice(&b64_decode("JWS", header_b64)?)
            .map_err(|e| JoseError::malformed("JWS", format!("invalid header: {e}")))?;

        Ok(Self {
            header,
            signing_input: &token[..header_b64.len() + 1 + payload_b64.len()],
            payload_b64,
            signature,
        })
    }

    /// Protected header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// `kid` from the header, if any.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// `alg` from the header.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Check the signature with `key` using the header's algorithm.
    ///
    /// Returns `Ok(false)` for a well-formed but wrong signature.
    pub fn verify(&self, key: &DecodingKey) -> Result<bool, JoseError> {
        jsonwebtoken::crypto::verify(
            self.signature,
            self.signing_input.as_bytes(),
            key,
            self.header.alg,
        )
        .map_err(JoseError::crypto)
    }

    /// Decoded payload bytes. Only trust these after [`verify`](Self::verify).
    pub fn payload(&self) -> Result<Vec<u8>, JoseError> {
        b64_decode("JWS", self.payload_b64)
    }
}
