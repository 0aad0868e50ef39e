//! JWS signing key manager.

use std::fmt;
use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::jose::{JoseError, JsonWebKey, KeyUse, jws};
use crate::{Error, Result};

/// Signature algorithms this crate issues and accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    RS256,
    /// RSASSA-PSS with SHA-256.
    #[default]
    PS256,
}

impl SigningAlgorithm {
    /// JOSE name (`"RS256"` / `"PS256"`).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::PS256 => "PS256",
        }
    }

    /// Map to the `jsonwebtoken` algorithm.
    #[must_use]
    pub fn to_jwt(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::PS256 => Algorithm::PS256,
        }
    }

    /// Map from a header algorithm; `None` for anything outside the allow-list.
    #[must_use]
    pub fn from_jwt(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256 => Some(Self::RS256),
            Algorithm::PS256 => Some(Self::PS256),
            _ => None,
        }
    }

    /// All supported names, for discovery metadata.
    #[must_use]
    pub fn supported_names() -> Vec<&'static str> {
        vec![Self::RS256.name(), Self::PS256.name()]
    }
}

/// Owns the signing key pair. The private key never leaves this struct.
pub struct SigningKeyManager {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwk: JsonWebKey,
}

impl fmt::Debug for SigningKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyManager")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKeyManager {
    /// Generate a fresh RSA-2048 key pair.
    pub fn generate(kid: &str, algorithm: SigningAlgorithm) -> Result<Self> {
        Self::from_private_key(kid, algorithm, &super::generate_rsa()?)
    }

    /// Load the private key from a PEM file.
    pub fn from_pem_file(path: &Path, kid: &str, algorithm: SigningAlgorithm) -> Result<Self> {
        Self::from_private_key(kid, algorithm, &super::load_pem(path)?)
    }

    /// Wrap an existing private key.
    pub fn from_private_key(
        kid: &str,
        algorithm: SigningAlgorithm,
        private_key: &RsaPrivateKey,
    ) -> Result<Self> {
        let der = private_key.to_pkcs1_der().map_err(Error::key)?;
        let encoding_key = EncodingKey::from_rsa_der(der.as_bytes());

        let jwk = JsonWebKey::rsa(
            &RsaPublicKey::from(private_key),
            kid,
            algorithm.name(),
            KeyUse::Sig,
        );
        let decoding_key = jwk.decoding_key()?;

        Ok(Self {
            kid: kid.to_string(),
            algorithm,
            encoding_key,
            decoding_key,
            jwk,
        })
    }

    /// Key ID placed in every header.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// Configured signature algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    fn header(&self) -> Header {
        let mut header = Header::new(self.algorithm.to_jwt());
        header.kid = Some(self.kid.clone());
        header
    }

    /// Compact JWS over arbitrary bytes.
    pub fn sign(&self, payload: &[u8]) -> std::result::Result<String, JoseError> {
        jws::sign(&self.header(), payload, &self.encoding_key)
    }

    /// Compact JWS of a serialized claims object.
    pub fn sign_claims<T: Serialize>(&self, claims: &T) -> std::result::Result<String, JoseError> {
        jsonwebtoken::encode(&self.header(), claims, &self.encoding_key).map_err(JoseError::crypto)
    }

    /// Verify a token signed by this manager and deserialize its claims.
    ///
    /// Only the signature, `alg` and `kid` are checked; time and audience
    /// checks are left to the caller.
    pub fn verify_claims<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> std::result::Result<T, JoseError> {
        let header = jsonwebtoken::decode_header(token).map_err(JoseError::crypto)?;
        if header.kid.as_deref() != Some(self.kid.as_str()) {
            return Err(JoseError::KeyMismatch {
                expected: self.kid.clone(),
                actual: header.kid.unwrap_or_default(),
            });
        }

        let mut validation = Validation::new(self.algorithm.to_jwt());
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(JoseError::crypto)
    }

    /// Public JWK (`use: "sig"`).
    #[must_use]
    pub fn public_jwk(&self) -> JsonWebKey {
        self.jwk.clone()
    }
}
