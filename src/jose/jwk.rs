//! JSON Web Keys (RFC 7517), RSA public halves only.

use jsonwebtoken::DecodingKey;
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};

use super::{JoseError, b64_encode};

/// Intended use of a published key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Signature verification.
    Sig,
    /// Encryption.
    Enc,
}

/// An RSA public JWK. Never carries private parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type, always `RSA` for keys produced here.
    pub kty: String,
    /// Intended use.
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<KeyUse>,
    /// Key ID.
    pub kid: String,
    /// Algorithm the key is meant for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Modulus, base64url big-endian.
    pub n: String,
    /// Public exponent, base64url big-endian.
    pub e: String,
}

impl JsonWebKey {
    /// Describe an RSA public key.
    #[must_use]
    pub fn rsa(public_key: &RsaPublicKey, kid: &str, alg: &str, key_use: KeyUse) -> Self {
        Self {
            kty: "RSA".to_string(),
            key_use: Some(key_use),
            kid: kid.to_string(),
            alg: Some(alg.to_string()),
            n: b64_encode(public_key.n().to_bytes_be()),
            e: b64_encode(public_key.e().to_bytes_be()),
        }
    }

    /// Whether this key may be used to verify signatures.
    ///
    /// Keys without a `use` member are accepted.
    #[must_use]
    pub fn is_signing_key(&self) -> bool {
        self.kty == "RSA" && matches!(self.key_use, None | Some(KeyUse::Sig))
    }

    /// Build a `jsonwebtoken` verification key from the modulus and exponent.
    pub fn decoding_key(&self) -> Result<DecodingKey, JoseError> {
        DecodingKey::from_rsa_components(&self.n, &self.e).map_err(JoseError::crypto)
    }
}

/// A published key set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Keys in publication order.
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Look up a key by ID.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}
