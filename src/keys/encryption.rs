//! JWE encryption key manager.

use std::fmt;
use std::path::Path;

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::Result;
use crate::jose::{CompactJwe, JoseError, JsonWebKey, KeyUse, jwe};

/// Owns the encryption key pair used to wrap identity tokens.
pub struct EncryptionKeyManager {
    kid: String,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl fmt::Debug for EncryptionKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeyManager")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl EncryptionKeyManager {
    /// Generate a fresh RSA-2048 key pair.
    pub fn generate(kid: &str) -> Result<Self> {
        Ok(Self::from_private_key(kid, super::generate_rsa()?))
    }

    /// Load the private key from a PEM file.
    pub fn from_pem_file(path: &Path, kid: &str) -> Result<Self> {
        Ok(Self::from_private_key(kid, super::load_pem(path)?))
    }

    /// Wrap an existing private key.
    #[must_use]
    pub fn from_private_key(kid: &str, private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        Self {
            kid: kid.to_string(),
            private_key,
            public_key,
        }
    }

    /// Key ID placed in JWE headers.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// Seal `payload` as a compact JWE (`RSA-OAEP` + `A256GCM`).
    pub fn encrypt(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
    ) -> std::result::Result<String, JoseError> {
        jwe::encrypt(&self.public_key, &self.kid, content_type, payload)
    }

    /// Open a compact JWE addressed to this key.
    pub fn decrypt(&self, token: &str) -> std::result::Result<Vec<u8>, JoseError> {
        let jwe = CompactJwe::parse(token)?;
        match &jwe.header().kid {
            Some(kid) if *kid != self.kid => {
                return Err(JoseError::KeyMismatch {
                    expected: self.kid.clone(),
                    actual: kid.clone(),
                });
            }
            _ => {}
        }
        jwe.decrypt(&self.private_key)
    }

    /// Public JWK (`use: "enc"`, `alg: "RSA-OAEP"`).
    #[must_use]
    pub fn public_jwk(&self) -> JsonWebKey {
        JsonWebKey::rsa(&self.public_key, &self.kid, jwe::ALG_RSA_OAEP, KeyUse::Enc)
    }
}
