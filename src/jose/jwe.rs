//! Compact JWE (RFC 7516) with RSA-OAEP key wrapping and AES-256-GCM.
//!
//! The additional authenticated data is the ASCII of the base64url protected
//! header, so any tampering with the header breaks the GCM tag.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use super::{JoseError, b64_decode, b64_encode};

/// Key management algorithm emitted by this crate.
pub const ALG_RSA_OAEP: &str = "RSA-OAEP";
/// Also accepted when decrypting.
pub const ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";
/// Content encryption algorithm.
pub const ENC_A256GCM: &str = "A256GCM";

const CEK_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// JWE protected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    /// Key management algorithm.
    pub alg: String,
    /// Content encryption algorithm.
    pub enc: String,
    /// Recipient key ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Content type of the plaintext (`JWT` for nested tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
}

fn oaep_padding(alg: &str) -> Result<Oaep, JoseError> {
    match alg {
        ALG_RSA_OAEP => Ok(Oaep::new::<sha1::Sha1>()),
        ALG_RSA_OAEP_256 => Ok(Oaep::new::<sha2::Sha256>()),
        other => Err(JoseError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Encrypt `plaintext` to `recipient` and return the 5-segment compact form.
///
/// A fresh content-encryption key and IV are drawn from the OS RNG per call.
pub fn encrypt(
    recipient: &RsaPublicKey,
    kid: &str,
    content_type: Option<&str>,
    plaintext: &[u8],
) -> Result<String, JoseError> {
    let header = JweHeader {
        alg: ALG_RSA_OAEP.to_string(),
        enc: ENC_A256GCM.to_string(),
        kid: Some(kid.to_string()),
        cty: content_type.map(str::to_string),
    };
    let protected = b64_encode(serde_json::to_vec(&header)?);

    let cek = Aes256Gcm::generate_key(OsRng);
    let iv = Aes256Gcm::generate_nonce(&mut OsRng);

    let encrypted_key = recipient
        .encrypt(&mut OsRng, oaep_padding(ALG_RSA_OAEP)?, cek.as_slice())
        .map_err(JoseError::crypto)?;

    let cipher = Aes256Gcm::new(&cek);
    let mut sealed = cipher
        .encrypt(
            &iv,
            Payload {
                msg: plaintext,
                aad: protected.as_bytes(),
            },
        )
        .map_err(JoseError::crypto)?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(format!(
        "{protected}.{}.{}.{}.{}",
        b64_encode(encrypted_key),
        b64_encode(iv),
        b64_encode(sealed),
        b64_encode(tag),
    ))
}

/// A parsed compact JWE awaiting decryption.
#[derive(Debug)]
pub struct CompactJwe<'a> {
    header: JweHeader,
    protected: &'a str,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl<'a> CompactJwe<'a> {
    /// Split and decode all five segments.
    pub fn parse(token: &'a str) -> Result<Self, JoseError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [protected, encrypted_key, iv, ciphertext, tag] = segments[..] else {
            return Err(JoseError::malformed(
                "JWE",
                format!("expected 5 segments, got {}", segments.len()),
            ));
        };

        let header: JweHeader = serde_json::from_slice(&b64_decode("JWE", protected)?)
            .map_err(|e| JoseError::malformed("JWE", format!("invalid header: {e}")))?;

        Ok(Self {
            header,
            protected,
            encrypted_key: b64_decode("JWE", encrypted_key)?,
            iv: b64_decode("JWE", iv)?,
            ciphertext: b64_decode("JWE", ciphertext)?,
            tag: b64_decode("JWE", tag)?,
        })
    }

    /// Protected header.
    #[must_use]
    pub fn header(&self) -> &JweHeader {
        &self.header
    }

    /// Unwrap the CEK with `private_key` and open the ciphertext.
    pub fn decrypt(&self, private_key: &RsaPrivateKey) -> Result<Vec<u8>, JoseError> {
        if self.header.enc != ENC_A256GCM {
            return Err(JoseError::UnsupportedAlgorithm(self.header.enc.clone()));
        }
        let padding = oaep_padding(&self.header.alg)?;

        if self.iv.len() != IV_LEN || self.tag.len() != TAG_LEN {
            return Err(JoseError::Decryption);
        }

        let cek = private_key
            .decrypt(padding, &self.encrypted_key)
            .map_err(|_| JoseError::Decryption)?;
        if cek.len() != CEK_LEN {
            return Err(JoseError::Decryption);
        }

        let cipher = Aes256Gcm::new_from_slice(&cek).map_err(|_| JoseError::Decryption)?;
        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);

        cipher
            .decrypt(
                GenericArray::from_slice(&self.iv),
                Payload {
                    msg: &sealed,
                    aad: self.protected.as_bytes(),
                },
            )
            .map_err(|_| JoseError::Decryption)
    }
}
