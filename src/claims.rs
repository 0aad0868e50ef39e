//! Typed token claims and clock helpers

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Whether `exp` lies in the past once `leeway` seconds of skew are allowed.
#[must_use]
pub fn is_expired(exp: u64, now: u64, leeway: u64) -> bool {
    now >= exp.saturating_add(leeway)
}

/// JWT `aud` claim: a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "x"`
    Single(String),
    /// `"aud": ["x", "y"]`
    Multiple(Vec<String>),
}

impl Audience {
    /// Whether `value` is one of the audiences.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(aud) => aud == value,
            Self::Multiple(auds) => auds.iter().any(|a| a == value),
        }
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer URL
    pub iss: String,
    /// Subject, the client the token was issued to
    pub sub: String,
    /// Always the issuer
    pub aud: Audience,
    /// Granted scope (space-delimited)
    pub scope: String,
    /// OAuth2 client ID
    pub client_id: String,
    /// Principal the authorization was requested for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
    /// Unique token ID, used for revocation
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
}

/// Claims carried by the nested JWS inside an identity token.
///
/// `sub` is optional on the wire so a missing subject surfaces as a
/// validation failure rather than a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTokenClaims {
    /// Issuer URL
    pub iss: String,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Relying party (client ID)
    pub aud: Audience,
    /// Unique token ID
    pub jti: String,
    /// Issued at (Unix seconds)
    #[serde(default)]
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
    /// Echo of the nonce sent in the pushed request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}
