//! Consumer-side failures.

use crate::jose::JoseError;

/// Which leg of the three-step exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStep {
    /// `POST /oauth2/par`
    Par,
    /// `GET /oauth2/authorize`
    Authorize,
    /// `POST /oauth2/token`
    Token,
    /// `GET /oauth2/jwks`
    Jwks,
    /// `POST /oauth2/introspect`
    Introspect,
}

impl std::fmt::Display for ExchangeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Par => "par",
            Self::Authorize => "authorize",
            Self::Token => "token",
            Self::Jwks => "jwks",
            Self::Introspect => "introspect",
        })
    }
}

/// Errors from acquiring, validating or verifying issuer artifacts.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The issuer could not be reached or timed out.
    #[error("Network error during {step}: {source}")]
    Network {
        /// Failed step.
        step: ExchangeStep,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The issuer answered with an unexpected status or an OAuth2 error.
    #[error("Issuer rejected {step} with HTTP {status}: {}", error.as_deref().unwrap_or("unknown error"))]
    Protocol {
        /// Failed step.
        step: ExchangeStep,
        /// HTTP status returned.
        status: u16,
        /// OAuth2 `error` code, when the body carried one.
        error: Option<String>,
    },

    /// A response body or redirect did not have the expected shape.
    #[error("Malformed {step} response: {reason}")]
    MalformedResponse {
        /// Failed step.
        step: ExchangeStep,
        /// What was wrong.
        reason: String,
    },

    /// A token or signed payload is structurally invalid.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The header names an algorithm outside RS256/PS256.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The signature does not verify.
    #[error("Signature verification failed")]
    SignatureInvalid,

    /// No signing key with the header's `kid`, even after a refresh.
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// `exp` lies in the past (after clock skew).
    #[error("Token expired")]
    TokenExpired,

    /// `iss` differs from the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer.
        expected: String,
        /// Issuer in the token.
        actual: String,
    },

    /// `aud` does not contain the expected audience.
    #[error("Audience does not contain {0}")]
    AudienceMismatch(String),

    /// `sub` is absent or empty.
    #[error("Token has no subject")]
    MissingSubject,

    /// The identity token's nonce differs from the one sent.
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// The redirect's state differs from the one sent.
    #[error("State mismatch")]
    StateMismatch,

    /// The identity token could not be decrypted.
    #[error("Identity token decryption failed")]
    DecryptionFailed,

    /// Introspection reports the token inactive.
    #[error("Token has been revoked")]
    Revoked,

    /// Introspection could not be completed and fail-closed is configured.
    #[error("Introspection unavailable: {0}")]
    IntrospectionUnavailable(String),
}

impl VerifyError {
    /// Whether the failure indicates a forged, tampered, replayed or
    /// otherwise untrustworthy artifact.
    #[must_use]
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_)
                | Self::UnsupportedAlgorithm(_)
                | Self::SignatureInvalid
                | Self::KeyNotFound(_)
                | Self::TokenExpired
                | Self::IssuerMismatch { .. }
                | Self::AudienceMismatch(_)
                | Self::MissingSubject
                | Self::NonceMismatch
                | Self::StateMismatch
                | Self::DecryptionFailed
                | Self::Revoked
        )
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::IntrospectionUnavailable(_) => true,
            Self::Protocol { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<JoseError> for VerifyError {
    fn from(err: JoseError) -> Self {
        match err {
            JoseError::UnsupportedAlgorithm(alg) => Self::UnsupportedAlgorithm(alg),
            JoseError::Decryption | JoseError::KeyMismatch { .. } => Self::DecryptionFailed,
            JoseError::Malformed { .. } | JoseError::Json(_) => Self::Malformed(err.to_string()),
            JoseError::Crypto(_) => Self::SignatureInvalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_failures_are_not_retryable() {
        for err in [
            VerifyError::SignatureInvalid,
            VerifyError::NonceMismatch,
            VerifyError::Revoked,
            VerifyError::KeyNotFound("k".into()),
        ] {
            assert!(err.is_security_failure(), "{err}");
            assert!(!err.is_retryable(), "{err}");
        }
    }

    #[test]
    fn protocol_errors_retry_only_on_5xx() {
        let client_error = VerifyError::Protocol {
            step: ExchangeStep::Token,
            status: 400,
            error: Some("invalid_grant".into()),
        };
        let server_error = VerifyError::Protocol {
            step: ExchangeStep::Par,
            status: 503,
            error: None,
        };
        assert!(!client_error.is_retryable());
        assert!(!client_error.is_security_failure());
        assert!(server_error.is_retryable());
        assert_eq!(
            client_error.to_string(),
            "Issuer rejected token with HTTP 400: invalid_grant"
        );
    }

    #[test]
    fn jose_errors_map_to_distinct_variants() {
        assert!(matches!(
            VerifyError::from(JoseError::Decryption),
            VerifyError::DecryptionFailed
        ));
        assert!(matches!(
            VerifyError::from(JoseError::UnsupportedAlgorithm("HS256".into())),
            VerifyError::UnsupportedAlgorithm(_)
        ));
        assert!(matches!(
            VerifyError::from(JoseError::malformed("JWS", "bad")),
            VerifyError::Malformed(_)
        ));
    }
}
