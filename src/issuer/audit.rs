//! Audit logging for authorization protocol transitions.
//!
//! Every event is emitted via `tracing::info!` with the event serialized as
//! JSON in the `audit` field, making the trail queryable by any log
//! aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `par.created` | A pushed authorization request is staged |
//! | `code.issued` | An authorization code is issued on authorize |
//! | `token.issued` | A code is exchanged for tokens |
//! | `token.denied` | Any PAR, authorize or token step is rejected |
//! | `token.revoked` | An access token is revoked via `POST /oauth2/revoke` |
//! | `token.introspected` | A token is introspected |

use serde::Serialize;

/// Show only the first three characters of a principal identifier.
#[must_use]
pub fn mask(value: &str) -> String {
    let visible: String = value.chars().take(3).collect();
    format!("{visible}***")
}

/// Structured audit event emitted for every protocol transition.
#[derive(Debug, Default, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Client the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Masked principal hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// JTI of the affected access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_jti: Option<String>,
    /// Granted scope (for `token.issued`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Introspection verdict (for `token.introspected`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// OAuth2 error code for denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl AuditEvent {
    /// Construct a `par.created` event.
    #[must_use]
    pub fn par_created(client_id: &str, login_hint: Option<&str>) -> Self {
        Self {
            event: "par.created",
            client_id: Some(client_id.to_string()),
            principal: login_hint.map(mask),
            ..Self::default()
        }
    }

    /// Construct a `code.issued` event.
    #[must_use]
    pub fn code_issued(client_id: &str) -> Self {
        Self {
            event: "code.issued",
            client_id: Some(client_id.to_string()),
            ..Self::default()
        }
    }

    /// Construct a `token.issued` event.
    #[must_use]
    pub fn token_issued(
        client_id: &str,
        login_hint: Option<&str>,
        jti: &str,
        scope: &str,
    ) -> Self {
        Self {
            event: "token.issued",
            client_id: Some(client_id.to_string()),
            principal: login_hint.map(mask),
            token_jti: Some(jti.to_string()),
            scope: Some(scope.to_string()),
            ..Self::default()
        }
    }

    /// Construct a `token.denied` event.
    #[must_use]
    pub fn denied(reason: &'static str, client_id: Option<&str>) -> Self {
        Self {
            event: "token.denied",
            client_id: client_id.map(str::to_string),
            reason: Some(reason),
            ..Self::default()
        }
    }

    /// Construct a `token.revoked` event.
    #[must_use]
    pub fn revoked(jti: &str, client_id: &str) -> Self {
        Self {
            event: "token.revoked",
            client_id: Some(client_id.to_string()),
            token_jti: Some(jti.to_string()),
            ..Self::default()
        }
    }

    /// Construct a `token.introspected` event.
    #[must_use]
    pub fn introspected(jti: Option<&str>, active: bool, requested_by: &str) -> Self {
        Self {
            event: "token.introspected",
            client_id: Some(requested_by.to_string()),
            token_jti: jti.map(str::to_string),
            active: Some(active),
            ..Self::default()
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO fapi_auth::issuer::audit audit={"event":"token.issued","client_id":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "issuer audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
