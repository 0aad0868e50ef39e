//! Introspection-backed revocation check for bearer tokens.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::client::network;
use super::error::{ExchangeStep, VerifyError};
use crate::config::VerifierConfig;

#[derive(Debug, Deserialize)]
struct Introspection {
    active: bool,
}

/// Outcome of a completed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Introspection confirmed the token is active.
    Active,
    /// The check was skipped or could not complete and fail-open applied.
    Unchecked,
}

/// Asks the issuer whether a token is still active.
#[derive(Debug, Clone)]
pub struct RevocationGuard {
    http: Client,
    enabled: bool,
    url: String,
    client_id: String,
    client_secret: Option<String>,
    fail_open: bool,
}

impl RevocationGuard {
    /// Build the guard from the verifier's revocation settings.
    #[must_use]
    pub fn new(http: Client, config: &VerifierConfig) -> Self {
        let revocation = &config.revocation;
        Self {
            http,
            enabled: revocation.enabled,
            url: revocation
                .introspection_url
                .clone()
                .unwrap_or_else(|| config.endpoint("/oauth2/introspect")),
            client_id: revocation
                .client_id
                .clone()
                .unwrap_or_else(|| config.client_id.clone()),
            client_secret: revocation.client_secret.clone(),
            fail_open: revocation.fail_open,
        }
    }

    /// Reject `token` if the issuer reports it inactive.
    ///
    /// Call only after signature and claim validation has passed.
    pub async fn check(&self, token: &str) -> Result<RevocationStatus, VerifyError> {
        if !self.enabled {
            return Ok(RevocationStatus::Unchecked);
        }

        match self.introspect(token).await {
            Ok(true) => Ok(RevocationStatus::Active),
            Ok(false) => {
                debug!("Introspection reports token inactive");
                Err(VerifyError::Revoked)
            }
            Err(e) if self.fail_open => {
                warn!(error = %e, "Introspection unavailable; accepting token (fail-open)");
                Ok(RevocationStatus::Unchecked)
            }
            Err(e) => Err(VerifyError::IntrospectionUnavailable(e.to_string())),
        }
    }

    async fn introspect(&self, token: &str) -> Result<bool, VerifyError> {
        let step = ExchangeStep::Introspect;
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.client_id, self.client_secret.as_deref())
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await
            .map_err(network(step))?;

        if !response.status().is_success() {
            return Err(VerifyError::Protocol {
                step,
                status: response.status().as_u16(),
                error: None,
            });
        }
        let body: Introspection = super::client::read_json(step, response).await?;
        Ok(body.active)
    }
}
