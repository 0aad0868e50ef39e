//! HTTP client for the three-step PAR → authorize → token exchange.

use reqwest::{Client, Response, StatusCode, header, redirect};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::error::{ExchangeStep, VerifyError};
use crate::config::VerifierConfig;
use crate::issuer::{ParResponse, TokenResponse};

/// Build the shared HTTP client used for every issuer call.
///
/// Redirects are never followed: the authorize step reads the code from
/// the `Location` header itself.
pub fn build_http_client(config: &VerifierConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .user_agent(concat!("fapi-auth/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub(crate) fn network(step: ExchangeStep) -> impl FnOnce(reqwest::Error) -> VerifyError {
    move |source| VerifyError::Network { step, source }
}

/// Turn a non-success response into [`VerifyError::Protocol`], picking up
/// the OAuth2 `error` code when the body has one.
pub(crate) async fn protocol_error(step: ExchangeStep, response: Response) -> VerifyError {
    let status = response.status().as_u16();
    let error = response
        .bytes()
        .await
        .ok()
        .and_then(|body| serde_json::from_slice::<ErrorBody>(&body).ok())
        .map(|body| body.error);
    VerifyError::Protocol {
        step,
        status,
        error,
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    step: ExchangeStep,
    response: Response,
) -> Result<T, VerifyError> {
    let body = response.bytes().await.map_err(network(step))?;
    serde_json::from_slice(&body).map_err(|e| VerifyError::MalformedResponse {
        step,
        reason: e.to_string(),
    })
}

/// Drives the issuer's authorization endpoints on behalf of one client.
#[derive(Debug, Clone)]
pub struct ParClient {
    http: Client,
    client_id: String,
    redirect_uri: String,
    scope: String,
    par_url: String,
    authorize_url: String,
    token_url: String,
}

impl ParClient {
    /// Create a client for the issuer described by `config`.
    #[must_use]
    pub fn new(http: Client, config: &VerifierConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope.clone(),
            par_url: config.endpoint("/oauth2/par"),
            authorize_url: config.endpoint("/oauth2/authorize"),
            token_url: config.endpoint("/oauth2/token"),
        }
    }

    /// Stage an authorization request for `principal`.
    pub async fn push(
        &self,
        principal: &str,
        state: &str,
        nonce: &str,
    ) -> Result<ParResponse, VerifyError> {
        let step = ExchangeStep::Par;
        let response = self
            .http
            .post(&self.par_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("login_hint", principal),
                ("state", state),
                ("nonce", nonce),
            ])
            .send()
            .await
            .map_err(network(step))?;

        if !response.status().is_success() {
            return Err(protocol_error(step, response).await);
        }
        let par: ParResponse = read_json(step, response).await?;
        debug!(expires_in = par.expires_in, "Pushed authorization request");
        Ok(par)
    }

    /// Redeem `request_uri` for an authorization code.
    ///
    /// The issuer must answer with a redirect whose `Location` carries
    /// exactly one `code` and the `state` that was pushed.
    pub async fn authorize(&self, request_uri: &str, state: &str) -> Result<String, VerifyError> {
        let step = ExchangeStep::Authorize;
        let response = self
            .http
            .get(&self.authorize_url)
            .query(&[
                ("request_uri", request_uri),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(network(step))?;

        if !response.status().is_redirection() {
            return Err(protocol_error(step, response).await);
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| malformed(step, "redirect without Location"))?;
        code_from_redirect(location, state)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str) -> Result<TokenResponse, VerifyError> {
        let step = ExchangeStep::Token;
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(network(step))?;

        if !response.status().is_success() {
            return Err(protocol_error(step, response).await);
        }
        read_json(step, response).await
    }
}

fn malformed(step: ExchangeStep, reason: &str) -> VerifyError {
    VerifyError::MalformedResponse {
        step,
        reason: reason.to_string(),
    }
}

/// Pull the code out of an authorize redirect and check its `state`.
fn code_from_redirect(location: &str, expected_state: &str) -> Result<String, VerifyError> {
    let step = ExchangeStep::Authorize;
    let url = Url::parse(location).map_err(|e| VerifyError::MalformedResponse {
        step,
        reason: format!("invalid Location: {e}"),
    })?;

    let mut codes = Vec::new();
    let mut state = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "code" => codes.push(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                return Err(VerifyError::Protocol {
                    step,
                    status: StatusCode::SEE_OTHER.as_u16(),
                    error: Some(value.into_owned()),
                });
            }
            _ => {}
        }
    }

    let code = match codes.as_slice() {
        [code] if !code.is_empty() => code.clone(),
        [] => return Err(malformed(step, "redirect carries no code")),
        _ => return Err(malformed(step, "redirect must carry exactly one code")),
    };
    if state.as_deref() != Some(expected_state) {
        return Err(VerifyError::StateMismatch);
    }
    Ok(code)
}
