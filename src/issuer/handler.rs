//! HTTP handlers for the authorization server endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/oauth2/par` | Stage a pushed authorization request (RFC 9126) |
//! | `GET` | `/oauth2/authorize` | Issue a code, 303 to the redirect URI |
//! | `POST` | `/oauth2/token` | Exchange a code for tokens |
//! | `GET` | `/oauth2/jwks`, `/jwks` | Public signing and encryption keys |
//! | `GET` | `/.well-known/openid-configuration` | Provider metadata |
//! | `POST` | `/oauth2/introspect` | RFC 7662 introspection (Basic auth) |
//! | `POST` | `/oauth2/revoke` | RFC 7009 revocation (Basic auth) |
//! | `GET` | `/health` | Liveness |
//!
//! All form and query fields are optional at the extractor level so that a
//! missing parameter becomes an OAuth2 `invalid_request` rather than an axum
//! rejection.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{AuthorizeRequest, Issuer, OAuthError, ParRequest, TokenRequest};

// ── Request types ─────────────────────────────────────────────────────────

/// Form body shared by introspection and revocation.
#[derive(Debug, Default, Deserialize)]
pub struct TokenHandleForm {
    /// The token to inspect or revoke.
    pub token: Option<String>,
    /// Ignored; only access tokens are issued.
    pub token_type_hint: Option<String>,
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the issuer routes.
pub fn routes(issuer: Arc<Issuer>) -> Router {
    Router::new()
        .route("/oauth2/par", post(pushed_authorization_request))
        .route("/oauth2/authorize", get(authorize))
        .route("/oauth2/token", post(token))
        .route("/oauth2/jwks", get(jwks))
        .route("/jwks", get(jwks))
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/oauth2/.well-known/openid-configuration", get(discovery))
        .route("/oauth2/introspect", post(introspect))
        .route("/oauth2/revoke", post(revoke))
        .route("/health", get(health))
        .with_state(issuer)
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// Token-bearing responses must not be cached (RFC 6749 §5.1).
fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// `POST /oauth2/par`
async fn pushed_authorization_request(
    State(issuer): State<Arc<Issuer>>,
    form: Result<Form<ParRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(req) = form.map_err(|e| {
        debug!(error = %e, "Rejected PAR body");
        OAuthError::InvalidRequest("Malformed form body")
    })?;

    let response = issuer.push_authorization_request(req)?;
    Ok(no_store(Json(response).into_response()))
}

/// `GET /oauth2/authorize`
async fn authorize(
    State(issuer): State<Arc<Issuer>>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Result<Redirect, OAuthError> {
    let Query(req) = query.map_err(|_| OAuthError::InvalidRequest("Malformed query string"))?;
    let location = issuer.authorize(&req)?;
    Ok(Redirect::to(&location))
}

/// `POST /oauth2/token`
async fn token(
    State(issuer): State<Arc<Issuer>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(req) = form.map_err(|_| OAuthError::InvalidRequest("Malformed form body"))?;
    let response = issuer.exchange_code(&req)?;
    Ok(no_store(Json(response).into_response()))
}

/// `GET /oauth2/jwks`
async fn jwks(State(issuer): State<Arc<Issuer>>) -> impl IntoResponse {
    Json(issuer.jwks())
}

/// `GET /.well-known/openid-configuration`
async fn discovery(State(issuer): State<Arc<Issuer>>) -> impl IntoResponse {
    Json(issuer.discovery())
}

/// Extract `(client_id, client_secret)` from `Authorization: Basic ...`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

fn authenticate(issuer: &Issuer, headers: &HeaderMap) -> Result<String, OAuthError> {
    let (client_id, secret) =
        basic_credentials(headers).ok_or(OAuthError::ClientAuthenticationFailed)?;
    issuer.authenticate_client(&client_id, &secret)?;
    Ok(client_id)
}

/// `POST /oauth2/introspect`
async fn introspect(
    State(issuer): State<Arc<Issuer>>,
    headers: HeaderMap,
    form: Result<Form<TokenHandleForm>, FormRejection>,
) -> Result<Response, OAuthError> {
    let client_id = authenticate(&issuer, &headers)?;
    let Form(req) = form.map_err(|_| OAuthError::InvalidRequest("Malformed form body"))?;
    let token = req
        .token
        .filter(|t| !t.is_empty())
        .ok_or(OAuthError::InvalidRequest("token is required"))?;

    Ok(no_store(
        Json(issuer.introspect(&token, &client_id)).into_response(),
    ))
}

/// `POST /oauth2/revoke`
///
/// Answers 200 for unknown and already-revoked tokens alike (RFC 7009 §2.2).
async fn revoke(
    State(issuer): State<Arc<Issuer>>,
    headers: HeaderMap,
    form: Result<Form<TokenHandleForm>, FormRejection>,
) -> Result<StatusCode, OAuthError> {
    let client_id = authenticate(&issuer, &headers)?;
    let Form(req) = form.map_err(|_| OAuthError::InvalidRequest("Malformed form body"))?;
    let token = req
        .token
        .filter(|t| !t.is_empty())
        .ok_or(OAuthError::InvalidRequest("token is required"))?;

    issuer.revoke(&token, &client_id);
    Ok(StatusCode::OK)
}

/// `GET /health`
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn basic_credentials_parses_id_and_secret() {
        // GIVEN: base64("portfolio-api:s3:cret")
        let encoded = STANDARD.encode("portfolio-api:s3:cret");
        let headers = headers_with(&format!("Basic {encoded}"));

        // THEN: the secret may itself contain colons
        assert_eq!(
            basic_credentials(&headers),
            Some(("portfolio-api".to_string(), "s3:cret".to_string()))
        );
    }

    #[test]
    fn basic_credentials_rejects_other_schemes() {
        assert_eq!(basic_credentials(&headers_with("Bearer abc")), None);
        assert_eq!(basic_credentials(&headers_with("Basic !!!")), None);
        assert_eq!(basic_credentials(&HeaderMap::new()), None);
    }

    #[test]
    fn no_store_sets_cache_headers() {
        let response = no_store(StatusCode::OK.into_response());
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
    }
}
