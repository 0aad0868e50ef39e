//! Authorization server: pushed authorization requests, codes and tokens.
//!
//! # Flow
//!
//! ```text
//! POST /oauth2/par        ──► PENDING      (request_uri, TTL 90s)
//! GET  /oauth2/authorize  ──► CODE_ISSUED  (single-use code, TTL 60s)
//! POST /oauth2/token      ──► CONSUMED     (access token + encrypted id token)
//! ```
//!
//! Any mismatch, absence, expiry or reuse ends the flow with a typed
//! [`OAuthError`]; the client restarts from PAR.

pub mod audit;
pub mod error;
pub mod handler;
pub mod response_signing;
pub mod server;
pub mod store;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

pub use error::OAuthError;
pub use server::IssuerServer;

use self::audit::AuditEvent;
use self::store::{
    EphemeralStore, PendingAuthorizationCode, PendingAuthorizationRequest, Reap, RevocationList,
};
use crate::claims::{AccessTokenClaims, Audience, IdentityTokenClaims, is_expired, unix_now};
use crate::config::IssuerConfig;
use crate::jose::{JsonWebKeySet, jwe};
use crate::keys::{KeyManagers, SigningAlgorithm};

/// Prefix of every `request_uri` (RFC 9126 §2.2).
pub const REQUEST_URI_PREFIX: &str = "urn:ietf:params:oauth:request_uri:";
/// Prefix of every authorization code.
pub const CODE_PREFIX: &str = "CODE_";

const AUTHORIZATION_CODE_GRANT: &str = "authorization_code";

// ── Request / Response types ───────────────────────────────────────────────

/// `POST /oauth2/par` form body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParRequest {
    /// Client identifier.
    pub client_id: Option<String>,
    /// Requested scope.
    pub scope: Option<String>,
    /// Where the code will be delivered.
    pub redirect_uri: Option<String>,
    /// Must be `code` when present.
    pub response_type: Option<String>,
    /// Principal the authorization is for.
    pub login_hint: Option<String>,
    /// Opaque value echoed on the redirect.
    pub state: Option<String>,
    /// Value echoed in the identity token.
    pub nonce: Option<String>,
}

/// `POST /oauth2/par` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParResponse {
    /// Handle for the staged request.
    pub request_uri: String,
    /// Seconds until the handle expires.
    pub expires_in: u64,
}

/// `GET /oauth2/authorize` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    /// Handle returned by PAR.
    pub request_uri: Option<String>,
    /// Must equal the client that pushed the request.
    pub client_id: Option<String>,
}

/// `POST /oauth2/token` form body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// Must be `authorization_code`.
    pub grant_type: Option<String>,
    /// Code from the authorize redirect.
    pub code: Option<String>,
    /// When present, must equal the pushed redirect URI.
    pub redirect_uri: Option<String>,
    /// When present, must equal the pushed client ID.
    pub client_id: Option<String>,
}

/// `POST /oauth2/token` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed access token (JWS).
    pub access_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Encrypted identity token (JWE wrapping a JWS).
    pub id_token: String,
    /// Granted scope.
    pub scope: String,
}

/// RFC 7662 introspection response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently valid.
    pub active: bool,
    /// Granted scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Client the token was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    /// Expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Issued at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Token ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Always `Bearer` for active tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    /// `{"active": false}`
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// OpenID provider metadata served at `/.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier.
    pub issuer: String,
    /// Authorize endpoint.
    pub authorization_endpoint: String,
    /// Token endpoint.
    pub token_endpoint: String,
    /// PAR endpoint.
    pub pushed_authorization_request_endpoint: String,
    /// Key set.
    pub jwks_uri: String,
    /// RFC 7662 endpoint.
    pub introspection_endpoint: String,
    /// RFC 7009 endpoint.
    pub revocation_endpoint: String,
    /// `["code"]`
    pub response_types_supported: Vec<String>,
    /// `["authorization_code"]`
    pub grant_types_supported: Vec<String>,
    /// `["tls_client_auth"]`
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// `["client_secret_basic"]`
    pub introspection_endpoint_auth_methods_supported: Vec<String>,
    /// Always `true`.
    pub require_pushed_authorization_requests: bool,
    /// Signature algorithms for identity tokens.
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Key management algorithms for identity tokens.
    pub id_token_encryption_alg_values_supported: Vec<String>,
    /// Content encryption algorithms for identity tokens.
    pub id_token_encryption_enc_values_supported: Vec<String>,
}

// ── Issuer ────────────────────────────────────────────────────────────────

/// Authorization server state.
pub struct Issuer {
    config: IssuerConfig,
    keys: KeyManagers,
    requests: EphemeralStore<PendingAuthorizationRequest>,
    codes: EphemeralStore<PendingAuthorizationCode>,
    revoked: RevocationList,
}

fn required<'a>(value: Option<&'a str>, message: &'static str) -> Result<&'a str, OAuthError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(OAuthError::InvalidRequest(message))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

fn deny(error: OAuthError, client_id: Option<&str>) -> OAuthError {
    audit::emit(&AuditEvent::denied(error.code(), client_id));
    error
}

impl Issuer {
    /// Create an issuer with empty stores.
    #[must_use]
    pub fn new(config: IssuerConfig, keys: KeyManagers) -> Self {
        Self {
            requests: EphemeralStore::new(config.request_uri_ttl),
            codes: EphemeralStore::new(config.code_ttl),
            revoked: RevocationList::new(),
            config,
            keys,
        }
    }

    /// Issuer configuration.
    #[must_use]
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Injected key managers.
    #[must_use]
    pub fn keys(&self) -> &KeyManagers {
        &self.keys
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.issuer.trim_end_matches('/'))
    }

    /// Stage a pushed authorization request.
    pub fn push_authorization_request(&self, req: ParRequest) -> Result<ParResponse, OAuthError> {
        let pending = self
            .validate_par(&req)
            .map_err(|e| deny(e, req.client_id.as_deref()))?;
        let request_uri = format!("{REQUEST_URI_PREFIX}{}", Uuid::new_v4());

        audit::emit(&AuditEvent::par_created(
            &pending.client_id,
            pending.login_hint.as_deref(),
        ));
        debug!(client_id = %pending.client_id, "Pushed authorization request staged");
        self.requests.insert(request_uri.clone(), pending);

        Ok(ParResponse {
            request_uri,
            expires_in: self.requests.ttl().as_secs(),
        })
    }

    fn validate_par(&self, req: &ParRequest) -> Result<PendingAuthorizationRequest, OAuthError> {
        let client_id = required(req.client_id.as_deref(), "client_id is required")?;
        let scope = required(req.scope.as_deref(), "scope is required")?;
        let redirect_uri = required(req.redirect_uri.as_deref(), "redirect_uri is required")?;

        if req.response_type.as_deref().is_some_and(|rt| rt != "code") {
            return Err(OAuthError::UnsupportedResponseType);
        }
        if Url::parse(redirect_uri).is_err() {
            return Err(OAuthError::InvalidRequest("redirect_uri must be an absolute URI"));
        }
        self.check_registered_client(client_id, redirect_uri)?;

        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        Ok(PendingAuthorizationRequest {
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            redirect_uri: redirect_uri.to_string(),
            login_hint: non_empty(&req.login_hint),
            state: non_empty(&req.state),
            nonce: non_empty(&req.nonce),
        })
    }

    fn check_registered_client(&self, client_id: &str, redirect_uri: &str) -> Result<(), OAuthError> {
        if self.config.clients.is_empty() {
            return Ok(());
        }
        let client = self
            .config
            .client(client_id)
            .ok_or(OAuthError::InvalidClient)?;
        if client.redirect_uris.iter().any(|uri| uri == redirect_uri) {
            Ok(())
        } else {
            Err(OAuthError::InvalidRequest("redirect_uri is not registered for this client"))
        }
    }

    /// Issue a single-use code for a staged request.
    ///
    /// Returns the redirect `Location` carrying the code (and `state`, when
    /// the pushed request had one).
    pub fn authorize(&self, req: &AuthorizeRequest) -> Result<String, OAuthError> {
        let (client_id, location) = self
            .issue_code(req)
            .map_err(|e| deny(e, req.client_id.as_deref()))?;
        audit::emit(&AuditEvent::code_issued(&client_id));
        Ok(location.into())
    }

    fn issue_code(&self, req: &AuthorizeRequest) -> Result<(String, Url), OAuthError> {
        let request_uri = required(req.request_uri.as_deref(), "request_uri is required")?;
        let client_id = required(req.client_id.as_deref(), "client_id is required")?;

        let pending = self
            .requests
            .get(request_uri)
            .ok_or(OAuthError::InvalidRequestUri)?;
        if pending.client_id != client_id {
            return Err(OAuthError::InvalidClient);
        }

        let mut location = Url::parse(&pending.redirect_uri).map_err(|_| OAuthError::ServerError)?;
        let code = format!("{CODE_PREFIX}{}", Uuid::new_v4().simple());
        {
            let mut query = location.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &pending.state {
                query.append_pair("state", state);
            }
        }

        self.codes.insert(
            code,
            PendingAuthorizationCode {
                request_uri: request_uri.to_string(),
            },
        );
        Ok((pending.client_id, location))
    }

    /// Exchange an authorization code for an access token and identity token.
    pub fn exchange_code(&self, req: &TokenRequest) -> Result<TokenResponse, OAuthError> {
        if req.grant_type.as_deref() != Some(AUTHORIZATION_CODE_GRANT) {
            return Err(deny(OAuthError::UnsupportedGrantType, req.client_id.as_deref()));
        }
        let code = required(req.code.as_deref(), "code is required")
            .map_err(|e| deny(e, req.client_id.as_deref()))?;

        // Consume first: a failed exchange still burns the code.
        let pending = self
            .codes
            .take(code)
            .and_then(|c| self.requests.get(&c.request_uri))
            .ok_or_else(|| deny(OAuthError::InvalidGrant, req.client_id.as_deref()))?;

        let client_matches = req.client_id.as_ref().is_none_or(|c| *c == pending.client_id);
        let redirect_matches = req
            .redirect_uri
            .as_ref()
            .is_none_or(|r| *r == pending.redirect_uri);
        if !(client_matches && redirect_matches) {
            return Err(deny(OAuthError::InvalidGrant, Some(&pending.client_id)));
        }

        let now = unix_now();
        let access_claims = AccessTokenClaims {
            iss: self.config.issuer.clone(),
            sub: pending.client_id.clone(),
            aud: Audience::Single(self.config.issuer.clone()),
            scope: pending.scope.clone(),
            client_id: pending.client_id.clone(),
            login_hint: pending.login_hint.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.access_token_ttl.as_secs(),
        };
        let identity_claims = IdentityTokenClaims {
            iss: self.config.issuer.clone(),
            sub: Some(pending.client_id.clone()),
            aud: Audience::Single(pending.client_id.clone()),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.id_token_ttl.as_secs(),
            nonce: pending.nonce.clone(),
        };

        let minted = self
            .keys
            .signing
            .sign_claims(&access_claims)
            .and_then(|access_token| {
                let id_jws = self.keys.signing.sign_claims(&identity_claims)?;
                let id_token = self.keys.encryption.encrypt(id_jws.as_bytes(), Some("JWT"))?;
                Ok((access_token, id_token))
            });
        let (access_token, id_token) = minted.map_err(|e| {
            error!(error = %e, "Failed to mint tokens");
            deny(OAuthError::ServerError, Some(&pending.client_id))
        })?;

        audit::emit(&AuditEvent::token_issued(
            &pending.client_id,
            pending.login_hint.as_deref(),
            &access_claims.jti,
            &pending.scope,
        ));

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl.as_secs(),
            id_token,
            scope: pending.scope,
        })
    }

    /// Public signing and encryption keys.
    #[must_use]
    pub fn jwks(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: vec![
                self.keys.signing.public_jwk(),
                self.keys.encryption.public_jwk(),
            ],
        }
    }

    /// Provider metadata.
    #[must_use]
    pub fn discovery(&self) -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: self.config.issuer.clone(),
            authorization_endpoint: self.endpoint("/oauth2/authorize"),
            token_endpoint: self.endpoint("/oauth2/token"),
            pushed_authorization_request_endpoint: self.endpoint("/oauth2/par"),
            jwks_uri: self.endpoint("/oauth2/jwks"),
            introspection_endpoint: self.endpoint("/oauth2/introspect"),
            revocation_endpoint: self.endpoint("/oauth2/revoke"),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&[AUTHORIZATION_CODE_GRANT]),
            token_endpoint_auth_methods_supported: strings(&["tls_client_auth"]),
            introspection_endpoint_auth_methods_supported: strings(&["client_secret_basic"]),
            require_pushed_authorization_requests: true,
            id_token_signing_alg_values_supported: strings(&SigningAlgorithm::supported_names()),
            id_token_encryption_alg_values_supported: strings(&[jwe::ALG_RSA_OAEP]),
            id_token_encryption_enc_values_supported: strings(&[jwe::ENC_A256GCM]),
        }
    }

    /// Check HTTP Basic credentials against registered clients with secrets.
    ///
    /// Clients without a configured secret cannot authenticate.
    pub fn authenticate_client(&self, client_id: &str, secret: &str) -> Result<(), OAuthError> {
        let expected = self
            .config
            .client(client_id)
            .and_then(|c| c.client_secret.as_deref())
            .ok_or(OAuthError::ClientAuthenticationFailed)?;

        if bool::from(expected.as_bytes().ct_eq(secret.as_bytes())) {
            Ok(())
        } else {
            warn!(client_id = %client_id, "Client authentication failed");
            Err(OAuthError::ClientAuthenticationFailed)
        }
    }

    fn verify_access_token(&self, token: &str) -> Option<AccessTokenClaims> {
        let claims: AccessTokenClaims = self.keys.signing.verify_claims(token).ok()?;
        let live = claims.iss == self.config.issuer
            && claims.aud.contains(&self.config.issuer)
            && !is_expired(claims.exp, unix_now(), 0);
        live.then_some(claims)
    }

    /// RFC 7662 introspection on behalf of an authenticated client.
    #[must_use]
    pub fn introspect(&self, token: &str, requested_by: &str) -> IntrospectionResponse {
        let response = match self.verify_access_token(token) {
            Some(claims) if !self.revoked.is_revoked(&claims.jti) => IntrospectionResponse {
                active: true,
                scope: Some(claims.scope),
                client_id: Some(claims.client_id),
                sub: Some(claims.sub),
                iss: Some(claims.iss),
                aud: Some(claims.aud),
                exp: Some(claims.exp),
                iat: Some(claims.iat),
                jti: Some(claims.jti),
                token_type: Some("Bearer".to_string()),
            },
            _ => IntrospectionResponse::inactive(),
        };

        audit::emit(&AuditEvent::introspected(
            response.jti.as_deref(),
            response.active,
            requested_by,
        ));
        response
    }

    /// RFC 7009 revocation. Unknown, invalid or foreign tokens are ignored.
    ///
    /// Returns whether a token was newly revoked.
    pub fn revoke(&self, token: &str, requested_by: &str) -> bool {
        let Some(claims) = self.verify_access_token(token) else {
            debug!("Ignoring revocation of an invalid or expired token");
            return false;
        };
        if claims.client_id != requested_by {
            warn!(client_id = %requested_by, "Client tried to revoke a token it does not own");
            return false;
        }

        let newly = self.revoked.revoke(&claims.jti, claims.exp);
        if newly {
            audit::emit(&AuditEvent::revoked(&claims.jti, requested_by));
        }
        newly
    }
}

impl Reap for Issuer {
    fn reap_expired(&self) -> usize {
        self.requests.reap_expired()
            + self.codes.reap_expired()
            + self.revoked.reap_expired(unix_now())
    }
}
