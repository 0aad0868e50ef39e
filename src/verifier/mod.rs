//! Token consumer: acquires access tokens and verifies signed artifacts.
//!
//! # Acquisition flow
//!
//! 1. Return the cached token for the principal if it is still live.
//! 2. `POST /oauth2/par` with a fresh `state` and `nonce`.
//! 3. `GET /oauth2/authorize` without following the redirect; read the code
//!    from `Location` and check `state`.
//! 4. `POST /oauth2/token`.
//! 5. Decrypt the identity token, verify its nested signature against the
//!    issuer's key set and check `iss`, `aud`, `exp`, `sub` and `nonce`.
//! 6. Cache the access token for `min(token_cache_ttl, expires_in)`.
//!
//! Any failure in steps 2 to 5 is returned as a [`VerifyError`]; nothing is
//! cached and no fallback token is produced. Concurrent first requests for
//! the same principal share one exchange.

pub mod client;
pub mod error;
pub mod id_token;
pub mod key_set;
pub mod revocation;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

pub use client::ParClient;
pub use error::{ExchangeStep, VerifyError};
pub use key_set::KeySetCache;
pub use revocation::{RevocationGuard, RevocationStatus};

use crate::Result;
use crate::cache::{CacheStatsSnapshot, SingleFlightCache};
use crate::claims::{AccessTokenClaims, is_expired, unix_now};
use crate::config::VerifierConfig;
use crate::issuer::audit::mask;
use crate::keys::EncryptionKeyManager;

/// Token lookups between sweeps of expired or abandoned cache slots.
const TOKEN_CACHE_SWEEP_EVERY: u64 = 64;

/// Client-side counterpart of the issuer.
pub struct Verifier {
    config: VerifierConfig,
    client: ParClient,
    keys: KeySetCache,
    decryptor: Arc<EncryptionKeyManager>,
    tokens: SingleFlightCache<String, String>,
    revocation: RevocationGuard,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("issuer_url", &self.config.issuer_url)
            .field("client_id", &self.config.client_id)
            .field("cached_tokens", &self.tokens.len())
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Build a verifier that decrypts identity tokens with `decryptor`.
    pub fn new(config: VerifierConfig, decryptor: Arc<EncryptionKeyManager>) -> Result<Self> {
        let http = client::build_http_client(&config)?;
        let keys = KeySetCache::new(
            http.clone(),
            config.endpoint("/oauth2/jwks"),
            config.jwks_cache_ttl,
        );
        let client = ParClient::new(http.clone(), &config);
        let revocation = RevocationGuard::new(http, &config);

        info!(
            issuer = %config.issuer_url,
            client_id = %config.client_id,
            revocation = config.revocation.enabled,
            "Verifier ready"
        );

        Ok(Self {
            config,
            client,
            keys,
            decryptor,
            tokens: SingleFlightCache::with_sweep_every(TOKEN_CACHE_SWEEP_EVERY),
            revocation,
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Key set cache, exposed for diagnostics.
    #[must_use]
    pub fn key_set(&self) -> &KeySetCache {
        &self.keys
    }

    /// Token cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.tokens.stats()
    }

    /// Access token for `principal`, from cache or a fresh exchange.
    pub async fn get_access_token(&self, principal: &str) -> std::result::Result<String, VerifyError> {
        self.tokens
            .get_or_try_insert_with(&principal.to_string(), || self.acquire(principal))
            .await
    }

    /// Drop any cached token for `principal`.
    pub fn invalidate_cache(&self, principal: &str) {
        debug!(principal = %mask(principal), "Invalidating cached token");
        self.tokens.invalidate(&principal.to_string());
    }

    async fn acquire(&self, principal: &str) -> std::result::Result<(String, Duration), VerifyError> {
        let masked = mask(principal);
        let state = Uuid::new_v4().to_string();
        let nonce = Uuid::new_v4().to_string();

        let par = self.client.push(principal, &state, &nonce).await?;
        let code = self.client.authorize(&par.request_uri, &state).await?;
        let tokens = self.client.exchange(&code).await?;

        id_token::validate(
            &tokens.id_token,
            &self.decryptor,
            &self.keys,
            id_token::Expectations {
                issuer: self.config.expected_issuer(),
                client_id: &self.config.client_id,
                nonce: &nonce,
                leeway: self.config.clock_skew.as_secs(),
            },
        )
        .await?;

        let ttl = self
            .config
            .token_cache_ttl
            .min(Duration::from_secs(tokens.expires_in));
        info!(principal = %masked, ttl = ?ttl, "Acquired access token");
        Ok((tokens.access_token, ttl))
    }

    /// Verify a signed response body and return its payload as text.
    pub async fn verify_and_extract_payload(
        &self,
        signed: &str,
    ) -> std::result::Result<String, VerifyError> {
        let payload = self.keys.verify(signed.trim()).await?;
        String::from_utf8(payload)
            .map_err(|_| VerifyError::Malformed("payload is not UTF-8".to_string()))
    }

    /// Validate an incoming bearer token and return its claims.
    ///
    /// Checks the signature, `iss`, `aud` and `exp`, then asks the
    /// revocation guard.
    pub async fn validate_bearer(
        &self,
        token: &str,
    ) -> std::result::Result<AccessTokenClaims, VerifyError> {
        let payload = self.keys.verify(token).await?;
        let claims: AccessTokenClaims = serde_json::from_slice(&payload)
            .map_err(|e| VerifyError::Malformed(format!("access token claims: {e}")))?;

        let issuer = self.config.expected_issuer();
        if claims.iss != issuer {
            return Err(VerifyError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: claims.iss,
            });
        }
        if !claims.aud.contains(issuer) {
            return Err(VerifyError::AudienceMismatch(issuer.to_string()));
        }
        if is_expired(claims.exp, unix_now(), self.config.clock_skew.as_secs()) {
            return Err(VerifyError::TokenExpired);
        }

        self.revocation.check(token).await?;
        Ok(claims)
    }
}
