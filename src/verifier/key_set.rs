//! Cached issuer signing keys.
//!
//! The whole key set is fetched and swapped atomically. A lookup for an
//! unseen `kid`, or any lookup once the set is older than its TTL, triggers
//! one refresh; concurrent refreshes collapse into a single fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::client::{network, protocol_error, read_json};
use super::error::{ExchangeStep, VerifyError};
use crate::jose::{CompactJws, JsonWebKey};
use crate::keys::SigningAlgorithm;

/// A verification key and the algorithm it was published for.
#[derive(Clone)]
pub struct VerificationKey {
    /// Key material.
    pub key: DecodingKey,
    /// Published `alg`, when the JWK carried one.
    pub algorithm: Option<SigningAlgorithm>,
}

struct KeySet {
    keys: HashMap<String, VerificationKey>,
    fetched_at: Instant,
}

impl KeySet {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

#[derive(Deserialize)]
struct RawKeySet {
    #[serde(default)]
    keys: Vec<serde_json::Value>,
}

/// Signing keys fetched from the issuer's JWKS endpoint.
pub struct KeySetCache {
    http: Client,
    jwks_url: String,
    ttl: Duration,
    current: RwLock<Option<Arc<KeySet>>>,
    generation: AtomicU64,
    refresh: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetCache")
            .field("jwks_url", &self.jwks_url)
            .field("ttl", &self.ttl)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl KeySetCache {
    /// Create an empty cache for `jwks_url`.
    #[must_use]
    pub fn new(http: Client, jwks_url: String, ttl: Duration) -> Self {
        Self {
            http,
            jwks_url,
            ttl,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// How many times the set has been fetched.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn lookup(&self, kid: &str) -> (Option<VerificationKey>, bool) {
        let current = self.current.read();
        match current.as_ref() {
            Some(set) => (set.keys.get(kid).cloned(), set.is_stale(self.ttl)),
            None => (None, true),
        }
    }

    /// Resolve the signing key for `kid`, refreshing at most once.
    pub async fn key(&self, kid: &str) -> Result<VerificationKey, VerifyError> {
        let seen = self.generation();
        let (found, stale) = self.lookup(kid);
        if let (Some(key), false) = (&found, stale) {
            return Ok(key.clone());
        }

        self.refresh_since(seen).await?;
        self.lookup(kid)
            .0
            .ok_or_else(|| VerifyError::KeyNotFound(kid.to_string()))
    }

    /// Verify a compact JWS against the issuer's keys and return its payload.
    ///
    /// The header must name a `kid` and an allowed algorithm, and the key's
    /// published `alg`, when present, must agree with the header.
    pub async fn verify(&self, token: &str) -> Result<Vec<u8>, VerifyError> {
        let jws = CompactJws::parse(token)?;
        let algorithm = SigningAlgorithm::from_jwt(jws.algorithm())
            .ok_or_else(|| VerifyError::UnsupportedAlgorithm(format!("{:?}", jws.algorithm())))?;
        let kid = jws
            .key_id()
            .ok_or_else(|| VerifyError::Malformed("JWS header has no kid".to_string()))?;

        let key = self.key(kid).await?;
        if key.algorithm.is_some_and(|published| published != algorithm) {
            return Err(VerifyError::UnsupportedAlgorithm(format!(
                "{} not published for key {kid}",
                algorithm.name()
            )));
        }

        if !jws.verify(&key.key)? {
            return Err(VerifyError::SignatureInvalid);
        }
        Ok(jws.payload()?)
    }

    /// Fetch a new set unless another caller already did after `seen`.
    async fn refresh_since(&self, seen: u64) -> Result<(), VerifyError> {
        let _guard = self.refresh.lock().await;
        if self.generation() != seen {
            debug!("Key set refreshed by a concurrent caller");
            return Ok(());
        }

        let keys = self.fetch().await?;
        debug!(url = %self.jwks_url, keys = keys.len(), "Fetched issuer key set");
        *self.current.write() = Some(Arc::new(KeySet {
            keys,
            fetched_at: Instant::now(),
        }));
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn fetch(&self) -> Result<HashMap<String, VerificationKey>, VerifyError> {
        let step = ExchangeStep::Jwks;
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(network(step))?;
        if !response.status().is_success() {
            return Err(protocol_error(step, response).await);
        }
        let raw: RawKeySet = read_json(step, response).await?;
        Ok(signing_keys(raw.keys))
    }
}

/// Keep the RSA signature keys; skip anything else, including keys that
/// fail to parse.
fn signing_keys(raw: Vec<serde_json::Value>) -> HashMap<String, VerificationKey> {
    let mut keys = HashMap::new();
    for value in raw {
        let Ok(jwk) = serde_json::from_value::<JsonWebKey>(value) else {
            continue;
        };
        if !jwk.is_signing_key() {
            continue;
        }
        let algorithm = match jwk.alg.as_deref() {
            None => None,
            Some(name) => match name.parse::<Algorithm>().ok().and_then(SigningAlgorithm::from_jwt) {
                Some(alg) => Some(alg),
                None => {
                    debug!(kid = %jwk.kid, alg = name, "Skipping key with unsupported alg");
                    continue;
                }
            },
        };
        match jwk.decoding_key() {
            Ok(key) => {
                keys.insert(jwk.kid, VerificationKey { key, algorithm });
            }
            Err(e) => warn!(kid = %jwk.kid, error = %e, "Skipping unusable key"),
        }
    }
    keys
}
