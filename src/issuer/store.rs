//! Ephemeral issuer state: pushed requests, authorization codes, revocations.
//!
//! Entries expire after a fixed TTL. Expiry is enforced lazily on every read
//! and by a background reaper; an expired entry is never returned even if the
//! reaper has not visited it yet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// A request staged by `POST /oauth2/par`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorizationRequest {
    /// Client that pushed the request.
    pub client_id: String,
    /// Requested scope.
    pub scope: String,
    /// Where the authorization code is delivered.
    pub redirect_uri: String,
    /// Principal the authorization is requested for.
    pub login_hint: Option<String>,
    /// Opaque client state echoed on the redirect.
    pub state: Option<String>,
    /// Echoed in the identity token.
    pub nonce: Option<String>,
}

/// An authorization code awaiting exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorizationCode {
    /// The pushed request the code was issued for.
    pub request_uri: String,
}

struct Entry<T> {
    value: T,
    created_at: Instant,
}

/// String-keyed store whose entries expire `ttl` after insertion.
pub struct EphemeralStore<T> {
    entries: DashMap<String, Entry<T>>,
    ttl: Duration,
}

impl<T: Clone> EphemeralStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Configured entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_live(&self, entry: &Entry<T>) -> bool {
        entry.created_at.elapsed() < self.ttl
    }

    /// Insert (or replace) an entry, starting its TTL now.
    pub fn insert(&self, key: String, value: T) {
        self.entries.insert(
            key,
            Entry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// Read an entry without removing it. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if self.is_live(&entry) {
            return Some(entry.value.clone());
        }
        drop(entry);

        // Lazy eviction: remove on access
        self.entries.remove_if(key, |_, e| !self.is_live(e));
        debug!("Lazy-evicted expired entry");
        None
    }

    /// Atomically remove and return an entry.
    ///
    /// Of any number of concurrent callers for one key at most one receives
    /// the value. An expired entry is removed but not returned.
    pub fn take(&self, key: &str) -> Option<T> {
        let (_, entry) = self.entries.remove(key)?;
        self.is_live(&entry).then_some(entry.value)
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| self.is_live(e));
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, including expired ones not yet reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Explicitly revoked access tokens, keyed by `jti`.
///
/// Each entry is kept until the token's own `exp`, after which the token is
/// dead anyway.
#[derive(Default)]
pub struct RevocationList {
    revoked: DashMap<String, u64>,
}

impl RevocationList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `jti` revoked until `exp`. Returns `false` if it already was.
    pub fn revoke(&self, jti: &str, exp: u64) -> bool {
        self.revoked.insert(jti.to_string(), exp).is_none()
    }

    /// Whether `jti` has been revoked.
    #[must_use]
    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains_key(jti)
    }

    /// Drop entries whose token expired before `now`.
    pub fn reap_expired(&self, now: u64) -> usize {
        let before = self.revoked.len();
        self.revoked.retain(|_, exp| *exp > now);
        before.saturating_sub(self.revoked.len())
    }
}

/// Anything with expiring state swept by the background reaper.
pub trait Reap: Send + Sync + 'static {
    /// Remove expired state. Returns the number of entries removed.
    fn reap_expired(&self) -> usize;
}

/// Spawn a background task that reaps expired state every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper<R: Reap>(
    target: Arc<R>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = target.reap_expired();
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired issuer state");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Reaper shutting down");
                    break;
                }
            }
        }
    })
}
