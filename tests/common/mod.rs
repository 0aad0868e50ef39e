//! Shared fixtures: process-wide test keys and an in-process issuer.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{extract::Request, middleware::Next};
use dashmap::DashMap;
use fapi_auth::config::{ClientConfig, IssuerConfig, VerifierConfig};
use fapi_auth::issuer::{Issuer, server::create_router};
use fapi_auth::keys::{EncryptionKeyManager, KeyManagers, SigningAlgorithm, SigningKeyManager};
use fapi_auth::verifier::Verifier;
use tokio::net::TcpListener;

pub const CLIENT_ID: &str = "portfolio-api";
pub const CLIENT_SECRET: &str = "portfolio-secret";
pub const REDIRECT_URI: &str = "https://example.com/callback";
pub const SCOPE: &str = "investments:read";

/// RSA generation is slow; every test in a binary shares one key pair set.
pub fn keys() -> KeyManagers {
    static KEYS: OnceLock<KeyManagers> = OnceLock::new();
    KEYS.get_or_init(|| KeyManagers {
        signing: Arc::new(
            SigningKeyManager::generate("test-sig", SigningAlgorithm::PS256).unwrap(),
        ),
        encryption: Arc::new(EncryptionKeyManager::generate("test-enc").unwrap()),
    })
    .clone()
}

/// Issuer config with `portfolio-api` registered.
pub fn issuer_config() -> IssuerConfig {
    IssuerConfig {
        clients: vec![ClientConfig {
            client_id: CLIENT_ID.to_string(),
            client_secret: Some(CLIENT_SECRET.to_string()),
            redirect_uris: vec![REDIRECT_URI.to_string()],
        }],
        ..IssuerConfig::default()
    }
}

/// An issuer serving on an ephemeral localhost port.
pub struct TestIssuer {
    pub base_url: String,
    pub issuer: Arc<Issuer>,
    hits: Arc<DashMap<String, usize>>,
}

impl TestIssuer {
    /// How many requests reached `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.get(path).map_or(0, |n| *n)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Verifier config pointing at this issuer.
    pub fn verifier_config(&self) -> VerifierConfig {
        let mut config = VerifierConfig {
            issuer_url: self.base_url.clone(),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            ..VerifierConfig::default()
        };
        config.revocation.client_secret = Some(CLIENT_SECRET.to_string());
        config
    }

    pub fn verifier(&self) -> Verifier {
        self.verifier_with(self.verifier_config())
    }

    pub fn verifier_with(&self, config: VerifierConfig) -> Verifier {
        Verifier::new(config, Arc::clone(&keys().encryption)).unwrap()
    }
}

/// Start an issuer; `config.issuer` is replaced with the bound address.
pub async fn spawn_issuer(config: IssuerConfig) -> TestIssuer {
    spawn_issuer_stalling(config, "", Duration::ZERO).await
}

/// Start an issuer whose first request to `path` is held for `stall`
/// before being served.
pub async fn spawn_issuer_stalling(
    mut config: IssuerConfig,
    path: &'static str,
    stall: Duration,
) -> TestIssuer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    config.issuer.clone_from(&base_url);

    let issuer = Arc::new(Issuer::new(config, keys()));
    let hits: Arc<DashMap<String, usize>> = Arc::new(DashMap::new());
    let counter = Arc::clone(&hits);
    let app = create_router(Arc::clone(&issuer), 64 * 1024).layer(axum::middleware::from_fn(
        move |request: Request, next: Next| {
            let seen = {
                let mut n = counter.entry(request.uri().path().to_string()).or_insert(0);
                *n += 1;
                *n
            };
            let hold = request.uri().path() == path && seen == 1;
            async move {
                if hold {
                    tokio::time::sleep(stall).await;
                }
                next.run(request).await
            }
        },
    ));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestIssuer {
        base_url,
        issuer,
        hits,
    }
}

/// Counts invocations; handy inside handler closures.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
