//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::keys::SigningAlgorithm;
use crate::{Error, Result};

/// Upper bound on the advertised lifetime of a pushed authorization request.
pub const MAX_REQUEST_URI_TTL: Duration = Duration::from_secs(90);

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Signing and encryption keys
    pub keys: KeysConfig,
    /// Authorization server (issuer) configuration
    pub issuer: IssuerConfig,
    /// Token consumer (verifier) configuration
    pub verifier: VerifierConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `FAPI_AUTH_` prefix with `__` as the
    /// nesting separator, e.g. `FAPI_AUTH_ISSUER__CODE_TTL=30s`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("FAPI_AUTH_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files must be loaded before ${VAR} expansion
        config.load_env_files();
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in secrets
    fn expand_env_vars(&mut self) {
        let re = env_var_pattern();

        for client in &mut self.issuer.clients {
            if let Some(secret) = client.client_secret.as_mut() {
                *secret = expand_string(re, secret);
            }
        }

        let revocation = &mut self.verifier.revocation;
        if let Some(secret) = revocation.client_secret.as_mut() {
            *secret = expand_string(re, secret);
        }
    }

    /// Reject configurations that cannot work at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        parse_url("issuer.issuer", &self.issuer.issuer)?;
        parse_url("verifier.issuer_url", &self.verifier.issuer_url)?;
        if let Some(url) = &self.verifier.revocation.introspection_url {
            parse_url("verifier.revocation.introspection_url", url)?;
        }

        for (name, ttl) in [
            ("issuer.request_uri_ttl", self.issuer.request_uri_ttl),
            ("issuer.code_ttl", self.issuer.code_ttl),
            ("issuer.access_token_ttl", self.issuer.access_token_ttl),
            ("issuer.id_token_ttl", self.issuer.id_token_ttl),
            ("issuer.reaper_interval", self.issuer.reaper_interval),
        ] {
            if ttl.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        let request_uri_ttl = self.issuer.request_uri_ttl;
        if request_uri_ttl < Duration::from_secs(1) || request_uri_ttl > MAX_REQUEST_URI_TTL {
            return Err(Error::Config(format!(
                "issuer.request_uri_ttl must be between 1s and {}s",
                MAX_REQUEST_URI_TTL.as_secs()
            )));
        }

        for client in &self.issuer.clients {
            if client.client_id.is_empty() {
                return Err(Error::Config(
                    "issuer.clients: client_id must not be empty".to_string(),
                ));
            }
            for uri in &client.redirect_uris {
                parse_url("issuer.clients.redirect_uris", uri)?;
            }
        }

        Ok(())
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::Config(format!("{field}: invalid URL {value:?}: {e}")))
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
        _ => path.to_string(),
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    // Pattern: ${VAR} or ${VAR:-default}
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("static pattern")
    })
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024,
        }
    }
}

/// Key material configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// JWS signing key
    pub signing: SigningKeyConfig,
    /// JWE encryption key
    pub encryption: EncryptionKeyConfig,
}

/// Signing key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningKeyConfig {
    /// Key ID published in the JWKS and placed in JWS headers
    pub key_id: String,
    /// Signature algorithm (RS256 or PS256)
    pub algorithm: SigningAlgorithm,
    /// PKCS#8 PEM file; a fresh key is generated when unset
    pub private_key_path: Option<PathBuf>,
}

impl Default for SigningKeyConfig {
    fn default() -> Self {
        Self {
            key_id: "fapi-sig-1".to_string(),
            algorithm: SigningAlgorithm::PS256,
            private_key_path: None,
        }
    }
}

/// Encryption key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionKeyConfig {
    /// Key ID published in the JWKS and placed in JWE headers
    pub key_id: String,
    /// PKCS#8 PEM file; a fresh key is generated when unset
    pub private_key_path: Option<PathBuf>,
}

impl Default for EncryptionKeyConfig {
    fn default() -> Self {
        Self {
            key_id: "fapi-enc-1".to_string(),
            private_key_path: None,
        }
    }
}

/// Authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Issuer identifier; also the base URL advertised in discovery
    pub issuer: String,
    /// Lifetime of a pushed authorization request
    #[serde(with = "humantime_serde")]
    pub request_uri_ttl: Duration,
    /// Lifetime of an authorization code
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,
    /// Lifetime of an access token
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,
    /// Lifetime of an identity token
    #[serde(with = "humantime_serde")]
    pub id_token_ttl: Duration,
    /// How often expired requests, codes and revocations are swept
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
    /// Registered clients. Empty accepts any client.
    pub clients: Vec<ClientConfig>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            issuer: "http://127.0.0.1:8080".to_string(),
            request_uri_ttl: MAX_REQUEST_URI_TTL,
            code_ttl: Duration::from_secs(60),
            access_token_ttl: Duration::from_secs(3600),
            id_token_ttl: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(30),
            clients: Vec::new(),
        }
    }
}

impl IssuerConfig {
    /// Look up a registered client
    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }
}

/// A registered OAuth2 client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier
    pub client_id: String,
    /// Secret for introspection/revocation (supports ${VAR} expansion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Allowed redirect URIs (exact match)
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Token consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Base URL of the issuer's endpoints
    pub issuer_url: String,
    /// Expected `iss` claim; defaults to `issuer_url`
    pub expected_issuer: Option<String>,
    /// Client ID presented to the issuer
    pub client_id: String,
    /// Redirect URI registered for this client
    pub redirect_uri: String,
    /// Scope requested in the pushed authorization request
    pub scope: String,
    /// Upper bound on how long an access token is reused
    #[serde(with = "humantime_serde")]
    pub token_cache_ttl: Duration,
    /// How long a fetched key set is trusted
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// TCP connect timeout for issuer calls
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Read timeout for issuer calls
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Allowed clock skew when checking `exp`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Bearer-token revocation checks
    pub revocation: RevocationConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            issuer_url: "http://127.0.0.1:8080".to_string(),
            expected_issuer: None,
            client_id: "portfolio-api".to_string(),
            redirect_uri: "https://example.com/callback".to_string(),
            scope: "investments:read".to_string(),
            token_cache_ttl: Duration::from_secs(50 * 60),
            jwks_cache_ttl: Duration::from_secs(24 * 60 * 60),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            clock_skew: Duration::from_secs(60),
            revocation: RevocationConfig::default(),
        }
    }
}

impl VerifierConfig {
    /// Issuer the tokens must name
    #[must_use]
    pub fn expected_issuer(&self) -> &str {
        self.expected_issuer.as_deref().unwrap_or(&self.issuer_url)
    }

    /// Absolute URL of an issuer endpoint
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.issuer_url.trim_end_matches('/'))
    }
}

/// Introspection-based revocation check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Whether bearer tokens are introspected at all
    pub enabled: bool,
    /// Introspection endpoint; defaults to `{issuer_url}/oauth2/introspect`
    pub introspection_url: Option<String>,
    /// Basic-auth client ID; defaults to the verifier's client ID
    pub client_id: Option<String>,
    /// Basic-auth client secret (supports ${VAR} expansion)
    pub client_secret: Option<String>,
    /// Accept tokens when introspection is unavailable
    pub fail_open: bool,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            introspection_url: None,
            client_id: None,
            client_secret: None,
            fail_open: true,
        }
    }
}

/// Human-readable duration (de)serialization
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() > 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "100ms", "90s", "50m", "24h")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            return number(ms).map(Duration::from_millis);
        }
        let (digits, unit) = if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            // Assume seconds
            (s, 1)
        };

        number(digits)?
            .checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {s}"))
    }

    fn number(digits: &str) -> Result<u64, String> {
        digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {digits:?}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn from_yaml(yaml: &str) -> Config {
        Figment::new().merge(Yaml::string(yaml)).extract().unwrap()
    }

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.issuer.request_uri_ttl, Duration::from_secs(90));
        assert_eq!(config.issuer.code_ttl, Duration::from_secs(60));
        assert_eq!(config.issuer.access_token_ttl, Duration::from_secs(3600));
        assert_eq!(config.keys.signing.algorithm, SigningAlgorithm::PS256);
        assert_eq!(config.keys.signing.key_id, "fapi-sig-1");
        assert_eq!(config.keys.encryption.key_id, "fapi-enc-1");
        assert!(config.verifier.revocation.fail_open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides_and_durations() {
        // GIVEN: a partial YAML document
        let config = from_yaml(
            r#"
server:
  port: 9443
keys:
  signing:
    algorithm: RS256
issuer:
  issuer: "https://auth.example.com"
  code_ttl: 30s
  access_token_ttl: 1h
  clients:
    - client_id: portfolio-api
      redirect_uris: ["https://example.com/callback"]
verifier:
  token_cache_ttl: 50m
  connect_timeout: 500ms
  revocation:
    fail_open: false
"#,
        );

        // THEN: set fields are applied and the rest keep defaults
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.keys.signing.algorithm, SigningAlgorithm::RS256);
        assert_eq!(config.issuer.code_ttl, Duration::from_secs(30));
        assert_eq!(config.issuer.access_token_ttl, Duration::from_secs(3600));
        assert_eq!(config.issuer.request_uri_ttl, Duration::from_secs(90));
        assert_eq!(config.verifier.token_cache_ttl, Duration::from_secs(3000));
        assert_eq!(config.verifier.connect_timeout, Duration::from_millis(500));
        assert!(!config.verifier.revocation.fail_open);
        assert!(config.issuer.client("portfolio-api").is_some());
        assert!(config.issuer.client("other").is_none());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/fapi-auth.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "issuer:\n  reaper_interval: 5s\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.issuer.reaper_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_issuer_url() {
        let mut config = Config::default();
        config.issuer.issuer = "not a url".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = Config::default();
        config.issuer.code_ttl = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("issuer.code_ttl"));
    }

    #[test]
    fn test_validate_bounds_request_uri_ttl() {
        // GIVEN: lifetimes that would advertise expires_in of 0 or above 90
        for ttl in [
            Duration::from_millis(500),
            Duration::from_secs(91),
            Duration::from_secs(600),
        ] {
            let mut config = Config::default();
            config.issuer.request_uri_ttl = ttl;

            // THEN: validation names the field
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("issuer.request_uri_ttl"), "{ttl:?}");
        }

        // AND: both ends of the range are accepted
        for ttl in [Duration::from_secs(1), MAX_REQUEST_URI_TTL] {
            let mut config = Config::default();
            config.issuer.request_uri_ttl = ttl;
            assert!(config.validate().is_ok(), "{ttl:?}");
        }
    }

    #[test]
    fn test_expected_issuer_defaults_to_issuer_url() {
        let mut verifier = VerifierConfig::default();
        assert_eq!(verifier.expected_issuer(), "http://127.0.0.1:8080");
        verifier.expected_issuer = Some("https://iss".to_string());
        assert_eq!(verifier.expected_issuer(), "https://iss");
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let verifier = VerifierConfig {
            issuer_url: "https://auth.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            verifier.endpoint("/oauth2/par"),
            "https://auth.example.com/oauth2/par"
        );
    }

    #[test]
    fn test_expand_string_with_default() {
        let re = env_var_pattern();
        assert_eq!(
            expand_string(re, "${FAPI_AUTH_TEST_UNSET_VAR:-fallback}"),
            "fallback"
        );
        assert_eq!(expand_string(re, "plain"), "plain");
    }

    #[test]
    fn test_load_env_files_feeds_secret_expansion() {
        // GIVEN: an env file defining a client secret
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "FAPI_AUTH_TEST_CLIENT_SECRET=s3cret").unwrap();
        drop(f);

        let mut config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.issuer.clients.push(ClientConfig {
            client_id: "portfolio-api".to_string(),
            client_secret: Some("${FAPI_AUTH_TEST_CLIENT_SECRET}".to_string()),
            redirect_uris: vec![],
        });

        // WHEN: env files are loaded and secrets expanded
        config.load_env_files();
        config.expand_env_vars();

        // THEN: the secret is resolved
        assert_eq!(config.issuer.clients[0].client_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_duration_parsing() {
        use humantime_serde::parse;
        assert_eq!(parse("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse("50m").unwrap(), Duration::from_secs(3000));
        assert_eq!(parse("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse("7").unwrap(), Duration::from_secs(7));
        assert!(parse("soon").is_err());
    }

    #[test]
    fn test_humantime_parse_rejects_overflow() {
        use humantime_serde::parse;
        let err = parse(&format!("{}h", u64::MAX)).unwrap_err();
        assert!(err.contains("out of range"));
        assert!(parse(&format!("{}m", u64::MAX / 60 + 1)).is_err());
        assert_eq!(
            parse(&format!("{}s", u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }
}
