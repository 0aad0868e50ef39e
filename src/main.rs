//! FAPI Auth - pushed authorization requests, signed access tokens and
//! encrypted identity tokens.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use fapi_auth::{
    cli::{Cli, Command},
    config::Config,
    issuer::{Issuer, IssuerServer},
    keys::{self, EncryptionKeyManager, KeyManagers},
    setup_tracing,
    verifier::Verifier,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Keygen { ref out }) => run_keygen(out).await,
        Some(Command::Token { ref principal }) => match load_config(&cli) {
            Some(config) => run_token(config, principal).await,
            None => ExitCode::FAILURE,
        },
        Some(Command::Serve) | None => match load_config(&cli) {
            Some(config) => run_server(config).await,
            None => ExitCode::FAILURE,
        },
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Run the authorization server
async fn run_server(config: Config) -> ExitCode {
    // RSA generation is CPU-bound
    let keys_config = config.keys.clone();
    let keys = match tokio::task::spawn_blocking(move || KeyManagers::from_config(&keys_config))
        .await
    {
        Ok(Ok(keys)) => keys,
        Ok(Err(e)) => {
            error!("Failed to initialize keys: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Key initialization task failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let issuer = Arc::new(Issuer::new(config.issuer.clone(), keys));
    if let Err(e) = IssuerServer::new(config, issuer).run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Acquire and print an access token for `principal`
async fn run_token(config: Config, principal: &str) -> ExitCode {
    let Some(path) = config.keys.encryption.private_key_path.clone() else {
        error!("keys.encryption.private_key_path is required to decrypt identity tokens");
        return ExitCode::FAILURE;
    };
    let kid = config.keys.encryption.key_id.clone();

    let decryptor = match tokio::task::spawn_blocking(move || {
        EncryptionKeyManager::from_pem_file(&path, &kid)
    })
    .await
    {
        Ok(Ok(manager)) => Arc::new(manager),
        Ok(Err(e)) => {
            error!("Failed to load encryption key: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Key loading task failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let verifier = match Verifier::new(config.verifier, decryptor) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to create verifier: {e}");
            return ExitCode::FAILURE;
        }
    };

    match verifier.get_access_token(principal).await {
        Ok(token) => {
            println!("{token}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(retryable = e.is_retryable(), "Token acquisition failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Write fresh signing and encryption keys to `out`
async fn run_keygen(out: &Path) -> ExitCode {
    if let Err(e) = std::fs::create_dir_all(out) {
        error!("Failed to create {}: {e}", out.display());
        return ExitCode::FAILURE;
    }

    for name in ["signing.pem", "encryption.pem"] {
        let path = out.join(name);
        let result = tokio::task::spawn_blocking(move || {
            let key = keys::generate_rsa()?;
            keys::write_pem(&key, &path)?;
            Ok::<_, fapi_auth::Error>(path)
        })
        .await;

        match result {
            Ok(Ok(path)) => println!("Wrote {}", path.display()),
            Ok(Err(e)) => {
                error!("Failed to write {name}: {e}");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!("Key generation task failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
