//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// FAPI-style authorization server with PAR, signed and encrypted tokens
#[derive(Parser, Debug)]
#[command(name = "fapi-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FAPI_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "FAPI_AUTH_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "FAPI_AUTH_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FAPI_AUTH_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FAPI_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the authorization server (default)
    Serve,

    /// Acquire an access token from the configured issuer and print it
    Token {
        /// Principal the token is requested for (sent as `login_hint`)
        #[arg(long)]
        principal: String,
    },

    /// Generate signing and encryption keys as PKCS#8 PEM files
    Keygen {
        /// Directory to write `signing.pem` and `encryption.pem` into
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["fapi-auth", "--port", "9000"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn token_requires_principal() {
        assert!(Cli::try_parse_from(["fapi-auth", "token"]).is_err());

        let cli = Cli::try_parse_from(["fapi-auth", "token", "--principal", "alice"]).unwrap();
        match cli.command {
            Some(Command::Token { principal }) => assert_eq!(principal, "alice"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli =
            Cli::try_parse_from(["fapi-auth", "keygen", "--out", "/tmp/k", "--log-format", "json"])
                .unwrap();
        assert_eq!(cli.log_format.as_deref(), Some("json"));
        assert!(matches!(cli.command, Some(Command::Keygen { .. })));
    }
}
