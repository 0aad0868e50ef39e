//! Issuer HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use super::{Issuer, handler, store};
use crate::config::Config;
use crate::{Error, Result};

/// Build the issuer application with its standard middleware stack.
pub fn create_router(issuer: Arc<Issuer>, max_body_size: usize) -> Router {
    handler::routes(issuer)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Authorization server
pub struct IssuerServer {
    config: Config,
    issuer: Arc<Issuer>,
}

impl IssuerServer {
    /// Create a server around an issuer built from the same configuration
    #[must_use]
    pub fn new(config: Config, issuer: Arc<Issuer>) -> Self {
        Self { config, issuer }
    }

    /// Run until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        self.serve(listener, shutdown_signal(shutdown_tx.clone()), shutdown_tx)
            .await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    ///
    /// `shutdown_tx` is fired once the listener stops so background tasks
    /// (the reaper) exit too.
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        shutdown: F,
        shutdown_tx: tokio::sync::broadcast::Sender<()>,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let issuer_cfg = self.issuer.config();
        let local_addr = listener.local_addr()?;

        info!("============================================================");
        info!("FAPI AUTH v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(addr = %local_addr, "Listening");
        info!(issuer = %issuer_cfg.issuer, "Issuer");
        info!(
            request_uri_ttl = ?issuer_cfg.request_uri_ttl,
            code_ttl = ?issuer_cfg.code_ttl,
            access_token_ttl = ?issuer_cfg.access_token_ttl,
            "Lifetimes"
        );
        if issuer_cfg.clients.is_empty() {
            info!("No registered clients: any client_id is accepted");
        } else {
            info!(clients = issuer_cfg.clients.len(), "Registered clients");
        }
        info!("============================================================");

        let reaper = store::spawn_reaper(
            Arc::clone(&self.issuer),
            issuer_cfg.reaper_interval,
            shutdown_tx.subscribe(),
        );

        let app = create_router(Arc::clone(&self.issuer), self.config.server.max_body_size);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let _ = shutdown_tx.send(());
        if tokio::time::timeout(self.config.server.shutdown_timeout, reaper)
            .await
            .is_err()
        {
            tracing::warn!("Reaper did not stop within shutdown timeout");
        }

        info!("Issuer stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
