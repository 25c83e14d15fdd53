//! Server assembly: the authorization listener, the MCP resource listener,
//! and graceful shutdown with a best-effort session sweep.
//!
//! The authorization server runs on its own port to keep the OAuth
//! authority separable from the resource server; with
//! `--introspection-url` the resource server instead verifies tokens
//! against an external authority over the network.

pub mod session;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::auth::{
    AuthState, AuthorizationAuthority, LocalVerifier, RemoteVerifier, TokenVerifier, auth_router,
};
use crate::config::Config;

use session::SessionRegistry;
use transport::{McpState, mcp_router};

/// The combined MCP + OAuth server.
pub struct McpServer {
    config: Config,
    authority: AuthorizationAuthority,
}

impl McpServer {
    /// Build the server: fresh authority, fresh stores.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let authority = AuthorizationAuthority::new(&config);
        Self { config, authority }
    }

    /// The authority backing this server (for pre-registering clients).
    #[must_use]
    pub const fn authority(&self) -> &AuthorizationAuthority {
        &self.authority
    }

    /// Run both listeners until ctrl-c, sweeping the session registry as
    /// part of shutdown.
    ///
    /// # Errors
    ///
    /// Returns error when a listening port cannot be bound; bind failure is
    /// the one fatal startup condition.
    pub async fn run(self) -> anyhow::Result<()> {
        let verifier: Arc<dyn TokenVerifier> = match self.config.introspection_url {
            Some(ref url) => {
                tracing::info!(introspection_url = %url, "Using remote token verification");
                Arc::new(RemoteVerifier::new(url.clone())?)
            }
            None => Arc::new(LocalVerifier::new(self.authority.clone())),
        };

        let auth_state = Arc::new(AuthState {
            authority: self.authority.clone(),
            base_url: self.config.auth_base_url.clone(),
        });

        let mcp_state = Arc::new(McpState {
            sessions: SessionRegistry::new(),
            verifier,
            base_url: self.config.mcp_base_url.clone(),
            auth_base_url: self.config.auth_base_url.clone(),
        });

        let auth_addr = SocketAddr::from(([0, 0, 0, 0], self.config.auth_port));
        let mcp_addr = SocketAddr::from(([0, 0, 0, 0], self.config.mcp_port));

        let auth_listener = TcpListener::bind(auth_addr).await?;
        let mcp_listener = TcpListener::bind(mcp_addr).await?;

        tracing::info!(addr = %auth_addr, "OAuth authorization server listening");
        tracing::info!(addr = %mcp_addr, "MCP streamable HTTP server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(());
        });

        serve_with_shutdown(
            auth_listener,
            mcp_listener,
            auth_state,
            mcp_state,
            self.config.close_timeout,
            shutdown_rx,
        )
        .await
    }
}

/// Drive both listeners until the shutdown signal fires, then drain.
///
/// The session sweep runs concurrently with the connection drain: open SSE
/// bodies only complete once their transports are dropped, so sweeping after
/// the drain would deadlock against any connected stream. Dropping the
/// transports ends their broadcast streams, the SSE bodies finish, and the
/// drain can complete.
pub async fn serve_with_shutdown(
    auth_listener: TcpListener,
    mcp_listener: TcpListener,
    auth_state: Arc<AuthState>,
    mcp_state: Arc<McpState>,
    close_timeout: Duration,
    shutdown_rx: watch::Receiver<()>,
) -> anyhow::Result<()> {
    let mut auth_shutdown = shutdown_rx.clone();
    let mut mcp_shutdown = shutdown_rx.clone();

    let auth_serve = axum::serve(auth_listener, auth_router(auth_state))
        .with_graceful_shutdown(async move {
            let _ = auth_shutdown.changed().await;
        });
    let mcp_serve = axum::serve(mcp_listener, mcp_router(Arc::clone(&mcp_state)))
        .with_graceful_shutdown(async move {
            let _ = mcp_shutdown.changed().await;
        });

    let sweep_state = Arc::clone(&mcp_state);
    let mut sweep_shutdown = shutdown_rx;
    let sweep = tokio::spawn(async move {
        let _ = sweep_shutdown.changed().await;
        sweep_state.sessions.close_all(close_timeout).await
    });

    tokio::try_join!(auth_serve, mcp_serve)?;

    let failures = sweep.await?;
    if failures.is_empty() {
        tracing::info!("Server shutdown complete");
    } else {
        tracing::warn!(failed = failures.len(), "Shutdown complete with transport close failures");
    }

    Ok(())
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("mcp_port", &self.config.mcp_port)
            .field("auth_port", &self.config.auth_port)
            .finish()
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("Received shutdown signal");
}
