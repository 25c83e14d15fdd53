//! MCP OAuth Server
//!
//! A Model Context Protocol (MCP) streamable HTTP server with an embedded
//! OAuth 2.0 authorization server. The authorization side issues single-use,
//! PKCE-bound authorization codes and exchanges them for bearer access
//! tokens; the resource side verifies those tokens (in-process or via remote
//! introspection) and multiplexes client sessions onto owned transports
//! identified by an `mcp-session-id` header.
//!
//! # Features
//!
//! - **Authorization code grant**: PKCE S256, dynamic client registration,
//!   token introspection; refresh tokens deliberately unsupported
//! - **Session transports**: server-generated session ids, SSE event
//!   mailboxes with `Last-Event-ID` replay, best-effort bulk shutdown
//! - **Split-process mode**: the resource server can verify tokens against
//!   an external authorization server's introspection endpoint
//!
//! All state is in-memory and process-lifetime: this is a demo authority,
//! not a production one.
//!
//! # Example
//!
//! ```no_run
//! use mcp_oauth_server::{config::Config, server::McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     McpServer::new(config).run().await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod server;

pub use auth::AuthorizationAuthority;
pub use config::Config;
pub use error::{AuthError, CloseFailure};
pub use server::McpServer;
