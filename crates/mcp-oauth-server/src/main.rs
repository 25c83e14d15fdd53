//! MCP OAuth Server - Entry Point
//!
//! Runs the MCP streamable HTTP server and the OAuth authorization server
//! on separate ports.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_oauth_server::{config::Config, server::McpServer};

#[derive(Parser, Debug)]
#[command(name = "mcp-oauth-server")]
#[command(about = "MCP streamable HTTP server with an embedded OAuth 2.0 authorization server")]
#[command(version)]
struct Cli {
    /// MCP resource server port
    #[arg(long, default_value = "3090", env = "MCP_PORT")]
    mcp_port: u16,

    /// OAuth authorization server port
    #[arg(long, default_value = "3091", env = "OAUTH_PORT")]
    auth_port: u16,

    /// Introspection endpoint of an external authorization server.
    /// When set, bearer tokens are verified over the network instead of
    /// against the in-process token store.
    #[arg(long, env = "OAUTH_INTROSPECTION_URL")]
    introspection_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mcp_port = cli.mcp_port,
        auth_port = cli.auth_port,
        split_process = cli.introspection_url.is_some(),
        "Starting MCP OAuth server"
    );

    let config = Config::new(cli.mcp_port, cli.auth_port, cli.introspection_url);
    McpServer::new(config).run().await
}
