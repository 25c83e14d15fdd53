//! Configuration for the MCP OAuth server.

use std::time::Duration;

/// Protocol and lifetime constants.
pub mod defaults {
    use std::time::Duration;

    /// Default MCP resource server port.
    pub const MCP_PORT: u16 = 3090;

    /// Default authorization server port.
    pub const AUTH_PORT: u16 = 3091;

    /// Access token lifetime: 1 hour, fixed.
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Authorization code lifetime: 10 minutes, checked lazily at exchange.
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(600);

    /// Bound on each transport close during bulk shutdown.
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Timeout for remote introspection round trips.
    pub const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Scope advertised in server metadata.
    pub const SUPPORTED_SCOPE: &str = "mcp:tools";
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the MCP resource server.
    pub mcp_port: u16,

    /// Port for the embedded authorization server.
    pub auth_port: u16,

    /// Public base URL of the MCP server (issuer of protected-resource metadata).
    pub mcp_base_url: String,

    /// Public base URL of the authorization server (OAuth issuer).
    pub auth_base_url: String,

    /// Introspection endpoint of an external authorization server.
    ///
    /// When set, bearer tokens on `/mcp` are verified by a network round trip
    /// instead of the in-process token store (split-process variant).
    pub introspection_url: Option<String>,

    /// Access token lifetime.
    pub access_token_ttl: Duration,

    /// Authorization code lifetime.
    pub auth_code_ttl: Duration,

    /// Per-entry bound for bulk transport shutdown.
    pub close_timeout: Duration,
}

impl Config {
    /// Create a configuration from ports, deriving localhost base URLs.
    #[must_use]
    pub fn new(mcp_port: u16, auth_port: u16, introspection_url: Option<String>) -> Self {
        Self {
            mcp_port,
            auth_port,
            mcp_base_url: format!("http://localhost:{mcp_port}"),
            auth_base_url: format!("http://localhost:{auth_port}"),
            introspection_url,
            access_token_ttl: defaults::ACCESS_TOKEN_TTL,
            auth_code_ttl: defaults::AUTH_CODE_TTL,
            close_timeout: defaults::CLOSE_TIMEOUT,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a port variable is present but not a number.
    pub fn from_env() -> anyhow::Result<Self> {
        let mcp_port = match std::env::var("MCP_PORT") {
            Ok(v) => v.parse()?,
            Err(_) => defaults::MCP_PORT,
        };
        let auth_port = match std::env::var("OAUTH_PORT") {
            Ok(v) => v.parse()?,
            Err(_) => defaults::AUTH_PORT,
        };
        let introspection_url = std::env::var("OAUTH_INTROSPECTION_URL").ok();
        Ok(Self::new(mcp_port, auth_port, introspection_url))
    }

    /// Test configuration with short lifetimes.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(60),
            auth_code_ttl: Duration::from_secs(60),
            close_timeout: Duration::from_millis(100),
            ..Self::new(0, 0, None)
        }
    }

    /// Whether token verification goes through a remote introspection endpoint.
    #[must_use]
    pub const fn is_split_process(&self) -> bool {
        self.introspection_url.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(defaults::MCP_PORT, defaults::AUTH_PORT, None)
    }
}
