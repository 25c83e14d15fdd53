//! OAuth 2.0 types for the grant protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered OAuth client.
///
/// Immutable after registration; owned exclusively by the client registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
}

impl Client {
    /// Whether `redirect_uri` is among the client's registered URIs.
    #[must_use]
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }
}

/// A pending authorization grant, keyed by its single-use code.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub code: String,
    pub client_id: String,
    pub code_challenge: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationGrant {
    /// Check whether the grant has outlived the code TTL.
    #[must_use]
    pub fn is_expired(&self, ttl: std::time::Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.num_seconds() >= i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
    }
}

/// An issued bearer access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Lazy expiry check performed at verification time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Claims attached to a request after successful token verification.
#[derive(Debug, Clone, Serialize)]
pub struct AccessClaims {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl AccessClaims {
    /// Expiry as unix seconds, the `exp` introspection claim.
    #[must_use]
    pub fn exp(&self) -> i64 {
        self.expires_at.timestamp()
    }

    /// Scopes as a space-delimited string, the `scope` introspection claim.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Successful token-endpoint response body (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub scope: String,
}

/// Token introspection response (RFC 7662 shape).
///
/// Always a structured answer; introspection never propagates an error past
/// this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntrospectionResponse {
    /// An active response carrying the token's claims.
    #[must_use]
    pub fn active(claims: &AccessClaims) -> Self {
        Self {
            active: true,
            client_id: Some(claims.client_id.clone()),
            scope: Some(claims.scope()),
            exp: Some(claims.exp()),
            error: None,
        }
    }

    /// An inactive response with an OAuth error code.
    #[must_use]
    pub fn inactive(error: impl Into<String>) -> Self {
        Self {
            active: false,
            client_id: None,
            scope: None,
            exp: None,
            error: Some(error.into()),
        }
    }
}

/// Redirect descriptor returned by the authorize operation.
///
/// The authority never performs the HTTP redirect itself; the handler layer
/// renders this as a `302 Location`.
#[derive(Debug, Clone)]
pub struct RedirectTarget {
    pub location: url::Url,
}
