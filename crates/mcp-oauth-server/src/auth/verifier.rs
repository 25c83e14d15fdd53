//! Bearer token verification for the resource server.
//!
//! The MCP router does not care where tokens are validated: in the single
//! process layout the verifier wraps the in-process authority, in the
//! split-process layout it performs a network round trip to the
//! authorization server's introspection endpoint. Either way, any failure
//! surfaces as `InvalidToken`, never a crash.

use async_trait::async_trait;

use crate::config::defaults;
use crate::error::{AuthError, AuthResult};

use super::authority::AuthorizationAuthority;
use super::types::{AccessClaims, IntrospectionResponse};

/// Validates a bearer token and produces the claims to attach to a request.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> AuthResult<AccessClaims>;
}

/// Verifies tokens against the in-process token store.
pub struct LocalVerifier {
    authority: AuthorizationAuthority,
}

impl LocalVerifier {
    #[must_use]
    pub const fn new(authority: AuthorizationAuthority) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl TokenVerifier for LocalVerifier {
    async fn verify(&self, token: &str) -> AuthResult<AccessClaims> {
        self.authority.verify_access_token(token).await
    }
}

/// Verifies tokens by posting to a remote introspection endpoint.
///
/// Network errors, timeouts, non-2xx statuses, and inactive answers all map
/// to `InvalidToken`.
pub struct RemoteVerifier {
    client: reqwest::Client,
    introspection_url: String,
}

impl RemoteVerifier {
    /// Build a verifier for the given introspection endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be constructed.
    pub fn new(introspection_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(defaults::INTROSPECTION_TIMEOUT)
            .build()?;
        Ok(Self { client, introspection_url: introspection_url.into() })
    }
}

#[async_trait]
impl TokenVerifier for RemoteVerifier {
    async fn verify(&self, token: &str) -> AuthResult<AccessClaims> {
        let response = self
            .client
            .post(&self.introspection_url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Introspection request failed");
                AuthError::InvalidToken
            })?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Introspection endpoint rejected request");
            return Err(AuthError::InvalidToken);
        }

        let body: IntrospectionResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "Malformed introspection response");
            AuthError::InvalidToken
        })?;

        if !body.active {
            return Err(AuthError::InvalidToken);
        }

        let expires_at = body
            .exp
            .and_then(|exp| chrono::DateTime::from_timestamp(exp, 0))
            .ok_or(AuthError::InvalidToken)?;

        Ok(AccessClaims {
            client_id: body.client_id.unwrap_or_default(),
            scopes: body
                .scope
                .map(|s| s.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            expires_at,
        })
    }
}
