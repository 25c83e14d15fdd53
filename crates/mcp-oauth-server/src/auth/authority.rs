//! The authorization authority: orchestrates the three-step grant protocol.
//!
//! authorize -> exchange -> verify/introspect. The authority owns the client
//! registry, the grant store, and the token store; one instance is
//! constructed at process start and shared by every request task.

use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::error::{AuthError, AuthResult};

use super::clients::ClientRegistry;
use super::grants::GrantStore;
use super::tokens::TokenStore;
use super::types::{
    AccessClaims, AccessToken, AuthorizationGrant, Client, IntrospectionResponse, RedirectTarget,
    TokenResponse,
};

/// Parameters of an accepted authorize request.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
}

/// In-process OAuth 2.0 authorization-code-grant authority.
///
/// Demo-grade by design: state is process-lifetime and in-memory, refresh
/// tokens are unsupported, and stored secrets are not encrypted.
#[derive(Clone, Debug)]
pub struct AuthorizationAuthority {
    clients: ClientRegistry,
    grants: GrantStore,
    tokens: TokenStore,
    access_token_ttl: Duration,
    auth_code_ttl: Duration,
}

impl AuthorizationAuthority {
    /// Build an authority with fresh stores.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            clients: ClientRegistry::new(),
            grants: GrantStore::new(),
            tokens: TokenStore::new(),
            access_token_ttl: config.access_token_ttl,
            auth_code_ttl: config.auth_code_ttl,
        }
    }

    /// The client registry backing this authority.
    #[must_use]
    pub const fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Generate a 256-bit opaque credential from two UUIDs.
    fn generate_token() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Accept an authorize request: mint a code, store a pending grant, and
    /// return the redirect target.
    ///
    /// The supplied `redirect_uri` must be registered for the client; this is
    /// validated before any redirect is issued, so failures never leak a
    /// redirect to an unverified URI.
    ///
    /// # Errors
    ///
    /// `InvalidClient` for an unknown client id or an unregistered
    /// redirect URI.
    pub async fn authorize(
        &self,
        client_id: &str,
        request: AuthorizeRequest,
    ) -> AuthResult<RedirectTarget> {
        let client = self
            .clients
            .lookup(client_id)
            .await
            .ok_or_else(|| AuthError::invalid_client(format!("unknown client: {client_id}")))?;

        if !client.allows_redirect(&request.redirect_uri) {
            return Err(AuthError::invalid_client(format!(
                "redirect_uri not registered for client {client_id}"
            )));
        }

        let code = Self::generate_token();
        let mut location = url::Url::parse(&request.redirect_uri)
            .map_err(|e| AuthError::invalid_client(format!("malformed redirect_uri: {e}")))?;
        {
            let mut query = location.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(ref state) = request.state {
                query.append_pair("state", state);
            }
        }

        self.grants
            .insert(AuthorizationGrant {
                code,
                client_id: client.client_id.clone(),
                code_challenge: request.code_challenge,
                scopes: request.scopes,
                state: request.state,
                created_at: Utc::now(),
            })
            .await;

        tracing::info!(client_id = %client.client_id, "Issued authorization code");

        Ok(RedirectTarget { location })
    }

    /// Expose the PKCE challenge stored with a pending code.
    ///
    /// The cryptographic comparison against the presented verifier happens at
    /// the calling layer; this is a read that does not consume the code.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` when the code is unknown or already consumed.
    pub async fn challenge_for_code(&self, code: &str) -> AuthResult<String> {
        self.grants.challenge(code).await.ok_or(AuthError::InvalidGrant)
    }

    /// Exchange an authorization code for an access token.
    ///
    /// The grant is consumed atomically, so a code is redeemable exactly
    /// once: concurrent exchanges see one success and the rest fail with
    /// `InvalidGrant`. A mismatched client also consumes the code, so a code
    /// observed by the wrong party cannot be replayed afterwards.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for an unknown, consumed, expired, or challenge-less
    /// code; `ClientMismatch` when the grant was issued to a different
    /// client.
    pub async fn exchange_code(&self, client: &Client, code: &str) -> AuthResult<TokenResponse> {
        let grant = self.grants.consume(code).await.ok_or(AuthError::InvalidGrant)?;

        if grant.is_expired(self.auth_code_ttl) {
            return Err(AuthError::InvalidGrant);
        }
        if grant.client_id != client.client_id {
            tracing::warn!(
                grant_client = %grant.client_id,
                presenting_client = %client.client_id,
                "Authorization code presented by a different client"
            );
            return Err(AuthError::ClientMismatch);
        }
        // A grant without a recorded challenge must never be exchangeable.
        if grant.code_challenge.is_empty() {
            return Err(AuthError::InvalidGrant);
        }

        let token = Self::generate_token();
        let issued_at = Utc::now();
        let expires_at = issued_at
            + chrono::Duration::from_std(self.access_token_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        self.tokens
            .insert(AccessToken {
                token: token.clone(),
                client_id: grant.client_id.clone(),
                scopes: grant.scopes.clone(),
                issued_at,
                expires_at,
            })
            .await;

        tracing::info!(client_id = %grant.client_id, "Issued access token");

        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer".into(),
            expires_in: self.access_token_ttl.as_secs(),
            scope: grant.scopes.join(" "),
        })
    }

    /// Refresh-token exchange. Unsupported by this authority, by design.
    ///
    /// # Errors
    ///
    /// Always `NotImplemented`, regardless of input.
    pub fn exchange_refresh_token(
        &self,
        _client: &Client,
        _refresh_token: &str,
    ) -> AuthResult<TokenResponse> {
        Err(AuthError::NotImplemented)
    }

    /// Validate a bearer token and return its claims. Read-only.
    ///
    /// Expired tokens are indistinguishable from unknown ones: lazy expiry,
    /// no proactive sweep.
    ///
    /// # Errors
    ///
    /// `InvalidToken` when the token is unknown or expired.
    pub async fn verify_access_token(&self, token: &str) -> AuthResult<AccessClaims> {
        let entry = self.tokens.get_valid(token).await.ok_or(AuthError::InvalidToken)?;
        Ok(AccessClaims {
            client_id: entry.client_id,
            scopes: entry.scopes,
            expires_at: entry.expires_at,
        })
    }

    /// Introspection view over [`Self::verify_access_token`].
    ///
    /// Never errors past this boundary; callers always receive a structured
    /// active/inactive answer.
    pub async fn introspect(&self, token: &str) -> IntrospectionResponse {
        match self.verify_access_token(token).await {
            Ok(claims) => IntrospectionResponse::active(&claims),
            Err(e) => IntrospectionResponse::inactive(e.oauth_error_code()),
        }
    }
}
