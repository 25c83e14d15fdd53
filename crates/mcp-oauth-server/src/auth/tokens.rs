//! Store of issued bearer access tokens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::types::AccessToken;

/// Holds issued access tokens, keyed by the opaque token string.
///
/// Expiry is lazy: expired tokens stay in the map and are treated as absent
/// at verification time. The invariant is "expired tokens are inert", not
/// "expired tokens are removed", so a memory-hygiene sweep could be added
/// without changing observable behavior.
#[derive(Clone, Default)]
pub struct TokenStore {
    tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
}

impl TokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an issued token.
    pub async fn insert(&self, token: AccessToken) {
        self.tokens.write().await.insert(token.token.clone(), token);
    }

    /// Look up a token, treating expired entries as absent.
    pub async fn get_valid(&self, token: &str) -> Option<AccessToken> {
        let tokens = self.tokens.read().await;
        let entry = tokens.get(token)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.clone())
    }

    /// Number of stored tokens, expired entries included.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    /// Whether the store holds no tokens at all.
    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn token(value: &str, expires_at: chrono::DateTime<Utc>) -> AccessToken {
        AccessToken {
            token: value.into(),
            client_id: "abc".into(),
            scopes: vec!["mcp:tools".into()],
            issued_at: Utc::now(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_get_valid() {
        let store = TokenStore::new();
        store.insert(token("t1", Utc::now() + Duration::hours(1))).await;

        let found = store.get_valid("t1").await.unwrap();
        assert_eq!(found.client_id, "abc");
        assert!(store.get_valid("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_treated_as_absent() {
        let store = TokenStore::new();
        store.insert(token("t1", Utc::now() - Duration::seconds(1))).await;

        assert!(store.get_valid("t1").await.is_none());
        // Lazy expiry: the entry is inert but not swept.
        assert_eq!(store.len().await, 1);
    }
}
