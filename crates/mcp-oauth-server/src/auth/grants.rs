//! Store of pending authorization grants.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::types::AuthorizationGrant;

/// Holds authorization codes awaiting exchange, keyed by code.
///
/// Consumption is an atomic remove-and-return under the write lock, so
/// concurrent exchanges of the same code see exactly one success. Absence is
/// the only "gone" signal; there is no separate consumed state.
#[derive(Clone, Default)]
pub struct GrantStore {
    grants: Arc<RwLock<HashMap<String, AuthorizationGrant>>>,
}

impl GrantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pending grant under its code.
    pub async fn insert(&self, grant: AuthorizationGrant) {
        self.grants.write().await.insert(grant.code.clone(), grant);
    }

    /// Read the grant's PKCE challenge without consuming the code.
    pub async fn challenge(&self, code: &str) -> Option<String> {
        self.grants.read().await.get(code).map(|g| g.code_challenge.clone())
    }

    /// Atomically remove and return the grant for `code`.
    ///
    /// Single-use enforcement: the first caller gets the grant, all others
    /// get `None`.
    pub async fn consume(&self, code: &str) -> Option<AuthorizationGrant> {
        self.grants.write().await.remove(code)
    }

    /// Number of pending grants.
    pub async fn len(&self) -> usize {
        self.grants.read().await.len()
    }

    /// Whether the store holds no pending grants.
    pub async fn is_empty(&self) -> bool {
        self.grants.read().await.is_empty()
    }
}

impl std::fmt::Debug for GrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn grant(code: &str) -> AuthorizationGrant {
        AuthorizationGrant {
            code: code.into(),
            client_id: "abc".into(),
            code_challenge: "X".into(),
            scopes: vec!["mcp:tools".into()],
            state: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let store = GrantStore::new();
        store.insert(grant("c1")).await;

        assert!(store.consume("c1").await.is_some());
        assert!(store.consume("c1").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_challenge_does_not_consume() {
        let store = GrantStore::new();
        store.insert(grant("c1")).await;

        assert_eq!(store.challenge("c1").await.as_deref(), Some("X"));
        assert_eq!(store.len().await, 1);
        assert!(store.consume("c1").await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_consume_has_one_winner() {
        let store = GrantStore::new();
        store.insert(grant("c1")).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.consume("c1").await.is_some() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
