//! In-memory registry of OAuth client identities.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::types::Client;

/// Stores registered OAuth clients, keyed by unique `client_id`.
///
/// Registration is idempotent per id: re-registering an id overwrites the
/// previous record. Lookups of unknown ids are a normal outcome, not an
/// error.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, Client>>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a client, assigning a generated id when the metadata carries none.
    ///
    /// Returns the stored record.
    pub async fn register(&self, mut client: Client) -> Client {
        if client.client_id.is_empty() {
            client.client_id = uuid::Uuid::new_v4().simple().to_string();
        }
        self.clients.write().await.insert(client.client_id.clone(), client.clone());
        tracing::info!(client_id = %client.client_id, "Registered OAuth client");
        client
    }

    /// Look up a client by id. Pure read.
    pub async fn lookup(&self, client_id: &str) -> Option<Client> {
        self.clients.read().await.get(client_id).cloned()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").finish()
    }
}
