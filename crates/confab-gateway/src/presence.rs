use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use confab_types::models::Role;

/// One authoritative record per connected user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub conn_id: Uuid,
    pub display_name: String,
    pub role: Role,
}

/// In-memory online/offline tracking. Nothing is persisted: on restart
/// everyone is offline until they reconnect.
pub struct PresenceTracker {
    entries: RwLock<HashMap<String, PresenceEntry>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Mark a user online. Last writer wins: a reconnect replaces the
    /// previous connection's entry.
    pub async fn set_online(&self, user_id: &str, entry: PresenceEntry) {
        self.entries
            .write()
            .await
            .insert(user_id.to_string(), entry);
    }

    /// Mark a user offline, but only if `conn_id` still owns the entry.
    /// Returns the removed entry, or `None` when a newer connection has
    /// taken over and the stale disconnect must not touch it.
    pub async fn set_offline(&self, user_id: &str, conn_id: Uuid) -> Option<PresenceEntry> {
        let mut entries = self.entries.write().await;
        match entries.get(user_id) {
            Some(entry) if entry.conn_id == conn_id => entries.remove(user_id),
            _ => None,
        }
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.entries.read().await.contains_key(user_id)
    }

    /// Snapshot of everyone currently online.
    pub async fn roster(&self) -> Vec<(String, PresenceEntry)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
