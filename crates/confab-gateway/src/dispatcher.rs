use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use confab_types::events::GatewayEvent;
use confab_types::models::Role;

use crate::presence::{PresenceEntry, PresenceTracker};

/// Session-scoped registry for all connected clients: presence, per-user
/// targeted channels, room membership, and the event broadcast. Injected
/// into every connection handler; there is no process-wide singleton.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events — every connection receives all
    /// events and filters room-scoped ones against its own subscriptions.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    presence: PresenceTracker,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<String, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,

    /// Which users currently have a given room open: room_id -> user ids
    room_members: RwLock<HashMap<String, HashSet<String>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: PresenceTracker::new(),
                user_channels: RwLock::new(HashMap::new()),
                room_members: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id.to_string(), (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: &str, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(user_id);
            }
        }
    }

    /// Send a targeted event to a specific user, if connected.
    pub async fn send_to_user(&self, user_id: &str, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(user_id) {
            let _ = tx.send(event);
        }
    }

    /// Register a user as online and announce it.
    pub async fn user_online(&self, user_id: &str, display_name: String, role: Role, conn_id: Uuid) {
        self.inner
            .presence
            .set_online(
                user_id,
                PresenceEntry {
                    conn_id,
                    display_name: display_name.clone(),
                    role,
                },
            )
            .await;

        self.broadcast(GatewayEvent::UserOnline {
            user_id: user_id.to_string(),
            display_name,
            role,
        });
    }

    /// Register a user as offline. Only cleans up if conn_id still owns the
    /// presence entry; a stale disconnect after a reconnect is a no-op.
    pub async fn user_offline(&self, user_id: &str, conn_id: Uuid) {
        if self.inner.presence.set_offline(user_id, conn_id).await.is_none() {
            // A newer connection has taken over — don't touch anything
            return;
        }

        self.leave_all_rooms(user_id).await;
        self.unregister_user_channel(user_id, conn_id).await;

        self.broadcast(GatewayEvent::UserOffline {
            user_id: user_id.to_string(),
        });
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.presence.is_online(user_id).await
    }

    /// Snapshot of everyone currently online.
    pub async fn online_users(&self) -> Vec<(String, PresenceEntry)> {
        self.inner.presence.roster().await
    }

    // -- Room membership --

    pub async fn join_room(&self, room_id: &str, user_id: &str) {
        self.inner
            .room_members
            .write()
            .await
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub async fn leave_room(&self, room_id: &str, user_id: &str) {
        let mut rooms = self.inner.room_members.write().await;
        if let Some(members) = rooms.get_mut(room_id) {
            members.remove(user_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    pub async fn leave_all_rooms(&self, user_id: &str) {
        let mut rooms = self.inner.room_members.write().await;
        rooms.retain(|_, members| {
            members.remove(user_id);
            !members.is_empty()
        });
    }

    /// True if the user currently has the room open. Drives the
    /// delivered-vs-unread decision on send.
    pub async fn room_has(&self, room_id: &str, user_id: &str) -> bool {
        self.inner
            .room_members
            .read()
            .await
            .get(room_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_types::room;

    #[tokio::test]
    async fn online_then_offline_broadcasts_in_order() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let (conn_id, _user_rx) = dispatcher.register_user_channel("u1").await;
        dispatcher
            .user_online("u1", "Alice".into(), Role::Student, conn_id)
            .await;
        dispatcher.user_offline("u1", conn_id).await;

        match rx.recv().await.unwrap() {
            GatewayEvent::UserOnline { user_id, .. } => assert_eq!(user_id, "u1"),
            other => panic!("expected UserOnline, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            GatewayEvent::UserOffline { user_id } => assert_eq!(user_id, "u1"),
            other => panic!("expected UserOffline, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_disconnect_is_ignored() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let (old_conn, _old_rx) = dispatcher.register_user_channel("u1").await;
        dispatcher
            .user_online("u1", "Alice".into(), Role::Student, old_conn)
            .await;

        // Reconnect before the old socket's cleanup runs.
        let (new_conn, _new_rx) = dispatcher.register_user_channel("u1").await;
        dispatcher
            .user_online("u1", "Alice".into(), Role::Student, new_conn)
            .await;

        dispatcher.user_offline("u1", old_conn).await;
        assert!(dispatcher.is_online("u1").await);

        // Two UserOnline events, no UserOffline.
        assert!(matches!(rx.recv().await.unwrap(), GatewayEvent::UserOnline { .. }));
        assert!(matches!(rx.recv().await.unwrap(), GatewayEvent::UserOnline { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn room_membership_tracks_joins_and_leaves() {
        let dispatcher = Dispatcher::new();
        let room_id = room::resolve("u1", "u2");

        dispatcher.join_room(&room_id, "u2").await;
        assert!(dispatcher.room_has(&room_id, "u2").await);
        assert!(!dispatcher.room_has(&room_id, "u1").await);

        dispatcher.leave_room(&room_id, "u2").await;
        assert!(!dispatcher.room_has(&room_id, "u2").await);
    }

    #[tokio::test]
    async fn disconnect_clears_every_room() {
        let dispatcher = Dispatcher::new();
        let (conn_id, _rx) = dispatcher.register_user_channel("u1").await;
        dispatcher
            .user_online("u1", "Alice".into(), Role::Developer, conn_id)
            .await;

        dispatcher.join_room(&room::resolve("u1", "u2"), "u1").await;
        dispatcher.join_room(&room::resolve("u1", "u3"), "u1").await;

        dispatcher.user_offline("u1", conn_id).await;

        assert!(!dispatcher.room_has(&room::resolve("u1", "u2"), "u1").await);
        assert!(!dispatcher.room_has(&room::resolve("u1", "u3"), "u1").await);
    }

    #[tokio::test]
    async fn broadcast_preserves_send_order() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let room_id = room::resolve("u1", "u2");

        for i in 0..10 {
            dispatcher.broadcast(GatewayEvent::UserTyping {
                room_id: room_id.clone(),
                user_id: format!("u{i}"),
            });
        }

        for i in 0..10 {
            match rx.recv().await.unwrap() {
                GatewayEvent::UserTyping { user_id, .. } => {
                    assert_eq!(user_id, format!("u{i}"));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unregister_only_removes_own_channel() {
        let dispatcher = Dispatcher::new();
        let (old_conn, _old_rx) = dispatcher.register_user_channel("u1").await;
        let (new_conn, mut new_rx) = dispatcher.register_user_channel("u1").await;

        // A stale connection's cleanup must not tear down its successor.
        dispatcher.unregister_user_channel("u1", old_conn).await;
        dispatcher
            .send_to_user(
                "u1",
                GatewayEvent::UserOffline {
                    user_id: "u2".into(),
                },
            )
            .await;
        assert!(new_rx.try_recv().is_ok());

        dispatcher.unregister_user_channel("u1", new_conn).await;
        dispatcher
            .send_to_user(
                "u1",
                GatewayEvent::UserOffline {
                    user_id: "u2".into(),
                },
            )
            .await;
        assert!(new_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn targeted_send_reaches_only_that_user() {
        let dispatcher = Dispatcher::new();
        let (_conn, mut u1_rx) = dispatcher.register_user_channel("u1").await;
        let (_conn, mut u2_rx) = dispatcher.register_user_channel("u2").await;

        dispatcher
            .send_to_user(
                "u1",
                GatewayEvent::UnreadUpdate {
                    counterpart_id: "u2".into(),
                    count: 3,
                },
            )
            .await;

        assert!(matches!(
            u1_rx.recv().await.unwrap(),
            GatewayEvent::UnreadUpdate { count: 3, .. }
        ));
        assert!(u2_rx.try_recv().is_err());
    }
}
