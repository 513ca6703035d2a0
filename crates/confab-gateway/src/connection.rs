use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};
use uuid::Uuid;

use confab_db::Database;
use confab_types::events::{GatewayCommand, GatewayEvent};
use confab_types::models::{DeliveryStatus, Message, Role};
use confab_types::room;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a client gets to send its Join frame before the socket is closed.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size for the history pushed on JoinRoom.
const HISTORY_LIMIT: u32 = 50;

/// Identity announced by the client in its Join frame. Not verified here:
/// authentication lives with the account subsystem in front of this server.
#[derive(Debug, Clone)]
struct Identity {
    user_id: String,
    display_name: String,
    role: Role,
}

/// Handle a single WebSocket connection: Join handshake, presence, then the
/// command/relay loop until disconnect.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, store: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for the Join frame announcing identity
    let identity = match wait_for_join(&mut receiver).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to join, closing");
            return;
        }
    };

    info!(
        "{} ({}, {}) connected to gateway",
        identity.display_name, identity.user_id, identity.role
    );

    // Step 2: Acknowledge the handshake
    let ready = GatewayEvent::Ready {
        user_id: identity.user_id.clone(),
        display_name: identity.display_name.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Register per-user channel, then replay who is already online before
    // announcing ourselves, so the client sees the full roster.
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(&identity.user_id).await;

    for (uid, entry) in dispatcher.online_users().await {
        if uid == identity.user_id {
            continue;
        }
        let event = GatewayEvent::UserOnline {
            user_id: uid,
            display_name: entry.display_name,
            role: entry.role,
        };
        if send_event(&mut sender, &event).await.is_err() {
            // Not online yet, so no UserOffline to broadcast; just drop the
            // targeted channel this connection registered.
            dispatcher
                .unregister_user_channel(&identity.user_id, conn_id)
                .await;
            return;
        }
    }

    dispatcher
        .user_online(
            &identity.user_id,
            identity.display_name.clone(),
            identity.role,
            conn_id,
        )
        .await;

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_clone = dispatcher.clone();

    // Rooms this connection has open (shared between send and recv tasks).
    let subscribed_rooms: Arc<std::sync::RwLock<HashSet<String>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscribed_rooms.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let send_user_id = identity.user_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(room_id) = event.room_id() {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if !subs.contains(room_id) {
                            continue;
                        }
                    }

                    // Typing is for the other side of the room only
                    if let GatewayEvent::UserTyping { user_id, .. } = &event {
                        if *user_id == send_user_id {
                            continue;
                        }
                    }

                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let identity_recv = identity.clone();
    let recv_subscriptions = subscribed_rooms.clone();
    let store_recv = store.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &dispatcher_clone,
                            &store_recv,
                            &identity_recv,
                            cmd,
                            &recv_subscriptions,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            identity_recv.display_name,
                            identity_recv.user_id,
                            e,
                            truncate_for_log(&text, 200)
                        );
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(&identity.user_id, conn_id).await;
    info!(
        "{} ({}) disconnected from gateway",
        identity.display_name, identity.user_id
    );
}

/// Truncate to at most `max` bytes without splitting a character.
fn truncate_for_log(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).expect("gateway event serializes");
    sender.send(WsMessage::Text(text.into())).await
}

async fn wait_for_join(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<Identity> {
    let timeout = tokio::time::timeout(JOIN_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Text(text) = msg {
                match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Join {
                        user_id,
                        role,
                        display_name,
                    }) => {
                        if user_id.is_empty() {
                            warn!("Join frame with empty user_id rejected");
                            return None;
                        }
                        return Some(Identity {
                            user_id,
                            display_name,
                            role,
                        });
                    }
                    Ok(_) => {
                        warn!("Command before Join ignored");
                    }
                    Err(e) => {
                        warn!("Malformed Join frame: {}", e);
                        return None;
                    }
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    store: &Arc<Database>,
    identity: &Identity,
    cmd: GatewayCommand,
    subscriptions: &Arc<std::sync::RwLock<HashSet<String>>>,
) {
    match cmd {
        GatewayCommand::Join { .. } => {} // Already handled

        GatewayCommand::JoinRoom { room_id } => {
            // A caller may only open a conversation it belongs to; the room
            // id itself encodes the pair.
            if !room::is_participant(&room_id, &identity.user_id) {
                warn!(
                    "{} ({}) denied join of room {}",
                    identity.display_name, identity.user_id, room_id
                );
                return;
            }

            info!(
                "{} ({}) joining room {}",
                identity.display_name, identity.user_id, room_id
            );

            {
                let mut subs = subscriptions.write().expect("subscription lock poisoned");
                subs.insert(room_id.clone());
            }
            dispatcher.join_room(&room_id, &identity.user_id).await;

            // Everything still in-flight toward us is now delivered, then the
            // history page reflects those transitions.
            let store = store.clone();
            let rid = room_id.clone();
            let viewer = identity.user_id.clone();
            let result = spawn_blocking(move || {
                let delivered = store.mark_delivered(&rid, &viewer)?;
                let rows = store.get_history(&rid, HISTORY_LIMIT, None)?;
                Ok::<_, anyhow::Error>((delivered, rows))
            })
            .await;

            let (delivered, rows) = match result {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    error!("Failed to load history for room {}: {}", room_id, e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            };

            // Store returns newest first; clients want oldest first.
            let messages: Vec<Message> = rows
                .into_iter()
                .rev()
                .filter_map(|row| match row.into_message() {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!("Skipping corrupt history row: {}", e);
                        None
                    }
                })
                .collect();

            dispatcher
                .send_to_user(
                    &identity.user_id,
                    GatewayEvent::ChatHistory {
                        room_id: room_id.clone(),
                        messages,
                    },
                )
                .await;

            for id in delivered {
                match id.parse::<Uuid>() {
                    Ok(message_id) => dispatcher.broadcast(GatewayEvent::MessageStatus {
                        message_id,
                        room_id: room_id.clone(),
                        status: DeliveryStatus::Delivered,
                    }),
                    Err(e) => warn!("Corrupt message id '{}': {}", id, e),
                }
            }
        }

        GatewayCommand::LeaveRoom { room_id } => {
            {
                let mut subs = subscriptions.write().expect("subscription lock poisoned");
                subs.remove(&room_id);
            }
            dispatcher.leave_room(&room_id, &identity.user_id).await;
        }

        GatewayCommand::SendMessage {
            body,
            recipient_id,
            room_id,
            client_message_id,
        } => {
            if !room::is_participant(&room_id, &identity.user_id) {
                warn!(
                    "{} ({}) denied send to room {}",
                    identity.display_name, identity.user_id, room_id
                );
                return;
            }
            // The room id encodes both participants; a recipient outside the
            // pair would persist a message whose room id no longer derives
            // from its endpoints and bump a stranger's unread counter.
            if !room::is_participant(&room_id, &recipient_id) {
                warn!(
                    "{} ({}) denied send to {} outside room {}",
                    identity.display_name, identity.user_id, recipient_id, room_id
                );
                return;
            }

            // A recipient with the room open sees the message immediately, so
            // it lands as read and never counts as unread. Otherwise it lands
            // as sent and bumps their counter.
            let recipient_in_room = dispatcher.room_has(&room_id, &recipient_id).await;
            let status = if recipient_in_room {
                DeliveryStatus::Read
            } else {
                DeliveryStatus::Sent
            };

            let message = Message {
                id: Uuid::new_v4(),
                room_id: room_id.clone(),
                sender_id: identity.user_id.clone(),
                recipient_id: recipient_id.clone(),
                sender_name: identity.display_name.clone(),
                body,
                status,
                created_at: Utc::now(),
            };

            // Relay first; persistence proceeds independently and a failed
            // write does not recall the relayed event.
            dispatcher.broadcast(GatewayEvent::ReceiveMessage {
                message: message.clone(),
                client_message_id,
            });

            let dispatcher = dispatcher.clone();
            let store = store.clone();
            let sender_id = identity.user_id.clone();
            tokio::spawn(async move {
                let persisted = message.clone();
                let insert_store = store.clone();
                let result =
                    spawn_blocking(move || insert_store.insert_message(&persisted)).await;

                let store_err = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) => Some(e.to_string()),
                };
                if let Some(e) = store_err {
                    // The sender gets no failure signal; the message survives
                    // only as the relayed event.
                    error!("Failed to persist message {}: {}", message.id, e);
                    return;
                }

                if !recipient_in_room && dispatcher.is_online(&recipient_id).await {
                    refresh_unread(&dispatcher, store, &recipient_id, &sender_id).await;
                }
            });
        }

        GatewayCommand::Typing { room_id } => {
            if !room::is_participant(&room_id, &identity.user_id) {
                warn!(
                    "{} ({}) denied typing in room {}",
                    identity.display_name, identity.user_id, room_id
                );
                return;
            }
            dispatcher.broadcast(GatewayEvent::UserTyping {
                room_id,
                user_id: identity.user_id.clone(),
            });
        }

        GatewayCommand::MarkSeen { room_id } => {
            if !room::is_participant(&room_id, &identity.user_id) {
                warn!(
                    "{} ({}) denied mark-seen in room {}",
                    identity.display_name, identity.user_id, room_id
                );
                return;
            }

            let store = store.clone();
            let rid = room_id.clone();
            let viewer = identity.user_id.clone();
            let result = spawn_blocking(move || store.mark_read(&rid, &viewer)).await;

            let read_ids = match result {
                Ok(Ok(ids)) => ids,
                Ok(Err(e)) => {
                    error!("Failed to mark room {} as seen: {}", room_id, e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            };

            for id in &read_ids {
                match id.parse::<Uuid>() {
                    Ok(message_id) => dispatcher.broadcast(GatewayEvent::MessageStatus {
                        message_id,
                        room_id: room_id.clone(),
                        status: DeliveryStatus::Read,
                    }),
                    Err(e) => warn!("Corrupt message id '{}': {}", id, e),
                }
            }

            // The viewer's counter for the other side of this room is now 0.
            if let Some((a, b)) = room::participants(&room_id) {
                let counterpart = if a == identity.user_id { b } else { a };
                dispatcher
                    .send_to_user(
                        &identity.user_id,
                        GatewayEvent::UnreadUpdate {
                            counterpart_id: counterpart,
                            count: 0,
                        },
                    )
                    .await;
            }
        }
    }
}

/// Recompute one unread counter from the store and push it to the viewer.
/// Pull-based on purpose: the log is the source of truth, nothing is
/// incrementally maintained.
async fn refresh_unread(
    dispatcher: &Dispatcher,
    store: Arc<Database>,
    viewer_id: &str,
    counterpart_id: &str,
) {
    let viewer = viewer_id.to_string();
    let counterpart = counterpart_id.to_string();

    let v = viewer.clone();
    let c = counterpart.clone();
    let result = spawn_blocking(move || store.unread_count(&v, &c)).await;

    match result {
        Ok(Ok(count)) => {
            dispatcher
                .send_to_user(
                    &viewer,
                    GatewayEvent::UnreadUpdate {
                        counterpart_id: counterpart,
                        count,
                    },
                )
                .await;
        }
        Ok(Err(e)) => error!("Failed to recompute unread count for {}: {}", viewer, e),
        Err(e) => error!("spawn_blocking join error: {}", e),
    }
}
