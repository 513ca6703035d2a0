use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeliveryStatus, Message, Role};

/// Events sent from the server to clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server acknowledges the Join handshake
    Ready { user_id: String, display_name: String },

    /// A new message was relayed into a room
    ReceiveMessage {
        message: Message,
        /// Echoed back for sender-side correlation; not persisted.
        client_message_id: Option<String>,
    },

    /// Persisted history for a room, oldest first
    ChatHistory {
        room_id: String,
        messages: Vec<Message>,
    },

    /// A user is typing in a room. Transient: clients expire it locally
    /// after 3 seconds, no server-side state is kept.
    UserTyping { room_id: String, user_id: String },

    /// A user connected to the gateway
    UserOnline {
        user_id: String,
        display_name: String,
        role: Role,
    },

    /// A user disconnected from the gateway
    UserOffline { user_id: String },

    /// A message's delivery status advanced
    MessageStatus {
        message_id: Uuid,
        room_id: String,
        status: DeliveryStatus,
    },

    /// Targeted refresh of one unread counter for the receiving client
    UnreadUpdate { counterpart_id: String, count: i64 },
}

impl GatewayEvent {
    /// Returns the room id if this event is scoped to a specific room.
    /// Events that return `None` are global or targeted and are delivered
    /// regardless of room subscriptions.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::ReceiveMessage { message, .. } => Some(&message.room_id),
            Self::ChatHistory { room_id, .. } => Some(room_id),
            Self::UserTyping { room_id, .. } => Some(room_id),
            Self::MessageStatus { room_id, .. } => Some(room_id),
            // Ready, UserOnline, UserOffline, UnreadUpdate are global/targeted
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Announce identity; must be the first frame on a new connection
    Join {
        user_id: String,
        role: Role,
        display_name: String,
    },

    /// Subscribe to a conversation room and receive its history
    JoinRoom { room_id: String },

    /// Unsubscribe from a conversation room
    LeaveRoom { room_id: String },

    /// Send a direct message into a room
    SendMessage {
        body: String,
        recipient_id: String,
        room_id: String,
        client_message_id: Option<String>,
    },

    /// Indicate typing in a room
    Typing { room_id: String },

    /// Mark every message addressed to the caller in this room as read
    MarkSeen { room_id: String },
}
