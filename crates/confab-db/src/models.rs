//! Database row types — these map directly to SQLite rows.
//! Distinct from the confab-types wire models to keep the DB layer independent.

use anyhow::{Context, Result};
use confab_types::models::Message;

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_name: String,
    pub body: String,
    pub status: String,
    pub created_at: String,
}

impl MessageRow {
    /// Convert a stored row into the wire model. Fails on corrupt rows;
    /// callers log and skip those rather than failing the whole page.
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self
                .id
                .parse()
                .with_context(|| format!("corrupt message id '{}'", self.id))?,
            status: self
                .status
                .parse()
                .map_err(|e| anyhow::anyhow!("message '{}': {}", self.id, e))?,
            created_at: self
                .created_at
                .parse::<chrono::DateTime<chrono::Utc>>()
                .with_context(|| {
                    format!("corrupt created_at '{}' on message '{}'", self.created_at, self.id)
                })?,
            room_id: self.room_id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            sender_name: self.sender_name,
            body: self.body,
        })
    }
}
