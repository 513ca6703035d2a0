use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            room_id         TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            recipient_id    TEXT NOT NULL,
            sender_name     TEXT NOT NULL,
            body            TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'sent'
                            CHECK (status IN ('sent', 'delivered', 'read')),
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        -- Unread counts aggregate over (recipient, sender, status)
        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(recipient_id, sender_id, status);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
