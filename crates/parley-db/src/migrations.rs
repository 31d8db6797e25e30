use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS chats (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            receiver_id     TEXT NOT NULL REFERENCES users(id),
            message         TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chats_sender
            ON chats(sender_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_chats_receiver
            ON chats(receiver_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
