use crate::models::{ChatRow, UserRow};
use crate::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parley_types::models::{ChatMessage, Identity};
use rusqlite::Connection;
use uuid::Uuid;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, name: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, name, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        Ok(self.get_user_by_email(email)?.is_some())
    }

    /// Resolve the identity behind an email, without the password hash.
    pub fn identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        self.get_user_by_email(email)?
            .map(|row| -> Result<Identity> {
                Ok(Identity {
                    id: row.id.parse().with_context(|| format!("corrupt user id '{}'", row.id))?,
                    name: row.name,
                    email: row.email,
                })
            })
            .transpose()
    }

    // -- Chats --

    /// Insert one chat row. Both participants must exist.
    pub fn insert_chat(&self, chat: &ChatMessage) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (sender_id, receiver_id, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    chat.sender_id.to_string(),
                    chat.receiver_id.to_string(),
                    chat.message,
                    format_timestamp(&chat.created_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| query_chats_for_user(conn, user_id))
    }

    /// Every message the user sent or received, oldest first.
    pub fn chat_history(&self, user_id: Uuid) -> Result<Vec<ChatMessage>> {
        self.get_chats_for_user(&user_id.to_string())?
            .into_iter()
            .map(chat_from_row)
            .collect()
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn chat_from_row(row: ChatRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        sender_id: row
            .sender_id
            .parse()
            .with_context(|| format!("corrupt sender_id on chat {}", row.id))?,
        receiver_id: row
            .receiver_id
            .parse()
            .with_context(|| format!("corrupt receiver_id on chat {}", row.id))?,
        message: row.message,
        created_at: DateTime::parse_from_rfc3339(&row.created_at)
            .with_context(|| format!("corrupt created_at on chat {}", row.id))?
            .with_timezone(&Utc),
    })
}

fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, name, email, password, created_at FROM users WHERE email = ?1")?;

    let row = stmt
        .query_row([email], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_chats_for_user(conn: &Connection, user_id: &str) -> Result<Vec<ChatRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, message, created_at
         FROM chats
         WHERE sender_id = ?1 OR receiver_id = ?1
         ORDER BY created_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map([user_id], |row| {
            Ok(ChatRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                message: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
