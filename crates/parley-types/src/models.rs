use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user as seen by the core. The password hash never leaves
/// parley-db.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// A direct message between two users.
///
/// This is both the durable record and the frame written to the receiver's
/// live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Routing key used on the fanout exchange: always the receiver's id.
    pub fn routing_key(&self) -> String {
        self.receiver_id.to_string()
    }
}
