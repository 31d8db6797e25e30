/// Database row types: these map directly to SQLite rows.
/// Distinct from parley-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct ChatRow {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub created_at: String,
}
