use std::time::Duration;

use thiserror::Error;

/// Failures of the topic exchange. None of these ever reach a sender: they
/// are logged where they happen and the durable copy stands.
#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("failed to declare exchange {exchange}: {reason}")]
    Declare { exchange: String, reason: String },
    #[error("failed to bind queue for {binding_key}: {reason}")]
    Bind { binding_key: String, reason: String },
    #[error("failed to publish to {routing_key}: {reason}")]
    Publish { routing_key: String, reason: String },
    #[error("publish to {routing_key} timed out after {timeout:?}")]
    Timeout { routing_key: String, timeout: Duration },
}

/// Failures writing to a live connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is gone; the owning session should be torn down.
    #[error("connection closed: {0}")]
    Closed(String),
    /// Only this frame was lost; the connection is still usable.
    #[error("frame dropped: {0}")]
    Frame(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}
