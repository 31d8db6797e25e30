use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::SinkExt;
use futures_util::stream::SplitSink;

use crate::error::TransportError;

/// Outbound half of a live duplex connection.
///
/// The registry and the bridge only ever talk to this trait, so neither needs
/// a real socket to be exercised.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the transport. Called at most once per connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        // A failed WebSocket write leaves the stream unusable.
        self.send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }
}
