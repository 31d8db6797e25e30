use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use tracing::{debug, info, trace, warn};

use crate::bridge;
use crate::exchange::Subscription;
use crate::registry::{ConnectionRegistry, LiveConnection};

/// Drive one upgraded live connection for `owner_id`, who has already passed
/// the auth gate.
///
/// `subscription` is bound before the upgrade response goes out, so anything
/// published once the client sees the handshake complete is delivered.
///
/// The live channel is server-to-client only: inbound text is ignored and the
/// read half is watched purely to notice the client leaving.
pub async fn handle_connection(
    socket: WebSocket,
    owner_id: String,
    registry: ConnectionRegistry,
    subscription: Subscription,
) {
    let (sender, mut receiver) = socket.split();
    let conn = LiveConnection::new(owner_id.clone(), sender);

    // One live connection per user: an active one wins over this newcomer.
    if let Err(existing) = registry.claim(&owner_id, conn.clone()).await {
        info!(
            owner = %owner_id,
            existing = %existing.conn_id(),
            "live connection already active, closing duplicate"
        );
        conn.close().await;
        return;
    }

    info!(owner = %owner_id, conn_id = %conn.conn_id(), queue = %subscription.queue(), "live connection open");
    let bridge = bridge::spawn(conn.clone(), subscription, registry.clone());

    loop {
        tokio::select! {
            _ = conn.closed() => break,
            msg = receiver.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Text(text))) => {
                    trace!(owner = %owner_id, "ignoring inbound text frame ({} bytes)", text.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(owner = %owner_id, "live connection read failed: {}", e);
                    break;
                }
            }
        }
    }

    registry.close(&conn).await;
    match bridge.await {
        Ok(exit) => debug!(owner = %owner_id, ?exit, "bridge joined"),
        Err(e) => warn!(owner = %owner_id, "bridge task failed: {}", e),
    }
    info!(owner = %owner_id, "live connection finished");
}
