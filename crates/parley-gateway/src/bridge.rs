//! Live-read bridge: drains one connection's private queue onto its socket.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::exchange::Subscription;
use crate::registry::{ConnectionRegistry, LiveConnection};

/// Why a bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The connection was closed elsewhere (client left, shutdown, registry).
    ConnectionClosed,
    /// The broker side of the queue went away.
    SubscriptionEnded,
    /// A write showed the transport is dead.
    TransportDead,
}

/// Spawn the bridge for `conn`. The subscription must already be bound.
pub fn spawn(
    conn: Arc<LiveConnection>,
    subscription: Subscription,
    registry: ConnectionRegistry,
) -> JoinHandle<BridgeExit> {
    tokio::spawn(run(conn, subscription, registry))
}

/// Forward every delivery as one text frame until the connection closes or
/// the subscription ends, then close the connection through the registry.
///
/// Deliveries are already acknowledged, so a frame that fails to write is
/// simply lost; only a dead transport stops the loop.
pub async fn run(
    conn: Arc<LiveConnection>,
    mut subscription: Subscription,
    registry: ConnectionRegistry,
) -> BridgeExit {
    let owner = conn.owner_id().to_string();
    debug!(%owner, queue = %subscription.queue(), "bridge started");

    let exit = loop {
        tokio::select! {
            biased;
            _ = conn.closed() => break BridgeExit::ConnectionClosed,
            delivery = subscription.recv() => {
                let Some(payload) = delivery else {
                    break BridgeExit::SubscriptionEnded;
                };
                let frame = match String::from_utf8(payload.to_vec()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(%owner, "dropping non-UTF-8 delivery: {}", e);
                        continue;
                    }
                };
                match conn.write(frame).await {
                    Ok(()) => trace!(%owner, "frame delivered"),
                    Err(e) if e.is_fatal() => {
                        warn!(%owner, "live connection lost: {}", e);
                        break BridgeExit::TransportDead;
                    }
                    Err(e) => warn!(%owner, "live delivery missed: {}", e),
                }
            }
        }
    };

    registry.close(&conn).await;
    debug!(%owner, ?exit, "bridge stopped");
    exit
}
