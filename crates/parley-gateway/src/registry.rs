use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::FrameSink;

/// How long `close` waits for a writer to release the transport before giving
/// up on a clean close frame.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One user's live duplex connection.
///
/// Anything holding an `Arc<LiveConnection>` must assume it may have been
/// closed the moment it was looked up; writes to a closed connection fail
/// with [`TransportError::Closed`] and count as a missed delivery.
pub struct LiveConnection {
    owner_id: String,
    conn_id: Uuid,
    sink: Mutex<Box<dyn FrameSink>>,
    active: AtomicBool,
    closed: CancellationToken,
}

impl LiveConnection {
    pub fn new(owner_id: impl Into<String>, sink: impl FrameSink + 'static) -> Arc<Self> {
        Arc::new(Self {
            owner_id: owner_id.into(),
            conn_id: Uuid::new_v4(),
            sink: Mutex::new(Box::new(sink)),
            active: AtomicBool::new(true),
            closed: CancellationToken::new(),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Write a single text frame. A write still pending when the connection
    /// is closed is abandoned.
    pub async fn write(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::Closed("connection inactive".into()));
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed("connection closed during write".into())),
            result = async {
                let mut sink = self.sink.lock().await;
                sink.send_text(frame).await
            } => result,
        }
    }

    /// Mark inactive and close the transport. Only the first call does any
    /// work; returns whether this call was it. A peer that is not reading
    /// cannot hold this up for longer than [`CLOSE_TIMEOUT`].
    pub async fn close(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();

        let shutdown = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(owner = %self.owner_id, "transport close failed: {}", e),
            Err(_) => debug!(owner = %self.owner_id, "transport close timed out"),
        }
        true
    }
}

impl fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConnection")
            .field("owner_id", &self.owner_id)
            .field("conn_id", &self.conn_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Process-wide map of user id to that user's single live connection.
///
/// Reads take the shared lock and never block each other; inserts and
/// removals take the exclusive lock. The map itself is never handed out.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<LiveConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the connection for `id`.
    pub async fn add(&self, id: &str, conn: Arc<LiveConnection>) {
        self.inner.write().await.insert(id.to_string(), conn);
    }

    /// Insert `conn` unless `id` already has an active connection, in which
    /// case that one is returned and nothing changes. Check and insert happen
    /// under one exclusive lock, so two racing claims never both succeed.
    pub async fn claim(&self, id: &str, conn: Arc<LiveConnection>) -> Result<(), Arc<LiveConnection>> {
        let mut map = self.inner.write().await;
        if let Some(existing) = map.get(id) {
            if existing.is_active() {
                return Err(existing.clone());
            }
        }
        map.insert(id.to_string(), conn);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<LiveConnection>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Whether `id` currently holds an active connection.
    pub async fn is_connected(&self, id: &str) -> bool {
        self.get(id).await.is_some_and(|conn| conn.is_active())
    }

    pub async fn delete(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    /// Close `conn` and drop its entry, but only if the entry still points at
    /// this very connection; a newer connection for the same owner is left
    /// alone. Safe to call any number of times.
    pub async fn close(&self, conn: &Arc<LiveConnection>) {
        let closed_now = conn.close().await;

        let mut map = self.inner.write().await;
        if map
            .get(conn.owner_id())
            .is_some_and(|stored| Arc::ptr_eq(stored, conn))
        {
            map.remove(conn.owner_id());
        }
        drop(map);

        if closed_now {
            info!(owner = %conn.owner_id(), conn_id = %conn.conn_id(), "live connection closed");
        }
    }

    /// Close every registered connection. Used on shutdown.
    pub async fn close_all(&self) {
        let conns: Vec<Arc<LiveConnection>> = self.inner.write().await.drain().map(|(_, c)| c).collect();
        for conn in &conns {
            conn.close().await;
        }
        info!("closed {} live connections", conns.len());
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
