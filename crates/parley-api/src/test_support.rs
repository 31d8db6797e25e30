use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::exchange::{DEFAULT_PUBLISH_TIMEOUT, MemoryExchange};
use parley_gateway::transport::FrameSink;
use parley_gateway::{ConnectionRegistry, Exchange, Fanout, FanoutError, Subscription, TransportError};
use parley_types::models::Identity;

use crate::auth::{AppState, AppStateInner};
use crate::cache::MemoryCache;
use crate::token::TokenIssuer;

/// Wraps a real in-memory exchange and records publish attempts. With
/// `fail` set every publish errors after being counted.
pub struct SpyExchange {
    inner: MemoryExchange,
    pub publishes: AtomicUsize,
    pub fail: AtomicBool,
}

impl SpyExchange {
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchange for SpyExchange {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn declare(&self) -> Result<(), FanoutError> {
        self.inner.declare().await
    }

    async fn bind(&self, binding_key: &str) -> Result<Subscription, FanoutError> {
        self.inner.bind(binding_key).await
    }

    async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<(), FanoutError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FanoutError::Publish {
                routing_key: routing_key.to_string(),
                reason: "broker down".into(),
            });
        }
        self.inner.publish(routing_key, payload).await
    }
}

/// Sink that accepts and discards every frame.
pub struct NullSink;

#[async_trait]
impl FrameSink for NullSink {
    async fn send_text(&mut self, _frame: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct Harness {
    pub state: AppState,
    pub spy: Arc<SpyExchange>,
}

pub async fn harness() -> Harness {
    let spy = Arc::new(SpyExchange {
        inner: MemoryExchange::new("test.chat"),
        publishes: AtomicUsize::new(0),
        fail: AtomicBool::new(false),
    });
    let fanout = Fanout::new(spy.clone(), DEFAULT_PUBLISH_TIMEOUT);
    fanout.declare().await.unwrap();

    let cache = Arc::new(MemoryCache::new());
    let state = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        tokens: TokenIssuer::new("test-secret", cache),
        registry: ConnectionRegistry::new(),
        fanout,
    });

    Harness { state, spy }
}

/// Insert a user straight into the store. The password hash is not a real
/// hash, so these users cannot sign in over HTTP.
pub fn add_user(state: &AppState, name: &str, email: &str) -> Identity {
    let id = Uuid::new_v4();
    state.db.create_user(&id.to_string(), name, email, "not-a-hash").unwrap();
    Identity {
        id,
        name: name.to_string(),
        email: email.to_string(),
    }
}
