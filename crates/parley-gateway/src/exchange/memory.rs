use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use super::{Exchange, Subscription};
use crate::error::FanoutError;
use crate::topic;

/// In-process topic exchange for single-node deployments and tests.
pub struct MemoryExchange {
    name: String,
    declared: AtomicBool,
    next_queue: AtomicU64,
    bindings: RwLock<Vec<Binding>>,
}

struct Binding {
    queue: String,
    key: String,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl MemoryExchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared: AtomicBool::new(false),
            next_queue: AtomicU64::new(1),
            bindings: RwLock::new(Vec::new()),
        }
    }

    /// Number of live bindings, after dropping those whose queue is gone.
    pub async fn binding_count(&self) -> usize {
        let mut bindings = self.bindings.write().await;
        bindings.retain(|b| !b.tx.is_closed());
        bindings.len()
    }

    fn ensure_declared(&self) -> Result<(), String> {
        if self.declared.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(format!("exchange {} not declared", self.name))
        }
    }
}

#[async_trait]
impl Exchange for MemoryExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn declare(&self) -> Result<(), FanoutError> {
        if !self.declared.swap(true, Ordering::AcqRel) {
            debug!(exchange = %self.name, "declared in-memory topic exchange");
        }
        Ok(())
    }

    async fn bind(&self, binding_key: &str) -> Result<Subscription, FanoutError> {
        self.ensure_declared().map_err(|reason| FanoutError::Bind {
            binding_key: binding_key.to_string(),
            reason,
        })?;

        let queue = format!(
            "{}.q{}",
            self.name,
            self.next_queue.fetch_add(1, Ordering::Relaxed)
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let mut bindings = self.bindings.write().await;
        bindings.retain(|b| !b.tx.is_closed());
        bindings.push(Binding {
            queue: queue.clone(),
            key: binding_key.to_string(),
            tx,
        });

        debug!(%queue, binding_key, "queue bound");
        Ok(Subscription::new(queue, binding_key, rx))
    }

    async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<(), FanoutError> {
        self.ensure_declared().map_err(|reason| FanoutError::Publish {
            routing_key: routing_key.to_string(),
            reason,
        })?;

        let mut delivered = 0usize;
        let mut stale = false;
        {
            let bindings = self.bindings.read().await;
            for binding in bindings.iter().filter(|b| topic::matches(&b.key, routing_key)) {
                if binding.tx.send(payload.clone()).is_ok() {
                    delivered += 1;
                } else {
                    trace!(queue = %binding.queue, "skipping deleted queue");
                    stale = true;
                }
            }
        }

        if stale {
            self.bindings.write().await.retain(|b| !b.tx.is_closed());
        }

        trace!(routing_key, delivered, "published");
        Ok(())
    }
}
