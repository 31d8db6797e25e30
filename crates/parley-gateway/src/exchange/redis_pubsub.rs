use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{Exchange, Subscription};
use crate::error::FanoutError;
use crate::topic;

/// Topic exchange on Redis pub/sub, so several server processes share one
/// fanout. A routing key R is published on channel `<exchange>.<R>`.
///
/// Every bound queue gets its own pub/sub connection. Redis keeps nothing
/// for channels without subscribers, which matches the at-most-once policy.
pub struct RedisExchange {
    name: String,
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisExchange {
    pub async fn connect(url: &str, name: impl Into<String>) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            name: name.into(),
            client,
            conn,
        })
    }

    fn channel(&self, key: &str) -> String {
        format!("{}.{}", self.name, key)
    }
}

#[async_trait]
impl Exchange for RedisExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn declare(&self) -> Result<(), FanoutError> {
        // Pub/sub channels need no declaration; make sure the broker answers.
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| FanoutError::Declare {
                exchange: self.name.clone(),
                reason: e.to_string(),
            })?;
        info!(exchange = %self.name, "redis topic exchange ready");
        Ok(())
    }

    async fn bind(&self, binding_key: &str) -> Result<Subscription, FanoutError> {
        let bind_err = |e: redis::RedisError| FanoutError::Bind {
            binding_key: binding_key.to_string(),
            reason: e.to_string(),
        };

        let mut pubsub = self.client.get_async_pubsub().await.map_err(bind_err)?;
        let pattern = topic::is_pattern(binding_key);
        if pattern {
            // Redis globs are coarser than topic patterns; the forwarder
            // re-checks every channel name against the real binding key.
            let glob = self.channel(&binding_key.replace('#', "*"));
            pubsub.psubscribe(&glob).await.map_err(bind_err)?;
        } else {
            pubsub.subscribe(self.channel(binding_key)).await.map_err(bind_err)?;
        }

        let queue = format!("{}.{}", self.name, Uuid::new_v4().simple());
        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = format!("{}.", self.name);
        let key = binding_key.to_string();
        let forwarder_queue = queue.clone();

        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    msg = messages.next() => {
                        let Some(msg) = msg else {
                            warn!(queue = %forwarder_queue, "redis subscription ended");
                            break;
                        };
                        let routing_key = msg.get_channel_name().strip_prefix(&prefix).unwrap_or_default();
                        if pattern && !topic::matches(&key, routing_key) {
                            continue;
                        }
                        trace!(queue = %forwarder_queue, routing_key, "delivery");
                        if tx.send(Bytes::copy_from_slice(msg.get_payload_bytes())).is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping the pub/sub connection unsubscribes.
            debug!(queue = %forwarder_queue, "redis forwarder stopped");
        });

        debug!(%queue, binding_key, "queue bound");
        Ok(Subscription::new(queue, binding_key, rx))
    }

    async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<(), FanoutError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(self.channel(routing_key), payload.to_vec())
            .await
            .map_err(|e| FanoutError::Publish {
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })?;
        trace!(routing_key, receivers, "published");
        Ok(())
    }
}
