//! Live position fan-out.
//!
//! Topics are the same `org:vehicle:device` strings used as cache keys, so a
//! subscriber addresses a vehicle exactly the way the cache does. Delivery is
//! fire-and-forget towards subscribers; only the publish call itself can fail.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

// ---

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpdatePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// Redis PUBLISH on a shared connection.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UpdatePublisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        // ---
        let mut conn = self.conn.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("PUBLISH {topic}"))?;

        debug!(topic, receivers, "position published");
        Ok(())
    }
}

/// Retries a publisher with linear backoff: the n-th retry waits
/// `n * backoff`. After `max_attempts` failures the last error is returned.
pub struct RetryingPublisher<P> {
    inner: P,
    max_attempts: u32,
    backoff: Duration,
}

impl<P> RetryingPublisher<P> {
    pub fn new(inner: P, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

#[async_trait]
impl<P: UpdatePublisher> UpdatePublisher for RetryingPublisher<P> {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        // ---
        let mut attempt = 1;
        loop {
            match self.inner.publish(topic, payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(e).with_context(|| {
                        format!("publish to {topic} failed after {attempt} attempts")
                    });
                }
                Err(e) => {
                    warn!(
                        topic,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "publish attempt failed, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}
