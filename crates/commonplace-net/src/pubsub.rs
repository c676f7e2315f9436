//! Publish/subscribe seam. No ordering or delivery guarantees are assumed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{NetError, Result};

/// Capacity of each subscriber's inbox. Full inboxes drop messages.
pub const SUBSCRIBER_BUFFER: usize = 256;

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, data: Bytes) -> Result<()>;

    /// Messages published on `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>>;
}

/// Run a transport call under `budget`.
pub(crate) async fn bounded<T, F>(op: &'static str, budget: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(budget, call)
        .await
        .map_err(|_| NetError::Timeout { op, budget })?
}

/// Subscriber table shared by the in-memory hub and the gossip adapter.
#[derive(Debug, Clone, Default)]
pub(crate) struct Subscribers {
    inner: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Bytes>>>>>,
}

impl Subscribers {
    pub(crate) async fn add(&self, topic: &str) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.inner
            .lock()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Fan out to every live subscriber of `topic`, forgetting closed ones.
    pub(crate) async fn deliver(&self, topic: &str, data: &Bytes) -> usize {
        let mut inner = self.inner.lock().await;
        let Some(senders) = inner.get_mut(topic) else {
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in senders.iter() {
            match tx.try_send(data.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(topic, "Subscriber inbox full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

/// In-process hub. Clones share subscribers, so one hub can connect several
/// peers in the same process. Publishers receive their own messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryPubSub {
    subscribers: Subscribers,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, data: Bytes) -> Result<()> {
        let delivered = self.subscribers.deliver(topic, &data).await;
        debug!(topic, len = data.len(), delivered, "Published on in-memory hub");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>> {
        Ok(self.subscribers.add(topic).await)
    }
}
