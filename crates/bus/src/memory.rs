use async_trait::async_trait;
use colloquy_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::transport::{BusMessage, BusTransport};

const SUBSCRIBER_QUEUE: usize = 256;

/// In-process fan-out transport for single-process deployments and tests.
///
/// Subscribers that fall behind past their queue depth lose messages
/// (at-most-once, like any real broker without acks); closed subscribers
/// are pruned on the next publish to their topic.
#[derive(Default)]
pub struct InProcessBus {
    topics: RwLock<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
}

impl InProcessBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BusTransport for InProcessBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        let mut topics = self.topics.write().await;
        let Some(senders) = topics.get_mut(topic) else {
            debug!(topic = %topic, "Publish with no subscribers, dropped");
            return Ok(());
        };

        senders.retain(|tx| {
            let msg = BusMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            match tx.try_send(msg) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(topic = %topic, "Subscriber queue full, message dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if senders.is_empty() {
            topics.remove(topic);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
