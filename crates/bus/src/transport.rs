use async_trait::async_trait;
use colloquy_core::Result;
use tokio::sync::mpsc;

/// One message as seen by the transport: a topic and an opaque payload.
/// Envelope semantics live a layer above, in [`crate::client::BusClient`].
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Pure publish/subscribe transport boundary.
///
/// Delivery is at-most-once: a publish with no live subscriber is silently
/// dropped, and nothing here retries. Request/response correlation is the
/// client layer's job, never a transport feature.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()>;

    /// Subscribe to a topic. Each subscriber gets its own channel; the
    /// subscription ends when the receiver is dropped.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>>;
}
