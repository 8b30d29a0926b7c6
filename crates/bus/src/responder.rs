use async_trait::async_trait;
use colloquy_core::{BusEnvelope, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::transport::BusTransport;

/// Provider-side handler for one capability topic.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(&self, op: &str, payload: &serde_json::Value) -> Result<serde_json::Value>;
}

/// Serve a capability on `topic`: decode request envelopes, answer `ping`
/// ops directly (that is what the registry's health loop sends), delegate
/// everything else to `handler`, and reply on the envelope's reply topic
/// echoing its correlation id. Handler errors become `{"error": ...}`
/// replies so the caller sees a response rather than a timeout.
///
/// Returns the task handle; abort it to take the provider off the bus.
pub async fn serve_capability(
    transport: Arc<dyn BusTransport>,
    topic: &str,
    handler: Arc<dyn CapabilityHandler>,
) -> Result<tokio::task::JoinHandle<()>> {
    let mut rx = transport.subscribe(topic).await?;
    let topic = topic.to_string();

    Ok(tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let envelope: BusEnvelope = match serde_json::from_value(msg.payload) {
                Ok(e) => e,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Non-envelope message on capability topic, dropped");
                    continue;
                }
            };

            let op = envelope
                .payload
                .get("op")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let result = if op == "ping" {
                Ok(serde_json::json!({"pong": true}))
            } else {
                handler.handle(&op, &envelope.payload).await
            };

            // Fire-and-forget envelopes carry no reply topic.
            if envelope.reply_topic.is_empty() {
                continue;
            }

            let reply_payload = match result {
                Ok(v) => v,
                Err(e) => serde_json::json!({"error": format!("{}", e)}),
            };
            let reply = envelope.reply(reply_payload);
            match serde_json::to_value(&reply) {
                Ok(value) => {
                    if let Err(e) = transport.publish(&envelope.reply_topic, value).await {
                        warn!(topic = %topic, error = %e, "Failed to publish capability reply");
                    }
                }
                Err(e) => warn!(topic = %topic, error = %e, "Unserializable capability reply"),
            }
            debug!(topic = %topic, op = %op, "Capability request served");
        }
    }))
}
