use colloquy_core::{BusEnvelope, Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::transport::{BusMessage, BusTransport};

type WaiterTable = Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>;

/// Request/response client layered over a pure publish/subscribe transport.
///
/// Each client instance owns one reply topic and one demux task. A
/// `request` parks a oneshot waiter under a fresh correlation id; the
/// demux task routes incoming reply envelopes to their waiter by id. An
/// envelope whose id has no waiter (timed out, cancelled, or foreign) is
/// dropped and logged — it can never satisfy an unrelated caller.
pub struct BusClient {
    transport: Arc<dyn BusTransport>,
    reply_topic: String,
    pending: WaiterTable,
    demux: tokio::task::JoinHandle<()>,
}

impl BusClient {
    /// Subscribe the reply topic and start the demux task.
    pub async fn connect(transport: Arc<dyn BusTransport>) -> Result<Self> {
        let reply_topic = format!("reply.{}", uuid::Uuid::new_v4());
        let rx = transport.subscribe(&reply_topic).await?;
        let pending: WaiterTable = Arc::new(Mutex::new(HashMap::new()));

        let demux = tokio::spawn(demux_loop(rx, pending.clone()));

        Ok(Self {
            transport,
            reply_topic,
            pending,
            demux,
        })
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    /// Fire-and-forget publish. A transport failure is surfaced, not
    /// retried.
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        self.transport.publish(topic, payload).await
    }

    /// Publish a request envelope and wait for the correlated reply.
    ///
    /// Resolves with the reply payload, `Error::RequestTimeout` once
    /// `timeout` elapses, or `Error::Transport` if the publish itself
    /// failed. Dropping the returned future (caller cancelled) releases
    /// the correlation id immediately.
    pub async fn request(
        &self,
        topic: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let envelope = BusEnvelope::request(&self.reply_topic, payload);
        let correlation_id = envelope.correlation_id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(correlation_id.clone(), tx);
        let _guard = WaiterGuard {
            pending: self.pending.clone(),
            correlation_id: correlation_id.clone(),
        };

        self.transport
            .publish(topic, serde_json::to_value(&envelope)?)
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Demux task gone; treat like an unreachable transport.
            Ok(Err(_)) => Err(Error::Transport("reply channel closed".to_string())),
            Err(_) => {
                debug!(topic = %topic, correlation_id = %correlation_id, "Request timed out");
                Err(Error::RequestTimeout(topic.to_string()))
            }
        }
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.demux.abort();
    }
}

/// Removes the waiter entry when the requesting future goes away, on any
/// path: fulfilled (no-op, demux already removed it), timed out, or
/// cancelled mid-flight.
struct WaiterGuard {
    pending: WaiterTable,
    correlation_id: String,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.pending.lock().unwrap().remove(&self.correlation_id);
    }
}

async fn demux_loop(mut rx: mpsc::Receiver<BusMessage>, pending: WaiterTable) {
    while let Some(msg) = rx.recv().await {
        let envelope: BusEnvelope = match serde_json::from_value(msg.payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "Malformed reply envelope, dropped");
                continue;
            }
        };

        let waiter = pending.lock().unwrap().remove(&envelope.correlation_id);
        match waiter {
            Some(tx) => {
                // Waiter may have been dropped between removal and send;
                // that is the same as a late reply.
                let _ = tx.send(envelope.payload);
            }
            None => {
                debug!(
                    correlation_id = %envelope.correlation_id,
                    "Reply with no waiter, dropped"
                );
            }
        }
    }
}
