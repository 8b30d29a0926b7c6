use async_trait::async_trait;
use colloquy_bus::CapabilityHandler;
use colloquy_core::{Error, Result};

/// Built-in provider: echoes the request text back. Mostly useful to
/// prove a fresh gateway end to end.
pub struct EchoCapability;

#[async_trait]
impl CapabilityHandler for EchoCapability {
    async fn handle(&self, op: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        match op {
            "" | "handle" | "say" => {
                let text = payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(serde_json::json!({ "reply": text }))
            }
            other => Err(Error::Other(format!("unsupported op: {}", other))),
        }
    }
}

/// Built-in provider: answers with the current wall-clock time.
pub struct ClockCapability;

#[async_trait]
impl CapabilityHandler for ClockCapability {
    async fn handle(&self, _op: &str, _payload: &serde_json::Value) -> Result<serde_json::Value> {
        let now = chrono::Utc::now();
        Ok(serde_json::json!({
            "reply": now.to_rfc3339(),
            "timestamp_ms": now.timestamp_millis(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_text() {
        let reply = EchoCapability
            .handle("handle", &serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(reply["reply"], "hi");
    }

    #[tokio::test]
    async fn test_clock_returns_timestamp() {
        let reply = ClockCapability
            .handle("", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(reply["timestamp_ms"].as_i64().unwrap() > 0);
    }
}
