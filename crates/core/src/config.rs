use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// How long a connection may sit in `connecting` before the opening
    /// handshake must have completed.
    #[serde(default = "default_handshake_grace_ms")]
    pub handshake_grace_ms: u64,
    /// Idle time before a liveness probe is sent.
    #[serde(default = "default_probe_idle_secs")]
    pub probe_idle_secs: u64,
    /// Consecutive unanswered probes before the session is closed.
    #[serde(default = "default_max_missed_probes")]
    pub max_missed_probes: u32,
    /// Outbound queue depth per session.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_handshake_grace_ms() -> u64 {
    3000
}

fn default_probe_idle_secs() -> u64 {
    30
}

fn default_max_missed_probes() -> u32 {
    3
}

fn default_outbound_queue() -> usize {
    64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_grace_ms: default_handshake_grace_ms(),
            probe_idle_secs: default_probe_idle_secs(),
            max_missed_probes: default_max_missed_probes(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    /// Default deadline for `request` calls that do not pass their own.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Interval between health-check sweeps.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Deadline for one health ping.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Consecutive ping failures before a capability is marked
    /// unreachable. A single failure only degrades it.
    #[serde(default = "default_unreachable_threshold")]
    pub unreachable_threshold: u32,
}

fn default_health_interval_secs() -> u64 {
    15
}

fn default_ping_timeout_ms() -> u64 {
    2000
}

fn default_unreachable_threshold() -> u32 {
    3
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval_secs(),
            ping_timeout_ms: default_ping_timeout_ms(),
            unreachable_threshold: default_unreachable_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// Deadline for one capability request within a turn.
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,
    /// Deadline for the classifier boundary. Exceeding it routes the turn
    /// to errored.
    #[serde(default = "default_classify_timeout_ms")]
    pub classify_timeout_ms: u64,
    /// How many completed turns are kept as classifier context.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
}

fn default_capability_timeout_ms() -> u64 {
    10_000
}

fn default_classify_timeout_ms() -> u64 {
    5000
}

fn default_context_turns() -> usize {
    8
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            capability_timeout_ms: default_capability_timeout_ms(),
            classify_timeout_ms: default_classify_timeout_ms(),
            context_turns: default_context_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    18890
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

/// One capability pre-registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityEntry {
    pub name: String,
    pub bus_topic: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Capabilities registered before the gateway starts accepting
    /// sessions. Providers registered later use the same descriptors.
    #[serde(default)]
    pub capabilities: Vec<CapabilityEntry>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.max_missed_probes, 3);
        assert_eq!(config.registry.unreachable_threshold, 3);
        assert_eq!(config.gateway.port, 18890);
        assert!(config.capabilities.is_empty());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "gateway": { "port": 9000 },
                "capabilities": [
                    { "name": "echo", "busTopic": "cap.echo" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.capabilities.len(), 1);
        assert_eq!(config.capabilities[0].bus_topic, "cap.echo");
        assert_eq!(config.session.handshake_grace_ms, 3000);
    }
}
