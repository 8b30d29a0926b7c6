use serde::{Deserialize, Serialize};

/// Health of a capability provider as judged by the registry's probe loop.
///
/// `Degraded` marks a recent transient failure: the capability stays in
/// routing consideration but the next turn's reply names it if it fails
/// again. `Unreachable` removes it from routing until a probe succeeds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityHealth {
    Healthy,
    Degraded,
    Unreachable,
}

/// One registered capability provider: a backend service answering
/// requests on a bus topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Unique name across the registry.
    pub name: String,
    /// Topic the provider listens on. Stable for the descriptor's lifetime.
    pub bus_topic: String,
    /// Operation names the provider declares.
    #[serde(default)]
    pub declared_operations: Vec<String>,
    pub health: CapabilityHealth,
    /// Unix millis of the last probe that touched this descriptor.
    pub last_health_check_ms: i64,
}

impl CapabilityDescriptor {
    pub fn new(name: &str, bus_topic: &str) -> Self {
        Self {
            name: name.to_string(),
            bus_topic: bus_topic.to_string(),
            declared_operations: Vec::new(),
            health: CapabilityHealth::Healthy,
            last_health_check_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_operations(mut self, ops: Vec<String>) -> Self {
        self.declared_operations = ops;
        self
    }

    /// Routable means "worth dispatching to this turn" — healthy or
    /// degraded, but not unreachable.
    pub fn is_routable(&self) -> bool {
        self.health != CapabilityHealth::Unreachable
    }
}
