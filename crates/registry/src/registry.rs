use colloquy_core::config::RegistryConfig;
use colloquy_core::{CapabilityDescriptor, CapabilityHealth, Error, Result};
use colloquy_bus::BusClient;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Emitted whenever a probe sweep changes a capability's health.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub capability: String,
    pub from: CapabilityHealth,
    pub to: CapabilityHealth,
}

struct Entry {
    descriptor: CapabilityDescriptor,
    consecutive_failures: u32,
}

/// The process's single table of known capability providers.
///
/// Reads hand out descriptor snapshots; the only writer besides
/// `register` is the health loop, so routers never contend with it.
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    config: RegistryConfig,
    events: broadcast::Sender<HealthEvent>,
}

impl CapabilityRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            events,
        }
    }

    /// Health transitions of every registered capability.
    pub fn subscribe_events(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Add or replace a descriptor by name. Idempotent; re-registration
    /// resets the failure count.
    pub async fn register(&self, descriptor: CapabilityDescriptor) {
        let name = descriptor.name.clone();
        let replaced = self
            .entries
            .write()
            .await
            .insert(
                name.clone(),
                Entry {
                    descriptor,
                    consecutive_failures: 0,
                },
            )
            .is_some();
        info!(capability = %name, replaced, "Capability registered");
    }

    /// Snapshot of the descriptor registered under `name`.
    pub async fn resolve(&self, name: &str) -> Result<CapabilityDescriptor> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| Error::UnknownCapability(name.to_string()))
    }

    /// Snapshot of all descriptors, optionally filtered by health.
    pub async fn list(&self, filter: Option<CapabilityHealth>) -> Vec<CapabilityDescriptor> {
        let entries = self.entries.read().await;
        let mut out: Vec<CapabilityDescriptor> = entries
            .values()
            .filter(|e| filter.map_or(true, |h| e.descriptor.health == h))
            .map(|e| e.descriptor.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Apply one probe outcome: success resets to healthy; a failure
    /// degrades, and `unreachable_threshold` consecutive failures mark the
    /// capability unreachable. Returns the transition if health changed.
    pub async fn record_probe(&self, name: &str, success: bool) -> Option<HealthEvent> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name)?;

        let from = entry.descriptor.health;
        if success {
            entry.consecutive_failures = 0;
            entry.descriptor.health = CapabilityHealth::Healthy;
        } else {
            entry.consecutive_failures += 1;
            entry.descriptor.health = if entry.consecutive_failures >= self.config.unreachable_threshold
            {
                CapabilityHealth::Unreachable
            } else {
                CapabilityHealth::Degraded
            };
        }
        entry.descriptor.last_health_check_ms = chrono::Utc::now().timestamp_millis();

        let to = entry.descriptor.health;
        if from == to {
            return None;
        }
        let event = HealthEvent {
            capability: name.to_string(),
            from,
            to,
        };
        let _ = self.events.send(event.clone());
        Some(event)
    }

    /// One probe sweep over every registered capability.
    pub async fn check_all(&self, client: &BusClient) {
        let targets: Vec<(String, String)> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .map(|e| (e.descriptor.name.clone(), e.descriptor.bus_topic.clone()))
                .collect()
        };

        for (name, topic) in targets {
            let success = client
                .request(
                    &topic,
                    serde_json::json!({"op": "ping"}),
                    Duration::from_millis(self.config.ping_timeout_ms),
                )
                .await
                .is_ok();

            if let Some(event) = self.record_probe(&name, success).await {
                if event.to == CapabilityHealth::Unreachable {
                    warn!(capability = %name, "Capability marked unreachable");
                } else {
                    info!(capability = %name, from = ?event.from, to = ?event.to, "Capability health changed");
                }
            } else {
                debug!(capability = %name, success, "Probe, no health change");
            }
        }
    }

    /// Probe every capability on an interval until `shutdown` fires.
    pub async fn run_health_loop(
        &self,
        client: &BusClient,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_secs = self.config.health_interval_secs,
            "Health-check loop started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.health_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    self.check_all(client).await;
                }
            }
        }
        info!("Health-check loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_bus::{serve_capability, CapabilityHandler, InProcessBus};
    use std::sync::Arc;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(RegistryConfig {
            health_interval_secs: 1,
            ping_timeout_ms: 50,
            unreachable_threshold: 3,
        })
    }

    #[tokio::test]
    async fn test_resolve_unknown_fails() {
        let reg = registry();
        let err = reg.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, Error::UnknownCapability(_)));
    }

    #[tokio::test]
    async fn test_reregistration_replaces_descriptor() {
        let reg = registry();
        reg.register(CapabilityDescriptor::new("echo", "cap.echo.v1"))
            .await;
        reg.register(CapabilityDescriptor::new("echo", "cap.echo.v2"))
            .await;

        let resolved = reg.resolve("echo").await.unwrap();
        assert_eq!(resolved.bus_topic, "cap.echo.v2");
        assert_eq!(reg.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_debounce_transitions() {
        let reg = registry();
        reg.register(CapabilityDescriptor::new("echo", "cap.echo"))
            .await;

        // One failure degrades, it does not remove from routing.
        reg.record_probe("echo", false).await;
        assert_eq!(
            reg.resolve("echo").await.unwrap().health,
            CapabilityHealth::Degraded
        );
        reg.record_probe("echo", false).await;
        assert_eq!(
            reg.resolve("echo").await.unwrap().health,
            CapabilityHealth::Degraded
        );

        // Third consecutive failure crosses the threshold.
        reg.record_probe("echo", false).await;
        assert_eq!(
            reg.resolve("echo").await.unwrap().health,
            CapabilityHealth::Unreachable
        );

        // A single success resets to healthy.
        reg.record_probe("echo", true).await;
        assert_eq!(
            reg.resolve("echo").await.unwrap().health,
            CapabilityHealth::Healthy
        );
    }

    #[tokio::test]
    async fn test_health_events_emitted_on_transition() {
        let reg = registry();
        reg.register(CapabilityDescriptor::new("echo", "cap.echo"))
            .await;
        let mut events = reg.subscribe_events();

        reg.record_probe("echo", false).await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.capability, "echo");
        assert_eq!(event.from, CapabilityHealth::Healthy);
        assert_eq!(event.to, CapabilityHealth::Degraded);

        // Repeated failure below the threshold stays degraded: no event.
        reg.record_probe("echo", false).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_health() {
        let reg = registry();
        reg.register(CapabilityDescriptor::new("a", "cap.a")).await;
        reg.register(CapabilityDescriptor::new("b", "cap.b")).await;
        reg.record_probe("b", false).await;

        let healthy = reg.list(Some(CapabilityHealth::Healthy)).await;
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].name, "a");
        assert_eq!(reg.list(None).await.len(), 2);
    }

    struct Silent;

    #[async_trait::async_trait]
    impl CapabilityHandler for Silent {
        async fn handle(
            &self,
            _op: &str,
            _payload: &serde_json::Value,
        ) -> colloquy_core::Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn test_check_all_probes_over_the_bus() {
        let bus = InProcessBus::new();
        // "up" answers pings via the responder; "down" has no provider.
        serve_capability(bus.clone(), "cap.up", Arc::new(Silent))
            .await
            .unwrap();

        let client = BusClient::connect(bus).await.unwrap();
        let reg = registry();
        reg.register(CapabilityDescriptor::new("up", "cap.up")).await;
        reg.register(CapabilityDescriptor::new("down", "cap.down"))
            .await;

        reg.check_all(&client).await;

        assert_eq!(
            reg.resolve("up").await.unwrap().health,
            CapabilityHealth::Healthy
        );
        assert_eq!(
            reg.resolve("down").await.unwrap().health,
            CapabilityHealth::Degraded
        );
    }
}
