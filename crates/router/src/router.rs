use colloquy_bus::BusClient;
use colloquy_core::config::RouterConfig;
use colloquy_core::{
    CapabilityDescriptor, CapabilityResponse, ConversationTurn, Error, Intent, IntentKind,
    ServerFrame, TurnStatus, TurnSummary,
};
use colloquy_registry::CapabilityRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::classify::Classifier;
use crate::sink::TurnSink;

/// Phases of one turn. Reached states are logged; `errored` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Classifying,
    Resolving,
    Dispatching,
    Composing,
    Done,
    Errored,
}

/// Drives one conversation turn from raw text to exactly one reply frame.
///
/// Capability-level failures degrade the turn, they never abort it; only
/// the classifier boundary can push a turn to errored. Composition is
/// pure formatting over already-known data and cannot fail.
pub struct IntentRouter {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<BusClient>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn TurnSink>,
    config: RouterConfig,
}

impl IntentRouter {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        bus: Arc<BusClient>,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn TurnSink>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            classifier,
            sink,
            config,
        }
    }

    /// Run the full state machine for one utterance. Always returns a
    /// reply frame, even in total failure.
    pub async fn run_turn(
        &self,
        session_id: &str,
        text: &str,
        context: &[TurnSummary],
    ) -> ServerFrame {
        debug!(session_id = %session_id, state = ?TurnState::Classifying, "Turn started");
        let classify_deadline = Duration::from_millis(self.config.classify_timeout_ms);
        let intent = match tokio::time::timeout(
            classify_deadline,
            self.classifier.classify(text, context),
        )
        .await
        {
            Ok(Ok(intent)) => intent,
            Ok(Err(e)) => return self.errored(session_id, e),
            Err(_) => {
                return self.errored(
                    session_id,
                    Error::ClassificationUnavailable("classifier timed out".to_string()),
                )
            }
        };

        // Clarification short-circuits straight to composing: no
        // resolution, no dispatch, zero bus traffic.
        if intent.requires_clarification {
            let reply = "I need a bit more detail — could you say what you'd like me to do?";
            return self.finish(
                session_id,
                intent,
                Vec::new(),
                Vec::new(),
                reply.to_string(),
                TurnStatus::Answered,
            );
        }

        // No targets means the turn is self-answerable.
        if intent.target_capabilities.is_empty() {
            let reply = self.compose_self_reply(&intent).await;
            return self.finish(
                session_id,
                intent,
                Vec::new(),
                Vec::new(),
                reply,
                TurnStatus::Answered,
            );
        }

        debug!(session_id = %session_id, state = ?TurnState::Resolving, "Resolving capabilities");
        let mut degraded: Vec<String> = Vec::new();
        let mut dispatch: Vec<CapabilityDescriptor> = Vec::new();
        for name in &intent.target_capabilities {
            match self.registry.resolve(name).await {
                Ok(desc) if desc.is_routable() => dispatch.push(desc),
                Ok(desc) => {
                    warn!(capability = %name, health = ?desc.health, "Capability not routable, dropped from dispatch");
                    degraded.push(name.clone());
                }
                Err(e) => {
                    warn!(capability = %name, error = %e, "Capability resolution failed, dropped from dispatch");
                    degraded.push(name.clone());
                }
            }
        }

        if dispatch.is_empty() {
            let reply = format!(
                "No capability is currently available for that (unavailable: {}).",
                degraded.join(", ")
            );
            return self.finish(
                session_id,
                intent,
                Vec::new(),
                degraded,
                reply,
                TurnStatus::Partial,
            );
        }

        debug!(
            session_id = %session_id,
            state = ?TurnState::Dispatching,
            capabilities = dispatch.len(),
            chained = intent.is_chained(),
            "Dispatching"
        );
        let responses = if intent.is_chained() {
            self.dispatch_chained(&intent, &dispatch).await
        } else {
            self.dispatch_concurrent(&intent, &dispatch).await
        };

        for response in &responses {
            if !response.success {
                degraded.push(response.capability.clone());
            }
        }
        let status = if degraded.is_empty() {
            TurnStatus::Answered
        } else {
            TurnStatus::Partial
        };
        let reply = compose_reply(&responses, &degraded);
        self.finish(session_id, intent, responses, degraded, reply, status)
    }

    /// Invoke every resolved capability concurrently. A failure is
    /// recorded per capability and never aborts its siblings.
    async fn dispatch_concurrent(
        &self,
        intent: &Intent,
        dispatch: &[CapabilityDescriptor],
    ) -> Vec<CapabilityResponse> {
        let timeout = Duration::from_millis(self.config.capability_timeout_ms);
        let calls = dispatch.iter().map(|desc| {
            let payload = request_payload(intent, None);
            async move {
                let result = self.bus.request(&desc.bus_topic, payload, timeout).await;
                into_response(&desc.name, result)
            }
        });
        futures::future::join_all(calls).await
    }

    /// Invoke capabilities in declaration order, feeding each call the
    /// accumulated results of the ones before it.
    async fn dispatch_chained(
        &self,
        intent: &Intent,
        dispatch: &[CapabilityDescriptor],
    ) -> Vec<CapabilityResponse> {
        let timeout = Duration::from_millis(self.config.capability_timeout_ms);
        let mut responses = Vec::with_capacity(dispatch.len());
        let mut prior = serde_json::Map::new();

        for desc in dispatch {
            let payload = request_payload(intent, Some(&prior));
            let result = self.bus.request(&desc.bus_topic, payload, timeout).await;
            let response = into_response(&desc.name, result);
            if response.success {
                prior.insert(desc.name.clone(), response.result.clone());
            }
            responses.push(response);
        }
        responses
    }

    /// Self-answerable turns: status checks read the registry, everything
    /// else gets a capability overview.
    async fn compose_self_reply(&self, intent: &Intent) -> String {
        let descriptors = self.registry.list(None).await;
        if intent.kind == IntentKind::StatusCheck {
            if descriptors.is_empty() {
                return "No capabilities are registered.".to_string();
            }
            let parts: Vec<String> = descriptors
                .iter()
                .map(|d| format!("{} ({:?})", d.name, d.health).to_lowercase())
                .collect();
            return format!("Capability status: {}.", parts.join(", "));
        }

        let names: Vec<String> = descriptors.into_iter().map(|d| d.name).collect();
        if names.is_empty() {
            "I don't have any capabilities wired up yet.".to_string()
        } else {
            format!(
                "I don't have a capability for that. I can currently reach: {}.",
                names.join(", ")
            )
        }
    }

    fn errored(&self, session_id: &str, error: Error) -> ServerFrame {
        warn!(session_id = %session_id, error = %error, state = ?TurnState::Errored, "Turn errored");
        let reply = "Sorry — I couldn't process that right now. Please try again.";
        self.finish(
            session_id,
            Intent::new(IntentKind::Unclassifiable, 0.0),
            Vec::new(),
            Vec::new(),
            reply.to_string(),
            TurnStatus::Errored,
        )
    }

    /// Composing: assemble the reply frame, hand the finished turn to the
    /// sink, and log the terminal state.
    fn finish(
        &self,
        session_id: &str,
        intent: Intent,
        responses: Vec<CapabilityResponse>,
        degraded: Vec<String>,
        reply: String,
        status: TurnStatus,
    ) -> ServerFrame {
        debug!(session_id = %session_id, state = ?TurnState::Composing, "Composing reply");
        self.sink.record(ConversationTurn {
            session_id: session_id.to_string(),
            intent,
            capability_responses: responses,
            final_reply: reply.clone(),
            turn_status: status,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        });

        let terminal = if status == TurnStatus::Errored {
            TurnState::Errored
        } else {
            TurnState::Done
        };
        debug!(session_id = %session_id, state = ?terminal, "Turn finished");
        ServerFrame::reply(&reply, status, degraded)
    }
}

/// Build the request payload for one capability call: the intent payload
/// (wrapped if it is not an object), plus accumulated prior results when
/// dispatch is chained.
fn request_payload(
    intent: &Intent,
    prior: Option<&serde_json::Map<String, serde_json::Value>>,
) -> serde_json::Value {
    let mut map = match &intent.payload {
        serde_json::Value::Object(obj) => obj.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut m = serde_json::Map::new();
            m.insert("payload".to_string(), other.clone());
            m
        }
    };
    if let Some(prior) = prior {
        if !prior.is_empty() {
            map.insert(
                "prior_results".to_string(),
                serde_json::Value::Object(prior.clone()),
            );
        }
    }
    serde_json::Value::Object(map)
}

/// A reply payload carrying `error` counts as a capability-level failure;
/// so do timeouts and transport errors. Either way the turn goes on.
fn into_response(
    capability: &str,
    result: colloquy_core::Result<serde_json::Value>,
) -> CapabilityResponse {
    match result {
        Ok(value) => {
            let error = value
                .get("error")
                .and_then(|e| e.as_str())
                .map(|e| e.to_string());
            CapabilityResponse {
                capability: capability.to_string(),
                success: error.is_none(),
                result: value,
                error,
            }
        }
        Err(e) => CapabilityResponse {
            capability: capability.to_string(),
            success: false,
            result: serde_json::Value::Null,
            error: Some(format!("{}", e)),
        },
    }
}

fn render_result(value: &serde_json::Value) -> String {
    for key in ["reply", "text", "message"] {
        if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compose_reply(responses: &[CapabilityResponse], degraded: &[String]) -> String {
    let successes: Vec<String> = responses
        .iter()
        .filter(|r| r.success)
        .map(|r| format!("{}: {}", r.capability, render_result(&r.result)))
        .collect();

    let mut reply = if successes.is_empty() {
        "None of the needed capabilities responded.".to_string()
    } else {
        successes.join("\n")
    };
    if !degraded.is_empty() {
        reply.push_str(&format!(" (unavailable: {})", degraded.join(", ")));
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use colloquy_bus::transport::{BusMessage, BusTransport};
    use colloquy_bus::{serve_capability, CapabilityHandler, InProcessBus};
    use colloquy_core::config::RegistryConfig;
    use colloquy_core::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct FixedClassifier(Intent);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _text: &str, _context: &[TurnSummary]) -> Result<Intent> {
            Ok(self.0.clone())
        }
    }

    struct BrokenClassifier;

    #[async_trait]
    impl Classifier for BrokenClassifier {
        async fn classify(&self, _text: &str, _context: &[TurnSummary]) -> Result<Intent> {
            Err(Error::ClassificationUnavailable("model offline".to_string()))
        }
    }

    /// Transport wrapper counting non-reply publishes, to prove the
    /// clarification path touches the bus zero times.
    struct CountingTransport {
        inner: Arc<InProcessBus>,
        requests: AtomicUsize,
    }

    #[async_trait]
    impl BusTransport for CountingTransport {
        async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
            if !topic.starts_with("reply.") {
                self.requests.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>> {
            self.inner.subscribe(topic).await
        }
    }

    struct Echoing;

    #[async_trait]
    impl CapabilityHandler for Echoing {
        async fn handle(&self, _op: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"reply": "done", "seen": payload}))
        }
    }

    fn fast_config() -> RouterConfig {
        RouterConfig {
            capability_timeout_ms: 100,
            classify_timeout_ms: 100,
            context_turns: 8,
        }
    }

    async fn build_router(
        bus: Arc<dyn BusTransport>,
        classifier: Arc<dyn Classifier>,
        capabilities: &[(&str, &str)],
    ) -> (IntentRouter, Arc<MemorySink>) {
        let registry = Arc::new(CapabilityRegistry::new(RegistryConfig::default()));
        for (name, topic) in capabilities {
            registry
                .register(CapabilityDescriptor::new(name, topic))
                .await;
        }
        let client = Arc::new(BusClient::connect(bus).await.unwrap());
        let sink = Arc::new(MemorySink::new());
        (
            IntentRouter::new(registry, client, classifier, sink.clone(), fast_config()),
            sink,
        )
    }

    #[tokio::test]
    async fn test_partial_success_names_the_failed_capability() {
        let bus = InProcessBus::new();
        // "b" answers; "a" has no provider and will time out.
        serve_capability(bus.clone(), "cap.b", Arc::new(Echoing))
            .await
            .unwrap();

        let intent = Intent::new(IntentKind::Command, 0.9)
            .with_targets(vec!["a".to_string(), "b".to_string()]);
        let (router, sink) = build_router(
            bus,
            Arc::new(FixedClassifier(intent)),
            &[("a", "cap.a"), ("b", "cap.b")],
        )
        .await;

        let frame = router.run_turn("s1", "do both", &[]).await;
        match frame {
            ServerFrame::Reply {
                reply,
                turn_status,
                degraded_capabilities,
            } => {
                assert_eq!(turn_status, TurnStatus::Partial);
                assert_eq!(degraded_capabilities, vec!["a"]);
                assert!(reply.contains("b: done"));
            }
            other => panic!("expected reply, got {:?}", other),
        }

        let turns = sink.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].capability_responses.len(), 2);
        let a = turns[0]
            .capability_responses
            .iter()
            .find(|r| r.capability == "a")
            .unwrap();
        assert!(!a.success);
    }

    #[tokio::test]
    async fn test_clarification_short_circuits_without_bus_traffic() {
        let inner = InProcessBus::new();
        let counting = Arc::new(CountingTransport {
            inner,
            requests: AtomicUsize::new(0),
        });

        let intent = Intent::new(IntentKind::Unclassifiable, 0.2).needs_clarification();
        let (router, _sink) = build_router(
            counting.clone(),
            Arc::new(FixedClassifier(intent)),
            &[("echo", "cap.echo")],
        )
        .await;

        let frame = router.run_turn("s1", "hmm", &[]).await;
        match frame {
            ServerFrame::Reply {
                reply, turn_status, ..
            } => {
                assert_eq!(turn_status, TurnStatus::Answered);
                assert!(reply.contains("more detail"));
            }
            other => panic!("expected reply, got {:?}", other),
        }
        assert_eq!(counting.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_classifier_failure_routes_to_errored() {
        let bus = InProcessBus::new();
        let (router, sink) =
            build_router(bus, Arc::new(BrokenClassifier), &[("echo", "cap.echo")]).await;

        let frame = router.run_turn("s1", "anything", &[]).await;
        match frame {
            ServerFrame::Reply { turn_status, .. } => {
                assert_eq!(turn_status, TurnStatus::Errored)
            }
            other => panic!("expected reply, got {:?}", other),
        }

        let turns = sink.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].turn_status, TurnStatus::Errored);
        assert!(turns[0].capability_responses.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_capability_degrades_gracefully() {
        let bus = InProcessBus::new();
        serve_capability(bus.clone(), "cap.echo", Arc::new(Echoing))
            .await
            .unwrap();

        let intent = Intent::new(IntentKind::Command, 0.9)
            .with_targets(vec!["ghost".to_string(), "echo".to_string()]);
        let (router, _sink) = build_router(
            bus,
            Arc::new(FixedClassifier(intent)),
            &[("echo", "cap.echo")],
        )
        .await;

        let frame = router.run_turn("s1", "go", &[]).await;
        match frame {
            ServerFrame::Reply {
                turn_status,
                degraded_capabilities,
                ..
            } => {
                assert_eq!(turn_status, TurnStatus::Partial);
                assert_eq!(degraded_capabilities, vec!["ghost"]);
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_dispatch_set_falls_back() {
        let bus = InProcessBus::new();
        let intent =
            Intent::new(IntentKind::Command, 0.9).with_targets(vec!["ghost".to_string()]);
        let (router, _sink) = build_router(bus, Arc::new(FixedClassifier(intent)), &[]).await;

        let frame = router.run_turn("s1", "go", &[]).await;
        match frame {
            ServerFrame::Reply {
                reply, turn_status, ..
            } => {
                assert_eq!(turn_status, TurnStatus::Partial);
                assert!(reply.contains("No capability is currently available"));
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chained_dispatch_passes_prior_results() {
        let bus = InProcessBus::new();
        serve_capability(bus.clone(), "cap.first", Arc::new(Echoing))
            .await
            .unwrap();
        serve_capability(bus.clone(), "cap.second", Arc::new(Echoing))
            .await
            .unwrap();

        let intent = Intent::new(IntentKind::Command, 0.9)
            .with_targets(vec!["first".to_string(), "second".to_string()])
            .with_payload(serde_json::json!({"chain": true, "text": "go"}));
        let (router, sink) = build_router(
            bus,
            Arc::new(FixedClassifier(intent)),
            &[("first", "cap.first"), ("second", "cap.second")],
        )
        .await;

        let frame = router.run_turn("s1", "go", &[]).await;
        match frame {
            ServerFrame::Reply { turn_status, .. } => {
                assert_eq!(turn_status, TurnStatus::Answered)
            }
            other => panic!("expected reply, got {:?}", other),
        }

        let turns = sink.turns();
        let second = turns[0]
            .capability_responses
            .iter()
            .find(|r| r.capability == "second")
            .unwrap();
        // The second call saw the first one's result.
        assert!(second.result["seen"]["prior_results"]["first"].is_object());
    }

    #[tokio::test]
    async fn test_status_check_answers_from_registry() {
        let bus = InProcessBus::new();
        let intent = Intent::new(IntentKind::StatusCheck, 0.9);
        let (router, _sink) = build_router(
            bus,
            Arc::new(FixedClassifier(intent)),
            &[("echo", "cap.echo")],
        )
        .await;

        let frame = router.run_turn("s1", "status?", &[]).await;
        match frame {
            ServerFrame::Reply {
                reply, turn_status, ..
            } => {
                assert_eq!(turn_status, TurnStatus::Answered);
                assert!(reply.contains("echo"));
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }
}
