use serde::{Deserialize, Serialize};

/// Coarse intent category produced by the classifier boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Command,
    Question,
    StatusCheck,
    CapabilityRequest,
    Discussion,
    Unclassifiable,
}

/// One classified utterance. Produced once per inbound message, immutable
/// afterwards; the router only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// Capability names to dispatch to, in declaration order.
    #[serde(default)]
    pub target_capabilities: Vec<String>,
    /// Opaque structured arguments forwarded to each capability.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When set, the router skips dispatch and replies with a
    /// clarification prompt instead.
    #[serde(default)]
    pub requires_clarification: bool,
}

impl Intent {
    pub fn new(kind: IntentKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence,
            target_capabilities: Vec::new(),
            payload: serde_json::Value::Null,
            requires_clarification: false,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target_capabilities = targets;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn needs_clarification(mut self) -> Self {
        self.requires_clarification = true;
        self
    }

    /// True when the payload asks for sequential dispatch, each later
    /// capability seeing the accumulated results of earlier ones.
    pub fn is_chained(&self) -> bool {
        self.payload
            .get("chain")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
