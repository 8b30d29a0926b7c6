use async_trait::async_trait;
use colloquy_core::{Intent, IntentKind, Result, TurnSummary};

/// Classification boundary. The real implementation may sit behind a
/// remote model call; the core only sees this contract. A failure maps to
/// `Error::ClassificationUnavailable` and routes the turn to errored.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, context: &[TurnSummary]) -> Result<Intent>;
}

/// Keyword classifier used as the default wiring. It recognizes the
/// registered capability names in the utterance and leans on punctuation
/// for the rest. Good enough to drive the router end to end; anything
/// smarter belongs behind the same trait, outside this crate.
pub struct HeuristicClassifier {
    capabilities: Vec<String>,
}

impl HeuristicClassifier {
    pub fn new(capabilities: Vec<String>) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn classify(&self, text: &str, _context: &[TurnSummary]) -> Result<Intent> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Intent::new(IntentKind::Unclassifiable, 0.0).needs_clarification());
        }

        let lower = trimmed.to_lowercase();
        let targets: Vec<String> = self
            .capabilities
            .iter()
            .filter(|name| lower.contains(name.to_lowercase().as_str()))
            .cloned()
            .collect();

        let kind = if lower.contains("status") || lower.contains("health") {
            IntentKind::StatusCheck
        } else if !targets.is_empty() {
            IntentKind::Command
        } else if trimmed.ends_with('?') {
            IntentKind::Question
        } else {
            IntentKind::Discussion
        };

        let confidence = if targets.is_empty() { 0.4 } else { 0.9 };
        Ok(Intent::new(kind, confidence)
            .with_targets(targets)
            .with_payload(serde_json::json!({ "text": trimmed })))
    }
}
