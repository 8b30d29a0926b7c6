use colloquy_core::ConversationTurn;
use std::sync::Mutex;
use tracing::debug;

/// Persistence boundary. One completed turn per call, fire-and-forget:
/// the router never blocks on (or learns about) storage.
pub trait TurnSink: Send + Sync {
    fn record(&self, turn: ConversationTurn);
}

/// Default sink: completed turns go to the log and nowhere else.
pub struct LoggingSink;

impl TurnSink for LoggingSink {
    fn record(&self, turn: ConversationTurn) {
        debug!(
            session_id = %turn.session_id,
            turn_status = ?turn.turn_status,
            capabilities = turn.capability_responses.len(),
            "Turn completed"
        );
    }
}

/// Collects turns in memory. For tests and embedded inspection.
#[derive(Default)]
pub struct MemorySink {
    turns: Mutex<Vec<ConversationTurn>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().unwrap().clone()
    }
}

impl TurnSink for MemorySink {
    fn record(&self, turn: ConversationTurn) {
        self.turns.lock().unwrap().push(turn);
    }
}
