pub mod classify;
pub mod orchestrator;
pub mod router;
pub mod sink;

pub use classify::{Classifier, HeuristicClassifier};
pub use orchestrator::Orchestrator;
pub use router::IntentRouter;
pub use sink::{LoggingSink, MemorySink, TurnSink};
