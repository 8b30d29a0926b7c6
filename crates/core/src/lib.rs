pub mod capability;
pub mod config;
pub mod error;
pub mod intent;
pub mod message;

pub use capability::{CapabilityDescriptor, CapabilityHealth};
pub use config::Config;
pub use error::{Error, Result};
pub use intent::{Intent, IntentKind};
pub use message::{
    BusEnvelope, CapabilityResponse, ClientFrame, ConversationTurn, ServerFrame, TurnStatus,
    TurnSummary,
};
