pub mod client;
pub mod memory;
pub mod responder;
pub mod transport;

pub use client::BusClient;
pub use memory::InProcessBus;
pub use responder::{serve_capability, CapabilityHandler};
pub use transport::{BusMessage, BusTransport};
