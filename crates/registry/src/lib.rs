pub mod registry;

pub use registry::{CapabilityRegistry, HealthEvent};
