pub mod manager;
pub mod transport;
pub mod ws;

pub use manager::{InboundUtterance, SessionEvent, SessionInfo, SessionManager, SessionState};
pub use transport::{
    ChannelClient, ChannelTransport, SessionReceiver, SessionSender, SessionTransport,
};
pub use ws::{handle_upgrade, WsTransport};
