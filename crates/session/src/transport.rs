use async_trait::async_trait;
use colloquy_core::{ClientFrame, Error, Result, ServerFrame};
use tokio::sync::mpsc;

/// Outbound half of a duplex session connection.
#[async_trait]
pub trait SessionSender: Send + 'static {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<()>;
}

/// Inbound half of a duplex session connection. `None` means the peer
/// closed the connection.
#[async_trait]
pub trait SessionReceiver: Send + 'static {
    async fn next_frame(&mut self) -> Option<Result<ClientFrame>>;
}

/// A duplex connection the session manager can drive. Implementations
/// wrap a concrete socket (WebSocket, in-process channel pair) and split
/// into independently-owned halves, one per pump task.
pub trait SessionTransport: Send + 'static {
    type Sender: SessionSender;
    type Receiver: SessionReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver);
}

/// In-process transport over a pair of channels. Used by tests and by
/// embedded clients living in the same process as the gateway.
pub struct ChannelTransport {
    pub inbound: mpsc::Receiver<ClientFrame>,
    pub outbound: mpsc::Sender<ServerFrame>,
}

impl ChannelTransport {
    /// Build a connected (server-side transport, client-side handles) pair.
    pub fn pair(buffer: usize) -> (Self, ChannelClient) {
        let (client_tx, server_rx) = mpsc::channel(buffer);
        let (server_tx, client_rx) = mpsc::channel(buffer);
        (
            Self {
                inbound: server_rx,
                outbound: server_tx,
            },
            ChannelClient {
                tx: client_tx,
                rx: client_rx,
            },
        )
    }
}

/// Client-side handles of a [`ChannelTransport`] pair.
pub struct ChannelClient {
    pub tx: mpsc::Sender<ClientFrame>,
    pub rx: mpsc::Receiver<ServerFrame>,
}

pub struct ChannelSender(mpsc::Sender<ServerFrame>);

pub struct ChannelReceiver(mpsc::Receiver<ClientFrame>);

impl SessionTransport for ChannelTransport {
    type Sender = ChannelSender;
    type Receiver = ChannelReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (ChannelSender(self.outbound), ChannelReceiver(self.inbound))
    }
}

#[async_trait]
impl SessionSender for ChannelSender {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<()> {
        self.0
            .send(frame.clone())
            .await
            .map_err(|_| Error::SessionGone("peer hung up".to_string()))
    }
}

#[async_trait]
impl SessionReceiver for ChannelReceiver {
    async fn next_frame(&mut self) -> Option<Result<ClientFrame>> {
        self.0.recv().await.map(Ok)
    }
}
