use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use colloquy_core::{ClientFrame, Error, Result, ServerFrame};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::warn;

use crate::manager::SessionManager;
use crate::transport::{SessionReceiver, SessionSender, SessionTransport};

/// WebSocket-backed session transport. Typed frames travel as JSON text;
/// plain text that fails to parse is treated as a chat utterance so bare
/// clients (wscat and friends) still work.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

pub struct WsSender(SplitSink<WebSocket, WsMessage>);

pub struct WsReceiver(SplitStream<WebSocket>);

impl SessionTransport for WsTransport {
    type Sender = WsSender;
    type Receiver = WsReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        let (sink, stream) = self.socket.split();
        (WsSender(sink), WsReceiver(stream))
    }
}

#[async_trait]
impl SessionSender for WsSender {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.0
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::SessionGone(format!("{}", e)))
    }
}

#[async_trait]
impl SessionReceiver for WsReceiver {
    async fn next_frame(&mut self) -> Option<Result<ClientFrame>> {
        while let Some(msg) = self.0.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    let frame = serde_json::from_str::<ClientFrame>(&text)
                        .unwrap_or(ClientFrame::Chat { text });
                    return Some(Ok(frame));
                }
                Ok(WsMessage::Close(_)) => return None,
                // Transport-level ping/pong and binary frames are not part
                // of the session protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(Error::Other(format!("websocket error: {}", e)))),
            }
        }
        None
    }
}

/// Axum route handler for the `/ws` endpoint.
pub async fn handle_upgrade(
    ws: WebSocketUpgrade,
    manager: Arc<SessionManager>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = manager.accept(WsTransport::new(socket)).await {
            warn!(error = %e, "WebSocket session rejected");
        }
    })
}
