use colloquy_core::config::SessionConfig;
use colloquy_core::{ClientFrame, Error, Result, ServerFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{SessionReceiver, SessionSender, SessionTransport};

/// Liveness state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle notifications for downstream consumers (the orchestrator
/// tears down a session's turn worker on `Closed`).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened { session_id: String },
    Closed { session_id: String },
}

/// Snapshot of one session's metadata, as seen by broadcast predicates.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub opened_at_ms: i64,
    pub last_activity_ms: i64,
}

/// One inbound utterance: which session said what.
pub type InboundUtterance = (String, String);

struct Handle {
    outbound_tx: mpsc::Sender<ServerFrame>,
    cancel: CancellationToken,
    state: std::sync::Mutex<SessionState>,
    opened_at_ms: i64,
    last_activity_ms: Arc<AtomicI64>,
}

struct Inner {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, Handle>>,
    inbound_tx: mpsc::Sender<InboundUtterance>,
    lifecycle: broadcast::Sender<SessionEvent>,
}

impl Inner {
    async fn finish_session(&self, session_id: &str) {
        if let Some(handle) = self.sessions.write().await.remove(session_id) {
            *handle.state.lock().unwrap() = SessionState::Closed;
            handle.cancel.cancel();
            let _ = self.lifecycle.send(SessionEvent::Closed {
                session_id: session_id.to_string(),
            });
            info!(session_id = %session_id, "Session closed");
        }
    }
}

/// Owns every live session: accepts connections, pumps frames both ways,
/// probes idle peers, and feeds all inbound utterances into one shared
/// queue so no session can starve another.
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Returns the manager and the inbound utterance stream. The stream is
    /// infinite and fair across sessions; a reconnect shows up as a new
    /// session id.
    pub fn new(config: SessionConfig) -> (Arc<Self>, mpsc::Receiver<InboundUtterance>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (lifecycle, _) = broadcast::channel(64);
        (
            Arc::new(Self {
                inner: Arc::new(Inner {
                    config,
                    sessions: RwLock::new(HashMap::new()),
                    inbound_tx,
                    lifecycle,
                }),
            }),
            inbound_rx,
        )
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Register a new connection. The session stays `connecting` until the
    /// client's `hello` arrives; if the opening sequence does not complete
    /// within the configured grace period this fails with
    /// `Error::Handshake` and nothing is registered.
    pub async fn accept<T: SessionTransport>(&self, transport: T) -> Result<String> {
        let (mut sender, mut receiver) = transport.split();

        let grace = Duration::from_millis(self.inner.config.handshake_grace_ms);
        match tokio::time::timeout(grace, receiver.next_frame()).await {
            Ok(Some(Ok(ClientFrame::Hello))) => {}
            Ok(Some(Ok(_))) => {
                return Err(Error::Handshake(
                    "expected hello as the first frame".to_string(),
                ))
            }
            Ok(Some(Err(e))) => return Err(Error::Handshake(format!("transport error: {}", e))),
            Ok(None) => {
                return Err(Error::Handshake(
                    "connection closed before hello".to_string(),
                ))
            }
            Err(_) => {
                return Err(Error::Handshake(
                    "no hello within the grace period".to_string(),
                ))
            }
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        sender
            .send_frame(&ServerFrame::Welcome {
                session_id: session_id.clone(),
            })
            .await
            .map_err(|e| Error::Handshake(format!("welcome not delivered: {}", e)))?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.inner.config.outbound_queue);
        let cancel = CancellationToken::new();
        let last_activity_ms = Arc::new(AtomicI64::new(now_ms));

        self.inner.sessions.write().await.insert(
            session_id.clone(),
            Handle {
                outbound_tx: outbound_tx.clone(),
                cancel: cancel.clone(),
                state: std::sync::Mutex::new(SessionState::Open),
                opened_at_ms: now_ms,
                last_activity_ms: last_activity_ms.clone(),
            },
        );

        tokio::spawn(send_loop(
            sender,
            outbound_rx,
            cancel.clone(),
            session_id.clone(),
        ));
        tokio::spawn(receive_loop(
            self.inner.clone(),
            session_id.clone(),
            receiver,
            outbound_tx,
            cancel,
            last_activity_ms,
        ));

        let _ = self.inner.lifecycle.send(SessionEvent::Opened {
            session_id: session_id.clone(),
        });
        info!(session_id = %session_id, "Session open");
        Ok(session_id)
    }

    /// Enqueue an outbound frame. A dead or unknown session is logged and
    /// swallowed — the caller can do nothing useful about it.
    pub async fn send(&self, session_id: &str, frame: ServerFrame) {
        let tx = self
            .inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|h| h.outbound_tx.clone());

        let gone = match tx {
            Some(tx) => tx.send(frame).await.is_err(),
            None => true,
        };
        if gone {
            debug!(
                session_id = %session_id,
                "Dropping outbound frame: {}",
                Error::SessionGone(session_id.to_string())
            );
        }
    }

    /// Send to every session whose metadata matches `predicate`. Used for
    /// system-health pushes.
    pub async fn broadcast<F>(&self, frame: ServerFrame, predicate: F)
    where
        F: Fn(&SessionInfo) -> bool,
    {
        let targets: Vec<mpsc::Sender<ServerFrame>> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .iter()
                .filter(|(id, h)| {
                    predicate(&SessionInfo {
                        session_id: (*id).clone(),
                        opened_at_ms: h.opened_at_ms,
                        last_activity_ms: h.last_activity_ms.load(Ordering::Relaxed),
                    })
                })
                .map(|(_, h)| h.outbound_tx.clone())
                .collect()
        };
        for tx in targets {
            // Best effort: a slow session misses a push rather than
            // stalling the broadcast.
            let _ = tx.try_send(frame.clone());
        }
    }

    /// Ask a session to close. In-flight work for the session is cancelled
    /// via its token; the pump tasks unwind and release its resources.
    pub async fn close(&self, session_id: &str) {
        let sessions = self.inner.sessions.read().await;
        if let Some(handle) = sessions.get(session_id) {
            *handle.state.lock().unwrap() = SessionState::Closing;
            handle.cancel.cancel();
        }
    }

    /// Close every session and stop accepting work.
    pub async fn shutdown(&self) {
        let sessions = self.inner.sessions.read().await;
        for handle in sessions.values() {
            *handle.state.lock().unwrap() = SessionState::Closing;
            handle.cancel.cancel();
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_open(&self, session_id: &str) -> bool {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|h| *h.state.lock().unwrap() == SessionState::Open)
            .unwrap_or(false)
    }

    /// Token cancelled when the session goes away; turn drivers tie their
    /// in-flight bus requests to it.
    pub async fn cancel_token(&self, session_id: &str) -> Option<CancellationToken> {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|h| h.cancel.clone())
    }
}

async fn send_loop<S: SessionSender>(
    mut sender: S,
    mut outbound_rx: mpsc::Receiver<ServerFrame>,
    cancel: CancellationToken,
    session_id: String,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sender.send_frame(&frame).await {
                        debug!(session_id = %session_id, error = %e, "Outbound send failed");
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

async fn receive_loop<R: SessionReceiver>(
    inner: Arc<Inner>,
    session_id: String,
    mut receiver: R,
    outbound_tx: mpsc::Sender<ServerFrame>,
    cancel: CancellationToken,
    last_activity_ms: Arc<AtomicI64>,
) {
    let mut probe_timer = tokio::time::interval(Duration::from_secs(inner.config.probe_idle_secs));
    probe_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    probe_timer.tick().await; // first tick is immediate

    let mut missed_probes: u32 = 0;
    let mut active_since_tick = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = receiver.next_frame() => {
                match frame {
                    None => break,
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "Receive error");
                        break;
                    }
                    Some(Ok(frame)) => {
                        last_activity_ms
                            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                        active_since_tick = true;
                        missed_probes = 0;
                        match frame {
                            ClientFrame::Chat { text } => {
                                if inner
                                    .inbound_tx
                                    .send((session_id.clone(), text))
                                    .await
                                    .is_err()
                                {
                                    // Orchestrator gone; nothing left to do.
                                    break;
                                }
                            }
                            ClientFrame::Pong => {}
                            ClientFrame::Hello => {
                                debug!(session_id = %session_id, "Duplicate hello ignored");
                            }
                        }
                    }
                }
            }
            _ = probe_timer.tick() => {
                if active_since_tick {
                    active_since_tick = false;
                    continue;
                }
                if missed_probes >= inner.config.max_missed_probes {
                    info!(
                        session_id = %session_id,
                        missed = missed_probes,
                        "Liveness failure, closing session"
                    );
                    break;
                }
                let _ = outbound_tx.try_send(ServerFrame::Ping);
                missed_probes += 1;
            }
        }
    }

    inner.finish_session(&session_id).await;
}
