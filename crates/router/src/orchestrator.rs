use colloquy_core::{ServerFrame, TurnStatus, TurnSummary};
use colloquy_registry::HealthEvent;
use colloquy_session::{InboundUtterance, SessionEvent, SessionManager};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::router::IntentRouter;

const WORKER_QUEUE: usize = 32;

struct Worker {
    tx: mpsc::Sender<String>,
    handle: tokio::task::JoinHandle<()>,
}

/// Ties the session manager to the intent router: one serial worker task
/// per session keeps replies in utterance order, while sessions proceed
/// independently of each other. Closing a session aborts its worker,
/// which drops any in-flight bus requests and frees their correlation ids
/// immediately.
pub struct Orchestrator {
    router: Arc<IntentRouter>,
    manager: Arc<SessionManager>,
    context_turns: usize,
}

impl Orchestrator {
    pub fn new(
        router: Arc<IntentRouter>,
        manager: Arc<SessionManager>,
        context_turns: usize,
    ) -> Self {
        Self {
            router,
            manager,
            context_turns,
        }
    }

    /// Main loop: route inbound utterances to per-session workers, tear
    /// workers down as sessions close, and push capability-health changes
    /// to every connected session.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundUtterance>,
        mut health_events: broadcast::Receiver<HealthEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut lifecycle = self.manager.subscribe_lifecycle();
        let mut workers: HashMap<String, Worker> = HashMap::new();
        let mut health_open = true;
        info!("Orchestrator started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = lifecycle.recv() => {
                    if let Ok(SessionEvent::Closed { session_id }) = event {
                        if let Some(worker) = workers.remove(&session_id) {
                            worker.handle.abort();
                            debug!(session_id = %session_id, "Turn worker stopped");
                        }
                    }
                }
                event = health_events.recv(), if health_open => {
                    match event {
                        Ok(event) => {
                            let frame = ServerFrame::Event {
                                event: "capability_health".to_string(),
                                detail: serde_json::json!({
                                    "capability": event.capability,
                                    "from": event.from,
                                    "to": event.to,
                                }),
                            };
                            self.manager.broadcast(frame, |_| true).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => health_open = false,
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                    }
                }
                msg = inbound.recv() => {
                    match msg {
                        None => break,
                        Some((session_id, text)) => {
                            let worker = workers
                                .entry(session_id.clone())
                                .or_insert_with(|| self.spawn_worker(session_id.clone()));

                            // Never block the routing loop on one slow
                            // session; a full queue answers immediately.
                            if worker.tx.try_send(text).is_err() {
                                warn!(session_id = %session_id, "Turn queue full, utterance rejected");
                                let manager = self.manager.clone();
                                tokio::spawn(async move {
                                    manager
                                        .send(
                                            &session_id,
                                            ServerFrame::reply(
                                                "I'm still working through your earlier messages — please try again shortly.",
                                                TurnStatus::Errored,
                                                Vec::new(),
                                            ),
                                        )
                                        .await;
                                });
                            }
                        }
                    }
                }
            }
        }

        for (_, worker) in workers {
            worker.handle.abort();
        }
        info!("Orchestrator stopped");
    }

    fn spawn_worker(&self, session_id: String) -> Worker {
        let (tx, mut rx) = mpsc::channel::<String>(WORKER_QUEUE);
        let router = self.router.clone();
        let manager = self.manager.clone();
        let context_turns = self.context_turns;

        debug!(session_id = %session_id, "Turn worker started");
        let handle = tokio::spawn(async move {
            let mut context: VecDeque<TurnSummary> = VecDeque::new();
            while let Some(text) = rx.recv().await {
                let snapshot: Vec<TurnSummary> = context.iter().cloned().collect();
                let frame = router.run_turn(&session_id, &text, &snapshot).await;

                if let ServerFrame::Reply { reply, .. } = &frame {
                    context.push_back(TurnSummary {
                        text: text.clone(),
                        reply: reply.clone(),
                    });
                    while context.len() > context_turns {
                        context.pop_front();
                    }
                }
                manager.send(&session_id, frame).await;
            }
        });

        Worker { tx, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::HeuristicClassifier;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use colloquy_bus::{serve_capability, BusClient, CapabilityHandler, InProcessBus};
    use colloquy_core::config::{RegistryConfig, RouterConfig, SessionConfig};
    use colloquy_core::{CapabilityDescriptor, ClientFrame, Result};
    use colloquy_registry::CapabilityRegistry;
    use colloquy_session::{ChannelClient, ChannelTransport};
    use std::time::Duration;

    struct SlowThenEcho {
        delay_ms: u64,
    }

    #[async_trait]
    impl CapabilityHandler for SlowThenEcho {
        async fn handle(&self, _op: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            let text = payload
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(serde_json::json!({"reply": format!("handled '{}'", text)}))
        }
    }

    struct Stack {
        manager: Arc<SessionManager>,
        shutdown_tx: broadcast::Sender<()>,
    }

    async fn start_stack(capabilities: &[(&str, &str, u64)]) -> Stack {
        let bus = InProcessBus::new();
        let registry = Arc::new(CapabilityRegistry::new(RegistryConfig::default()));
        let mut names = Vec::new();
        for (name, topic, delay_ms) in capabilities {
            serve_capability(
                bus.clone(),
                topic,
                Arc::new(SlowThenEcho {
                    delay_ms: *delay_ms,
                }),
            )
            .await
            .unwrap();
            registry
                .register(CapabilityDescriptor::new(name, topic))
                .await;
            names.push(name.to_string());
        }

        let client = Arc::new(BusClient::connect(bus).await.unwrap());
        let router = Arc::new(IntentRouter::new(
            registry.clone(),
            client,
            Arc::new(HeuristicClassifier::new(names)),
            Arc::new(MemorySink::new()),
            RouterConfig {
                capability_timeout_ms: 2000,
                classify_timeout_ms: 500,
                context_turns: 8,
            },
        ));

        let (manager, inbound) = SessionManager::new(SessionConfig::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let health_events = registry.subscribe_events();
        let orchestrator = Orchestrator::new(router, manager.clone(), 8);
        tokio::spawn(async move {
            orchestrator.run(inbound, health_events, shutdown_rx).await;
        });

        Stack {
            manager,
            shutdown_tx,
        }
    }

    async fn connect(stack: &Stack) -> ChannelClient {
        let (transport, mut client) = ChannelTransport::pair(32);
        client.tx.send(ClientFrame::Hello).await.unwrap();
        stack.manager.accept(transport).await.unwrap();
        // Consume the welcome.
        match client.rx.recv().await.unwrap() {
            ServerFrame::Welcome { .. } => {}
            other => panic!("expected welcome, got {:?}", other),
        }
        client
    }

    async fn next_reply(client: &mut ChannelClient) -> (String, TurnStatus) {
        loop {
            match client.rx.recv().await.expect("connection closed") {
                ServerFrame::Reply {
                    reply, turn_status, ..
                } => return (reply, turn_status),
                // Pings and events may interleave with replies.
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_end_to_end_turn() {
        let stack = start_stack(&[("echo", "cap.echo", 0)]).await;
        let mut client = connect(&stack).await;

        client
            .tx
            .send(ClientFrame::Chat {
                text: "echo hello".to_string(),
            })
            .await
            .unwrap();

        let (reply, status) = next_reply(&mut client).await;
        assert_eq!(status, TurnStatus::Answered);
        assert!(reply.contains("handled 'echo hello'"));
        let _ = stack.shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_replies_preserve_utterance_order_within_session() {
        // The first utterance takes much longer than the second; replies
        // must still come back in submission order.
        let stack = start_stack(&[("tortoise", "cap.tortoise", 300), ("hare", "cap.hare", 0)]).await;
        let mut client = connect(&stack).await;

        client
            .tx
            .send(ClientFrame::Chat {
                text: "tortoise first".to_string(),
            })
            .await
            .unwrap();
        client
            .tx
            .send(ClientFrame::Chat {
                text: "hare second".to_string(),
            })
            .await
            .unwrap();

        let (first, _) = next_reply(&mut client).await;
        let (second, _) = next_reply(&mut client).await;
        assert!(first.contains("tortoise first"), "got: {}", first);
        assert!(second.contains("hare second"), "got: {}", second);
        let _ = stack.shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_sessions_do_not_block_each_other() {
        let stack = start_stack(&[("tortoise", "cap.tortoise", 500), ("hare", "cap.hare", 0)]).await;
        let mut slow_client = connect(&stack).await;
        let mut fast_client = connect(&stack).await;

        slow_client
            .tx
            .send(ClientFrame::Chat {
                text: "tortoise crawl".to_string(),
            })
            .await
            .unwrap();
        fast_client
            .tx
            .send(ClientFrame::Chat {
                text: "hare run".to_string(),
            })
            .await
            .unwrap();

        // The fast session's reply must not wait for the slow session's
        // 500ms capability call.
        let (reply, _) = tokio::time::timeout(
            Duration::from_millis(300),
            next_reply(&mut fast_client),
        )
        .await
        .expect("fast session was starved by the slow one");
        assert!(reply.contains("hare run"));
        let _ = stack.shutdown_tx.send(());
    }
}
