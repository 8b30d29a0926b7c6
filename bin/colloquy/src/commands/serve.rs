use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use colloquy_bus::{serve_capability, BusClient, InProcessBus};
use colloquy_core::config::CapabilityEntry;
use colloquy_core::{CapabilityDescriptor, CapabilityHealth, Config};
use colloquy_registry::CapabilityRegistry;
use colloquy_router::{HeuristicClassifier, IntentRouter, LoggingSink, Orchestrator};
use colloquy_session::SessionManager;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::capabilities::{ClockCapability, EchoCapability};

#[derive(Clone)]
struct GatewayState {
    registry: Arc<CapabilityRegistry>,
    manager: Arc<SessionManager>,
}

pub async fn run(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(config_path.as_deref())?;
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let bus = InProcessBus::new();
    let registry = Arc::new(CapabilityRegistry::new(config.registry.clone()));

    // A bare config still yields a working end-to-end system.
    let entries = if config.capabilities.is_empty() {
        vec![
            CapabilityEntry {
                name: "echo".to_string(),
                bus_topic: "cap.echo".to_string(),
                operations: vec!["say".to_string()],
            },
            CapabilityEntry {
                name: "clock".to_string(),
                bus_topic: "cap.clock".to_string(),
                operations: vec!["now".to_string()],
            },
        ]
    } else {
        config.capabilities.clone()
    };

    let mut capability_names = Vec::new();
    for entry in &entries {
        match entry.name.as_str() {
            "echo" => {
                serve_capability(bus.clone(), &entry.bus_topic, Arc::new(EchoCapability)).await?;
            }
            "clock" => {
                serve_capability(bus.clone(), &entry.bus_topic, Arc::new(ClockCapability)).await?;
            }
            name => {
                // Registered but served elsewhere; the health loop will
                // report whether anyone actually answers its topic.
                warn!(capability = %name, topic = %entry.bus_topic, "No built-in provider, expecting an external one");
            }
        }
        registry
            .register(
                CapabilityDescriptor::new(&entry.name, &entry.bus_topic)
                    .with_operations(entry.operations.clone()),
            )
            .await;
        capability_names.push(entry.name.clone());
    }

    let client = Arc::new(BusClient::connect(bus.clone()).await?);
    let (shutdown_tx, _) = broadcast::channel(4);

    // Background health-check loop.
    {
        let registry = registry.clone();
        let client = client.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            registry.run_health_loop(&client, shutdown_rx).await;
        });
    }

    let (manager, inbound) = SessionManager::new(config.session.clone());
    let router = Arc::new(IntentRouter::new(
        registry.clone(),
        client,
        Arc::new(HeuristicClassifier::new(capability_names)),
        Arc::new(LoggingSink),
        config.router.clone(),
    ));
    let orchestrator = Orchestrator::new(router, manager.clone(), config.router.context_turns);
    {
        let health_events = registry.subscribe_events();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            orchestrator.run(inbound, health_events, shutdown_rx).await;
        });
    }

    let state = GatewayState {
        registry,
        manager: manager.clone(),
    };
    let app = Router::new()
        .route("/ws", get(handle_ws))
        .route("/v1/health", get(handle_health))
        .route("/v1/capabilities", get(handle_capabilities))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx, manager))
        .await?;
    Ok(())
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>, manager: Arc<SessionManager>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down, draining sessions");
    let _ = shutdown_tx.send(());
    manager.shutdown().await;
}

async fn handle_ws(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    colloquy_session::handle_upgrade(ws, state.manager.clone()).await
}

/// GET /v1/health — gateway liveness plus a capability health summary
async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    let capabilities = state.registry.list(None).await;
    let healthy = capabilities
        .iter()
        .filter(|c| c.health == CapabilityHealth::Healthy)
        .count();
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.manager.session_count().await,
        "capabilities": {
            "total": capabilities.len(),
            "healthy": healthy,
        },
    }))
}

#[derive(Deserialize)]
struct CapabilitiesQuery {
    health: Option<String>,
}

/// GET /v1/capabilities — registry snapshot, optionally filtered by health
async fn handle_capabilities(
    State(state): State<GatewayState>,
    Query(query): Query<CapabilitiesQuery>,
) -> impl IntoResponse {
    let filter = match query.health.as_deref() {
        Some("healthy") => Some(CapabilityHealth::Healthy),
        Some("degraded") => Some(CapabilityHealth::Degraded),
        Some("unreachable") => Some(CapabilityHealth::Unreachable),
        Some(other) => {
            return Json(serde_json::json!({
                "error": format!("Unknown health filter: {}", other)
            }))
        }
        None => None,
    };
    Json(serde_json::json!({
        "capabilities": state.registry.list(filter).await
    }))
}
