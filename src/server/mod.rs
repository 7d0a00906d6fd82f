//! Server bootstrap: axum router, CORS/trace layers, and the idle-session
//! sweeper.

pub mod auth;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::adapters::llm::LlmAdapter;
use crate::adapters::stt::SttAdapter;
use crate::config::Config;
use crate::persistence::PersistenceSink;
use crate::session::{ControlMessage, SessionRegistry};

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub stt_adapter: Arc<dyn SttAdapter>,
    pub llm_adapter: Arc<dyn LlmAdapter>,
    pub persistence: Arc<dyn PersistenceSink>,
}

pub async fn start(
    config: Config,
    stt_adapter: Arc<dyn SttAdapter>,
    llm_adapter: Arc<dyn LlmAdapter>,
    persistence: Arc<dyn PersistenceSink>,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let state = ServerState {
        config: config.clone(),
        sessions: SessionRegistry::new(),
        stt_adapter,
        llm_adapter,
        persistence,
    };

    spawn_idle_sweeper(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws/stream", get(ws::ws_handler))
        .route("/healthz", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: std::net::SocketAddr = config.server.bind_addr.parse()?;
    info!(%addr, "conversation orchestrator listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<ServerState>,
) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "activeSessions": state.sessions.len(),
    }))
}

/// Periodically ends sessions idle past the configured timeout. Runs for
/// the lifetime of the process.
fn spawn_idle_sweeper(state: ServerState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            let expired = state.sessions.expired(now_ms, state.config.session.idle_timeout_ms);
            for id in expired {
                if let Some(handle) = state.sessions.remove(&id) {
                    let _ = handle.control_tx.send(ControlMessage::End).await;
                }
            }
        }
    });
}
