//! Display fan-out: bounded display channel -> broadcast -> websocket.
//!
//! Per-user filtering runs here, off the hot dispatch path: each
//! websocket connection holds its own `FilterConfig` snapshot and can
//! replace it at any time by sending a new config document.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    routing::get,
    Json, Router,
};
use crossbeam::channel::Receiver;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::detectors::PressureTracker;
use crate::filters::{accepts, FilterConfig};
use crate::queue::EventQueue;
use crate::workers::{DisplayRecord, WorkerPool};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<EventQueue>,
    pub pool: Arc<WorkerPool>,
    pub pressure: Arc<PressureTracker>,
    pub display_broadcast: broadcast::Sender<DisplayRecord>,
}

/// Bridge the workers' bounded display channel into a tokio broadcast
/// for websocket subscribers. Runs on its own thread; exits when the
/// producers hang up.
pub fn run_display_pump(
    rx: Receiver<DisplayRecord>,
    tx: broadcast::Sender<DisplayRecord>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("display-pump".into())
        .spawn(move || {
            while let Ok(record) = rx.recv() {
                // No subscribers is fine; the stream is best-effort.
                let _ = tx.send(record);
            }
            debug!("display pump stopped");
        })
        .expect("spawn display pump")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "tickstock core operational"
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "queue": state.queue.stats(),
        "drop_analysis": state.queue.drop_analysis(),
        "workers": state.pool.health(),
        "pressure": state.pressure.metrics(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.display_broadcast.subscribe();
    let mut filters = FilterConfig::default();
    info!("websocket subscriber connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(record) => {
                        if !accepts(&filters, &record.event) {
                            continue;
                        }
                        let text = record.transport.to_string();
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket subscriber lagged, events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        if text == "ping" {
                            let _ = socket.send(Message::Text("pong".into())).await;
                            continue;
                        }
                        // Any other text is treated as a filter config
                        // document; invalid configs are reported back and
                        // the previous snapshot stays active.
                        match serde_json::from_str::<Value>(&text)
                            .map_err(|e| crate::events::ValidationError::new("filters", e.to_string()))
                            .and_then(|v| FilterConfig::from_value(&v))
                        {
                            Ok(config) => {
                                filters = config;
                                let ack = json!({"type": "filters_applied"});
                                let _ = socket.send(Message::Text(ack.to_string())).await;
                            }
                            Err(e) => {
                                let err = json!({"type": "filter_error", "error": e.to_string()});
                                let _ = socket.send(Message::Text(err.to_string())).await;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
    debug!("websocket subscriber disconnected");
}
