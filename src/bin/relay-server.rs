// Websocket relay for peerworld signaling
// A client connects to ws://host:port/<name>; {"to", "message"} frames are
// forwarded to the named client as {"from", "message"}
//
// Usage: cargo run --bin relay-server -- --addr 0.0.0.0:8080

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use peerworld::logging;
use peerworld::transport::{RelayDelivery, RelayEnvelope};

type Registry = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>>;

#[derive(Parser, Debug)]
#[command(name = "relay-server", about = "Name-addressed websocket relay")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_file.as_deref(), "info")?;

    let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
    let app = Router::new()
        .route("/:name", get(upgrade))
        .with_state(registry);

    let listener = TcpListener::bind(&args.addr).await?;
    info!("Relay listening on {}", args.addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    State(registry): State<Registry>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, name, registry))
}

async fn handle_socket(socket: WebSocket, name: String, registry: Registry) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    {
        let mut peers = registry.write().await;
        if peers.contains_key(&name) {
            warn!(%name, "Name already registered, refusing connection");
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
        peers.insert(name.clone(), tx);
    }
    info!(%name, "Client registered");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(%name, "Receive failed: {}", e);
                break;
            }
        };
        let envelope = match serde_json::from_str::<RelayEnvelope>(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%name, "Dropping malformed envelope: {}", e);
                continue;
            }
        };
        forward(&registry, &name, envelope).await;
    }

    registry.write().await.remove(&name);
    send_task.abort();
    info!(%name, "Client disconnected");
}

/// Rewrite an envelope from `from` into a delivery for its target
fn delivery_for(from: &str, envelope: RelayEnvelope) -> (String, RelayDelivery) {
    (
        envelope.to,
        RelayDelivery {
            from: from.to_string(),
            message: envelope.message,
        },
    )
}

async fn forward(registry: &Registry, from: &str, envelope: RelayEnvelope) {
    let (to, delivery) = delivery_for(from, envelope);
    let text = match serde_json::to_string(&delivery) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode delivery: {}", e);
            return;
        }
    };
    let peers = registry.read().await;
    match peers.get(&to) {
        Some(target) => {
            if target.send(Message::Text(text)).is_err() {
                warn!(%from, %to, "Target connection is closing, message dropped");
            } else {
                debug!(%from, %to, "Forwarded");
            }
        }
        None => warn!(%from, %to, "Unknown target, message dropped"),
    }
}
