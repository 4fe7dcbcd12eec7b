// Websocket client for the relay
// Reader and writer run as tasks; the event loop talks to them over channels

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::transport::{RelayDelivery, RelayEnvelope, RelayEvent};

pub struct RelayConnection {
    outgoing: mpsc::UnboundedSender<RelayEnvelope>,
    incoming: mpsc::UnboundedReceiver<RelayEvent>,
}

impl RelayConnection {
    pub fn send(&self, envelope: RelayEnvelope) {
        if self.outgoing.send(envelope).is_err() {
            warn!("Relay writer is gone, dropping envelope");
        }
    }

    /// Next relay event; `None` once the reader has stopped
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.incoming.recv().await
    }
}

/// `ws://relay/<name>` for a base URL and a local name
pub fn relay_endpoint(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Register `name` with the relay and start forwarding
///
/// The first event delivered is always `RelayEvent::Connected`.
pub async fn connect(base_url: &str, name: &str) -> Result<RelayConnection> {
    let url = relay_endpoint(base_url, name);
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to relay {}", url))?;
    info!("Connected to relay at {}", url);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayEnvelope>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let _ = in_tx.send(RelayEvent::Connected);

    tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode relay envelope: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(text)).await {
                warn!("Relay send failed: {}", e);
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = ws_stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<RelayDelivery>(&text) {
                    Ok(delivery) => {
                        if in_tx.send(delivery.into()).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Dropping malformed relay frame: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(other) => debug!("Ignoring non-text relay frame: {:?}", other),
                Err(e) => {
                    warn!("Relay receive failed: {}", e);
                    break;
                }
            }
        }
        let _ = in_tx.send(RelayEvent::Disconnected);
    });

    Ok(RelayConnection {
        outgoing: out_tx,
        incoming: in_rx,
    })
}
