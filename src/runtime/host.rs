// Host event loop: authoritative world + one str0m connection per joiner

use std::sync::mpsc::Receiver;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::relay_socket::{self, RelayConnection};
use super::{fire_timeouts, route_datagram, udp, wake_at, DATAGRAM_BUFFER};
use crate::config::Config;
use crate::transport::rtc::RtcFactory;
use crate::transport::{ChannelKind, EventKind, Payload, PeerId, TransportEvent, TransportServer};
use crate::world::server::ReportOutcome;
use crate::world::{Recipient, ServerOutput, ServerWorld};

type HostTransport = TransportServer<RtcFactory>;

/// A fault-delayed snapshot whose timer has fired
struct DelayedSnapshot {
    to: PeerId,
    payload: Vec<u8>,
}

pub async fn run_host(config: Config, name: String) -> Result<()> {
    let map = config.build_map()?;
    let ice = udp::bind(&config.network.stun_server).await?;

    let factory = RtcFactory::new(ice.candidates.clone(), config.network.unreliable_max_retention_ms);
    let mut transport = TransportServer::new(factory);
    let events = transport.subscribe(&[
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::UnreliableBinary,
    ]);

    let mut relay = relay_socket::connect(&config.network.relay_url, &name).await?;
    let mut relay_open = true;

    let settings = config.server_settings();
    if let Some(faults) = &settings.faults {
        warn!(
            drop_probability = faults.drop_probability,
            max_delay_ms = faults.max_delay.as_millis() as u64,
            "Fault injection enabled for snapshot broadcasts"
        );
    }
    let mut world = ServerWorld::new(map, settings);

    let mut tick = tokio::time::interval(config.simulation.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let (delayed_tx, mut delayed_rx) = mpsc::unbounded_channel::<DelayedSnapshot>();
    let mut buf = vec![0u8; DATAGRAM_BUFFER];

    info!(%name, addr = %ice.local_addr, "Hosting; joiners connect with --server {}", name);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let wake = wake_at(transport.peers().map(|peer| peer.backend()));

        tokio::select! {
            event = relay.recv(), if relay_open => match event {
                Some(event) => transport.handle_relay(event),
                None => relay_open = false,
            },
            received = ice.socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => route_datagram(
                    transport.peers_mut().map(|(_, peer)| peer.backend_mut()),
                    source,
                    ice.local_addr,
                    &buf[..n],
                ),
                Err(e) => warn!("UDP receive failed: {}", e),
            },
            _ = tokio::time::sleep_until(wake) => {
                fire_timeouts(transport.peers_mut().map(|(_, peer)| peer.backend_mut()));
            }
            _ = tick.tick() => {
                let outputs = world.tick();
                dispatch(&mut transport, &delayed_tx, outputs);
            }
            Some(delayed) = delayed_rx.recv() => {
                if let Err(e) = transport.send_unreliable_binary(delayed.to, &delayed.payload) {
                    debug!(peer = delayed.to, "Delayed snapshot not sent: {}", e);
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down host");
                break;
            }
        }

        settle(&mut transport, &ice.socket, &relay, &events, &mut world, &delayed_tx);
    }

    let peers: Vec<PeerId> = transport.peers().map(|peer| peer.id()).collect();
    for peer in peers {
        transport.remove_client(peer);
    }
    pump(&mut transport, &ice.socket);
    Ok(())
}

/// Run the transport and world against each other until neither produces more work
fn settle(
    transport: &mut HostTransport,
    socket: &UdpSocket,
    relay: &RelayConnection,
    events: &Receiver<TransportEvent>,
    world: &mut ServerWorld,
    delayed_tx: &mpsc::UnboundedSender<DelayedSnapshot>,
) {
    loop {
        let backend_events = pump(transport, socket);
        while let Some(envelope) = transport.poll_relay() {
            relay.send(envelope);
        }
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            handled += 1;
            on_transport_event(transport, world, delayed_tx, event);
        }
        if backend_events == 0 && handled == 0 {
            break;
        }
    }
}

/// Drive every connection once; returns how many backend events were handled
fn pump(transport: &mut HostTransport, socket: &UdpSocket) -> usize {
    let mut pending = Vec::new();
    for (id, peer) in transport.peers_mut() {
        pending.extend(peer.backend_mut().drive(socket).into_iter().map(|e| (id, e)));
    }
    let count = pending.len();
    for (id, event) in pending {
        transport.handle_backend_event(id, event);
    }
    count
}

fn on_transport_event(
    transport: &mut HostTransport,
    world: &mut ServerWorld,
    delayed_tx: &mpsc::UnboundedSender<DelayedSnapshot>,
    event: TransportEvent,
) {
    match event {
        TransportEvent::Connected { peer, name } => match world.on_peer_connected(peer, &name) {
            Ok(outputs) => dispatch(transport, delayed_tx, outputs),
            Err(e) => {
                warn!(peer, %name, "Cannot admit peer: {}", e);
                transport.remove_client(peer);
            }
        },
        TransportEvent::Disconnected { peer } => {
            if let Some(entity) = world.on_peer_disconnected(peer) {
                info!(peer, entity, players = world.peer_count(), "Player left");
            }
        }
        TransportEvent::Message {
            peer,
            payload: Payload::Binary(bytes),
            ..
        } => match world.on_state_report(peer, &bytes) {
            ReportOutcome::Applied => {}
            outcome => debug!(peer, ?outcome, "State report not applied"),
        },
        TransportEvent::Message { peer, .. } => {
            debug!(peer, "Ignoring text on the unreliable channel");
        }
    }
}

fn dispatch(
    transport: &mut HostTransport,
    delayed_tx: &mpsc::UnboundedSender<DelayedSnapshot>,
    outputs: Vec<ServerOutput>,
) {
    for output in outputs {
        match output {
            ServerOutput::Reliable { to, message } => {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode message: {}", e);
                        continue;
                    }
                };
                match to {
                    Recipient::Peer(peer) => {
                        if let Err(e) = transport.send_reliable_text(peer, &text) {
                            warn!(peer, "Reliable send failed: {}", e);
                        }
                    }
                    Recipient::All => {
                        transport.broadcast(ChannelKind::Reliable, &Payload::Text(text));
                    }
                }
            }
            ServerOutput::Snapshot { to, payload, delay } => {
                if delay.is_zero() {
                    if let Err(e) = transport.send_unreliable_binary(to, &payload) {
                        debug!(peer = to, "Snapshot not sent: {}", e);
                    }
                } else {
                    schedule(delayed_tx.clone(), delay, DelayedSnapshot { to, payload });
                }
            }
        }
    }
}

fn schedule(tx: mpsc::UnboundedSender<DelayedSnapshot>, delay: Duration, snapshot: DelayedSnapshot) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(snapshot);
    });
}
