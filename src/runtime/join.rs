// Join event loop: predictive world connected to one host

use std::sync::mpsc::Receiver;

use anyhow::{bail, Result};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::relay_socket::{self, RelayConnection};
use super::{fire_timeouts, route_datagram, udp, wake_at, DATAGRAM_BUFFER};
use crate::config::Config;
use crate::input::InputSource;
use crate::transport::rtc::{RtcBackend, RtcFactory};
use crate::transport::{EventKind, Payload, TransportClient, TransportEvent};
use crate::world::{ClientWorld, SnapshotOutcome};

type JoinTransport = TransportClient<RtcBackend>;

/// What the loop should do after settling
enum Flow {
    Continue,
    Finished,
}

pub async fn run_join(
    config: Config,
    name: String,
    server: String,
    mut input: Box<dyn InputSource>,
) -> Result<()> {
    let map = config.build_map()?;
    let ice = udp::bind(&config.network.stun_server).await?;

    let backend =
        RtcFactory::new(ice.candidates.clone(), config.network.unreliable_max_retention_ms).build();
    let mut transport = TransportClient::new(server.clone(), backend);
    let events = transport.subscribe(&[
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::ReliableText,
        EventKind::UnreliableBinary,
    ]);

    let mut relay = relay_socket::connect(&config.network.relay_url, &name).await?;
    let mut relay_open = true;

    let mut world = ClientWorld::new(map, config.client_settings());
    let mut connected = false;

    let mut tick = tokio::time::interval(config.simulation.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut send = tokio::time::interval(config.simulation.send_interval());
    send.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let give_up = tokio::time::Instant::now() + config.network.connection_timeout();
    let mut buf = vec![0u8; DATAGRAM_BUFFER];

    info!(%name, %server, input = input.name(), "Joining");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let wake = wake_at(std::iter::once(transport.peer().backend()));

        tokio::select! {
            event = relay.recv(), if relay_open => match event {
                Some(event) => transport.handle_relay(event),
                None => relay_open = false,
            },
            received = ice.socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => route_datagram(
                    std::iter::once(transport.peer_mut().backend_mut()),
                    source,
                    ice.local_addr,
                    &buf[..n],
                ),
                Err(e) => warn!("UDP receive failed: {}", e),
            },
            _ = tokio::time::sleep_until(wake) => {
                fire_timeouts(std::iter::once(transport.peer_mut().backend_mut()));
            }
            _ = tick.tick(), if connected => {
                world.tick(input.poll());
            }
            _ = send.tick(), if connected => {
                if let Some(report) = world.state_report() {
                    if let Err(e) = transport.send_unreliable_binary(&report) {
                        debug!("State report not sent: {}", e);
                    }
                }
            }
            _ = tokio::time::sleep_until(give_up), if !connected => {
                transport.close();
                bail!(
                    "no connection to {} after {}s",
                    server,
                    config.network.connection_timeout_secs
                );
            }
            _ = &mut shutdown => {
                info!("Leaving");
                transport.close();
                pump(&mut transport, &ice.socket);
                return Ok(());
            }
        }

        match settle(&mut transport, &ice.socket, &relay, &events, &mut world, &mut connected) {
            Flow::Continue => {}
            Flow::Finished => return Ok(()),
        }
        if transport.is_closed() && !connected {
            bail!("connection to {} failed during negotiation", server);
        }
    }
}

fn settle(
    transport: &mut JoinTransport,
    socket: &UdpSocket,
    relay: &RelayConnection,
    events: &Receiver<TransportEvent>,
    world: &mut ClientWorld,
    connected: &mut bool,
) -> Flow {
    loop {
        let backend_events = pump(transport, socket);
        while let Some(envelope) = transport.poll_relay() {
            relay.send(envelope);
        }
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            handled += 1;
            match event {
                TransportEvent::Connected { name, .. } => {
                    info!(host = %name, "Connected to host");
                    *connected = true;
                }
                TransportEvent::Disconnected { .. } => {
                    info!("Host connection closed");
                    return Flow::Finished;
                }
                TransportEvent::Message {
                    payload: Payload::Text(text),
                    ..
                } => world.handle_reliable_text(&text),
                TransportEvent::Message {
                    payload: Payload::Binary(bytes),
                    ..
                } => report_snapshot(world.handle_snapshot(&bytes)),
            }
        }
        if backend_events == 0 && handled == 0 {
            return Flow::Continue;
        }
    }
}

fn pump(transport: &mut JoinTransport, socket: &UdpSocket) -> usize {
    let pending = transport.peer_mut().backend_mut().drive(socket);
    let count = pending.len();
    for event in pending {
        transport.handle_backend_event(event);
    }
    count
}

/// State-changed notification for the local view
fn report_snapshot(outcome: SnapshotOutcome) {
    match outcome {
        SnapshotOutcome::Applied {
            created,
            removed,
            replayed,
        } => {
            if !created.is_empty() || !removed.is_empty() {
                info!(?created, ?removed, "World changed");
            }
            if replayed > 0 {
                debug!(replayed, "Caught remote entities up");
            }
        }
        SnapshotOutcome::Stale => debug!("Stale snapshot dropped"),
        SnapshotOutcome::Malformed => warn!("Malformed snapshot dropped"),
    }
}
