// Async drivers around the sans-I/O core
// One current-thread tokio loop per process: relay frames, UDP, str0m timers, simulation ticks

pub mod host;
pub mod join;
pub mod relay_socket;
pub mod udp;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::transport::rtc::RtcBackend;

pub use host::run_host;
pub use join::run_join;

/// Largest datagram we expect from str0m peers
const DATAGRAM_BUFFER: usize = 2000;

/// Idle wake-up when no connection has a pending timer
const IDLE_WAKE: Duration = Duration::from_millis(100);

/// When the loop should next wake for str0m timers
fn wake_at<'a>(backends: impl Iterator<Item = &'a RtcBackend>) -> tokio::time::Instant {
    let now = Instant::now();
    let deadline = backends
        .filter_map(RtcBackend::deadline)
        .min()
        .unwrap_or(now + IDLE_WAKE);
    tokio::time::Instant::from_std(deadline.max(now))
}

/// Hand a datagram to the first connection that claims it
fn route_datagram<'a>(
    backends: impl Iterator<Item = &'a mut RtcBackend>,
    source: SocketAddr,
    destination: SocketAddr,
    bytes: &[u8],
) {
    let now = Instant::now();
    for backend in backends {
        match backend.receive(now, source, destination, bytes) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!(%source, "Dropping datagram: {}", e);
                return;
            }
        }
    }
    trace!(%source, len = bytes.len(), "Datagram matched no connection");
}

fn fire_timeouts<'a>(backends: impl Iterator<Item = &'a mut RtcBackend>) {
    let now = Instant::now();
    for backend in backends {
        if let Err(e) = backend.handle_timeout(now) {
            warn!("Connection timer failed: {}", e);
        }
    }
}
