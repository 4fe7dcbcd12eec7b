// peerworld: server-authoritative world replication over WebRTC data channels

pub mod config;
pub mod input;
pub mod logging;
pub mod runtime;
pub mod transport;
pub mod world;
