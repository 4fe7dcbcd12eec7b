// UDP socket setup for ICE: pick a local interface, bind, ask STUN for the public mapping

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use str0m::Candidate;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

const STUN_TIMEOUT: Duration = Duration::from_secs(5);

/// The bound socket plus the ICE candidates it can be reached on
pub struct IceSocket {
    pub socket: UdpSocket,
    pub local_addr: SocketAddr,
    pub candidates: Vec<Candidate>,
}

/// Bind a socket on the preferred interface and gather host + server-reflexive candidates
///
/// STUN failure is not fatal: peers on the same network still connect over
/// the host candidate.
pub async fn bind(stun_server: &str) -> Result<IceSocket> {
    let local_ip = match discover_local_ip() {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Local IP discovery failed ({}), using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    };

    // Bind to the specific address so local_addr() matches the host candidate
    let std_socket = StdUdpSocket::bind(SocketAddr::new(local_ip, 0))
        .with_context(|| format!("failed to bind UDP socket on {}", local_ip))?;
    let local_addr = std_socket.local_addr()?;
    info!("Bound UDP socket: {}", local_addr);

    let mut candidates = vec![Candidate::host(local_addr, "udp")
        .map_err(|e| anyhow!("failed to create host candidate: {}", e))?];

    match query_stun_server(&std_socket, stun_server).await {
        Ok(public_addr) if public_addr != local_addr => {
            match Candidate::server_reflexive(public_addr, local_addr, "udp") {
                Ok(candidate) => {
                    info!("Public address from STUN: {}", public_addr);
                    candidates.push(candidate);
                }
                Err(e) => warn!("Failed to create server reflexive candidate: {}", e),
            }
        }
        Ok(_) => debug!("STUN reports no NAT in front of {}", local_addr),
        Err(e) => warn!("STUN query failed, using host candidate only: {}", e),
    }

    std_socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(std_socket)?;
    Ok(IceSocket {
        socket,
        local_addr,
        candidates,
    })
}

/// Discover the local network IP address for LAN connectivity
fn discover_local_ip() -> Result<IpAddr> {
    let interfaces =
        if_addrs::get_if_addrs().map_err(|e| anyhow!("failed to list interfaces: {}", e))?;
    let candidates: Vec<(String, Ipv4Addr)> = interfaces
        .into_iter()
        .filter_map(|iface| match iface.addr.ip() {
            IpAddr::V4(ipv4) if !ipv4.is_loopback() => Some((iface.name, ipv4)),
            _ => None,
        })
        .collect();
    debug!(
        "IPv4 interface candidates: {:?}",
        candidates
            .iter()
            .map(|(name, ip)| format!("{}={}", name, ip))
            .collect::<Vec<_>>()
    );
    pick_interface(&candidates)
        .map(IpAddr::V4)
        .ok_or_else(|| anyhow!("no suitable network interface found"))
}

/// Prefer the VPN (10/8) when a home network is also up so STUN sees the tunnel,
/// otherwise the home network (192.168/16), then corporate ranges, then anything
fn pick_interface(candidates: &[(String, Ipv4Addr)]) -> Option<Ipv4Addr> {
    let has_vpn = candidates.iter().any(|(_, ip)| ip.octets()[0] == 10);
    let has_home = candidates
        .iter()
        .any(|(_, ip)| ip.octets()[0] == 192 && ip.octets()[1] == 168);

    candidates
        .iter()
        .min_by_key(|(_, ip)| {
            let octets = ip.octets();
            match octets {
                [10, ..] => {
                    if has_home {
                        0
                    } else {
                        2
                    }
                }
                [192, 168, ..] => {
                    if has_vpn {
                        1
                    } else {
                        0
                    }
                }
                [172, second, ..] if (16..=31).contains(&second) => 1,
                _ => 3,
            }
        })
        .map(|(_, ip)| *ip)
}

/// Ask a STUN server for our public address
///
/// Must run on the socket ICE will use, otherwise the NAT mapping differs.
async fn query_stun_server(socket: &StdUdpSocket, stun_server: &str) -> Result<SocketAddr> {
    let stun_addr = tokio::net::lookup_host(stun_server)
        .await
        .with_context(|| format!("failed to resolve STUN server {}", stun_server))?
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| anyhow!("STUN server {} has no IPv4 address", stun_server))?;
    debug!("STUN server resolved to {}", stun_addr);

    let socket = socket.try_clone()?;
    let client = stunclient::StunClient::new(stun_addr);
    tokio::task::spawn_blocking(move || -> Result<SocketAddr> {
        socket.set_read_timeout(Some(STUN_TIMEOUT))?;
        let result = client
            .query_external_address(&socket)
            .map_err(|e| anyhow!("STUN query failed: {}", e));
        socket.set_read_timeout(None)?;
        result
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(ips: &[[u8; 4]]) -> Vec<(String, Ipv4Addr)> {
        ips.iter()
            .enumerate()
            .map(|(i, ip)| (format!("if{}", i), Ipv4Addr::from(*ip)))
            .collect()
    }

    #[test]
    fn test_home_network_preferred_without_vpn() {
        let picked = pick_interface(&named(&[[172, 20, 0, 5], [192, 168, 1, 10], [100, 64, 0, 1]]));
        assert_eq!(picked, Some(Ipv4Addr::new(192, 168, 1, 10)));
    }

    #[test]
    fn test_vpn_preferred_alongside_home_network() {
        let picked = pick_interface(&named(&[[192, 168, 1, 10], [10, 8, 0, 2]]));
        assert_eq!(picked, Some(Ipv4Addr::new(10, 8, 0, 2)));
    }

    #[test]
    fn test_corporate_before_other() {
        let picked = pick_interface(&named(&[[100, 64, 0, 1], [172, 16, 3, 3]]));
        assert_eq!(picked, Some(Ipv4Addr::new(172, 16, 3, 3)));
        assert_eq!(pick_interface(&[]), None);
    }
}
