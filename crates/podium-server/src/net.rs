//! Port allocation and local network information.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::{debug, info, warn};

use crate::error::ServerError;

/// First port tried by [`find_free_port`] by default.
pub const DEFAULT_PORT_RANGE_START: u16 = 5000;
/// End (exclusive) of the default port range.
pub const DEFAULT_PORT_RANGE_END: u16 = 5100;

/// Unroutable address used to discover the outbound interface. Connecting
/// a UDP socket sends nothing.
const PROBE_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 255, 255, 255), 1);

/// Check that `port` is in `1..=65535`. Privileged ports are allowed but
/// logged.
pub fn validate_port(port: u32) -> Result<u16, ServerError> {
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ServerError::InvalidPort(port))?;
    if port < 1024 {
        warn!(port, "port is privileged and may need elevated permissions");
    }
    Ok(port)
}

/// First port in `start..end` that a UDP socket can bind on `ip`.
pub fn find_free_port(ip: IpAddr, start: u16, end: u16) -> Result<u16, ServerError> {
    for port in start..end {
        match UdpSocket::bind(SocketAddr::new(ip, port)) {
            Ok(_) => {
                info!(%ip, port, "found free port");
                return Ok(port);
            }
            Err(e) => debug!(port, error = %e, "port unavailable"),
        }
    }
    warn!(start, end, "no free port in range");
    Err(ServerError::NoFreePort { start, end })
}

/// Address of the interface used for outbound traffic, or loopback when it
/// cannot be determined.
pub fn local_ip() -> IpAddr {
    match probe_local_ip() {
        Ok(ip) => {
            debug!(%ip, "detected local address");
            ip
        }
        Err(e) => {
            warn!(error = %e, "failed to detect local address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn probe_local_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
    socket.connect(PROBE_ADDR)?;
    Ok(socket.local_addr()?.ip())
}

/// Whether `ip` (usually from [`local_ip`]) points at a real network.
pub fn has_network(ip: IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}
