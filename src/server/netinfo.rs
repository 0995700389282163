use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Best guess at this device's LAN IPv4 address.
///
/// Connecting a UDP socket selects the outgoing interface without sending
/// anything. Returns `None` when there is no non-loopback route.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// URL a client should use to reach a server bound to `bound`.
///
/// A loopback bind is only reachable on loopback. A wildcard bind is
/// advertised under the LAN address, falling back to `127.0.0.1`.
pub fn reachable_url(bound: SocketAddr) -> String {
    let host = match bound.ip() {
        ip if ip.is_unspecified() => IpAddr::V4(local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST)),
        ip => ip,
    };
    match host {
        IpAddr::V4(ip) => format!("http://{ip}:{}", bound.port()),
        IpAddr::V6(ip) => format!("http://[{ip}]:{}", bound.port()),
    }
}
