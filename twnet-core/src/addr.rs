use crate::error::NetError;
use log::{debug, warn};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::lookup_host;

/// Parses `a.b.c.d[:port]` or `[v6][:port]`. A missing port is 0.
pub fn parse_addr(s: &str) -> Result<SocketAddr, NetError> {
    let invalid = || NetError::InvalidAddress(s.to_owned());

    if let Some(rest) = s.strip_prefix('[') {
        let close = rest.find(']').ok_or_else(invalid)?;
        let ip: Ipv6Addr = rest[..close].parse().map_err(|_| invalid())?;
        let port = match &rest[close + 1..] {
            "" => 0,
            tail => parse_port(tail.strip_prefix(':').ok_or_else(invalid)?).ok_or_else(invalid)?,
        };
        return Ok(SocketAddr::new(IpAddr::V6(ip), port));
    }

    let (host, port) = match s.find(':') {
        Some(i) => (&s[..i], parse_port(&s[i + 1..]).ok_or_else(invalid)?),
        None => (s, 0),
    };

    let mut octets = [0u8; 4];
    let mut parts = host.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        *octet = parse_decimal(part)
            .filter(|v| *v <= 0xff)
            .ok_or_else(invalid)? as u8;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
}

fn parse_decimal(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 5 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_port(s: &str) -> Option<u16> {
    parse_decimal(s).filter(|v| *v <= 0xffff).map(|v| v as u16)
}

/// Finds the server address. Literal addresses are used as is, anything
/// else goes through DNS, and if that fails too we fall back to localhost.
/// `port` always wins over a port embedded in `host`.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetError> {
    if let Ok(mut addr) = parse_addr(host) {
        addr.set_port(port);
        return Ok(addr);
    }

    match lookup_host((host, port)).await {
        Ok(mut addrs) => {
            if let Some(addr) = addrs.next() {
                debug!("resolved {} to {}", host, addr);
                return Ok(addr);
            }
        }
        Err(e) => debug!("lookup of {} failed: {}", host, e),
    }

    warn!(
        "could not find the address of {}, connecting to localhost",
        host
    );
    lookup_host(("localhost", port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| NetError::AddressResolveError(host.to_owned()))
}
