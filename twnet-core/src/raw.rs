use crate::config::DEFAULT_PORT;
use crate::error::NetError;
use crate::stream::Stream;
use log::info;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

pub const DEFAULT_RAW_PAYLOAD: &[u8] = b"foo";

pub fn default_target() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), DEFAULT_PORT)
}

/// Sends `payload` as a single datagram from an ephemeral port. Nothing is
/// awaited from the target.
pub async fn send_raw(target: SocketAddr, payload: &[u8]) -> Result<usize, NetError> {
    let local_addr = if target.is_ipv4() {
        SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
    } else {
        SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
    };
    let stream = Stream::new(local_addr).await?;
    let sent = stream.send_to(payload, target).await?;
    info!("sent {} bytes to {}", sent, target);
    Ok(sent)
}
