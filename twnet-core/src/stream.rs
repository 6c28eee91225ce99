use crate::error::NetError;
use crate::packet::NET_MAX_PACKETSIZE;
use log::{debug, error};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

// datagrams larger than a packet are rejected after the read, so leave
// room to notice them instead of silently truncating
const RECV_BUFFER_SIZE: usize = NET_MAX_PACKETSIZE * 2;

pub struct Stream {
    sock: UdpSocket,
}

impl Stream {
    /// Creates a new UDP stream
    pub async fn new(local_addr: SocketAddr) -> Result<Self, NetError> {
        let sock = UdpSocket::bind(local_addr).await.map_err(|e| {
            error!("failed to bind socket to {} ({})", local_addr, e);
            NetError::SocketBindError
        })?;

        Ok(Self { sock })
    }

    pub async fn connect(self, remote_addr: SocketAddr) -> Result<Stream, NetError> {
        // Set default remote addr to sent data to/recv data from
        self.sock
            .connect(remote_addr)
            .await
            .map_err(|_| NetError::SocketConnectError)?;

        Ok(self)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.sock.local_addr().map_err(|_| NetError::SocketBindError)
    }

    /// Send data to remote peer
    pub async fn send(&self, buf: &[u8]) -> Result<usize, NetError> {
        self.sock.send(buf).await.map_err(|e| {
            error!("sendto error ({}), size={}", e, buf.len());
            NetError::SocketSendError
        })
    }

    /// Send data to an explicit peer on an unconnected stream
    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, NetError> {
        self.sock.send_to(buf, target).await.map_err(|e| {
            error!("sendto error ({}), size={} addr={}", e, buf.len(), target);
            NetError::SocketSendError
        })
    }

    /// Returns the next queued datagram, or `None` when nothing arrived.
    /// Goes through one reactor turn so readiness is fresh even when the
    /// caller never awaits anything else.
    pub async fn recv_ready(&self) -> Result<Option<Vec<u8>>, NetError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        match timeout(Duration::from_millis(0), self.sock.recv(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(len)) => {
                buf.truncate(len);
                Ok(Some(buf))
            }
            // an earlier datagram was refused by the peer's host
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!("peer refused a datagram");
                Ok(None)
            }
            Ok(Err(e)) => {
                error!("recv error ({})", e);
                Err(NetError::SocketRecvError)
            }
        }
    }
}
