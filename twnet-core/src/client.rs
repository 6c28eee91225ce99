use crate::addr::resolve;
use crate::config::Config;
use crate::connection::{ConnState, Connection, Event};
use crate::error::NetError;
use crate::packet::PacketConstruct;
use crate::stream::Stream;
use log::{debug, info, warn};
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;
use tokio::time::interval;

/// A client bound to one server
pub struct Client {
    stream: Stream,
    server_addr: SocketAddr,
    connection: Connection,
    config: Config,
}

impl Client {
    /// Binds an ephemeral local socket aimed at the server without
    /// starting the handshake
    pub async fn open(host: &str, port: u16, config: Config) -> Result<Self, NetError> {
        let server_addr = resolve(host, port).await?;
        let local_addr = if server_addr.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };

        let stream = Stream::new(local_addr).await?.connect(server_addr).await?;
        debug!("bound {} for {}", stream.local_addr()?, server_addr);

        Ok(Self {
            stream,
            server_addr,
            connection: Connection::new(config.clone(), Instant::now()),
            config,
        })
    }

    /// Opens a socket and starts the token handshake
    pub async fn connect(host: &str, port: u16, config: Config) -> Result<Self, NetError> {
        let mut client = Self::open(host, port, config).await?;
        info!("connecting to ip={} port={}", client.server_addr.ip(), port);
        client.connection.connect(Instant::now());
        client.send_outgoing().await?;
        Ok(client)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.stream.local_addr()
    }

    pub fn state(&self) -> ConnState {
        self.connection.state()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Sends a caller built packet as is
    pub async fn send(&self, packet: &PacketConstruct) -> Result<usize, NetError> {
        let bytes = packet.encode()?;
        self.stream.send(&bytes).await
    }

    /// Sends the bare token request the native library used as its smoke test
    pub async fn send_sample(&self) -> Result<usize, NetError> {
        self.send(&PacketConstruct::sample()).await
    }

    /// Queues a chunk; it goes out with the next pump or flush
    pub fn send_chunk(&mut self, vital: bool, data: &[u8]) -> Result<(), NetError> {
        self.connection.queue_chunk(vital, data, Instant::now())
    }

    pub async fn flush(&mut self) -> Result<(), NetError> {
        self.connection.flush(Instant::now());
        self.send_outgoing().await
    }

    pub async fn disconnect(&mut self, reason: Option<&str>) -> Result<(), NetError> {
        self.connection.disconnect(reason, Instant::now());
        self.send_outgoing().await
    }

    async fn send_outgoing(&mut self) -> Result<(), NetError> {
        for datagram in self.connection.drain_outgoing() {
            self.stream.send(&datagram).await?;
        }
        Ok(())
    }

    /// Handles every datagram already waiting on the socket, runs the
    /// connection timers and sends whatever they produced. Waits for the
    /// socket no longer than one timer tick.
    pub async fn pump_network(&mut self) -> Result<Vec<Event>, NetError> {
        let mut events = Vec::new();

        while let Some(buf) = self.stream.recv_ready().await? {
            let packet = match PacketConstruct::decode(&buf) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("dropping packet from {}: {}", self.server_addr, e);
                    continue;
                }
            };
            if self.server_addr.ip().is_loopback() {
                debug!("{}", packet.describe(&self.server_addr, buf.len()));
            }

            match self.connection.feed(&packet, Instant::now()) {
                Ok(received) => events.extend(received),
                Err(e) => warn!("error during packet decoding: {}", e),
            }
        }

        let updated = self.connection.update(Instant::now());
        self.send_outgoing().await?;
        updated?;
        Ok(events)
    }

    /// Pumps the network every `pump_interval` until `shutdown` resolves,
    /// handing each event to `on_event`. A close from the server or a
    /// timeout ends the loop with an error. Returns the number of pumps.
    pub async fn run<F, H>(&mut self, shutdown: F, mut on_event: H) -> Result<u64, NetError>
    where
        F: Future<Output = ()>,
        H: FnMut(&Event),
    {
        let mut ticker = interval(self.config.pump_interval);
        let mut pumps = 0u64;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down after {} pumps", pumps);
                    self.disconnect(None).await?;
                    return Ok(pumps);
                }
                _ = ticker.tick() => {
                    let events = self.pump_network().await?;
                    pumps += 1;
                    for event in &events {
                        on_event(event);
                        if let Event::Closed { reason } = event {
                            return Err(NetError::Closed(reason.clone().unwrap_or_default()));
                        }
                    }
                }
            }
        }
    }
}
