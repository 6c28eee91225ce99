use crate::chunk::{
    is_seq_in_backroom, ChunkHeader, ChunkUnpacker, NET_CHUNKFLAG_RESEND, NET_CHUNKFLAG_VITAL,
    NET_SEQUENCE_MASK,
};
use crate::config::Config;
use crate::control::ControlMessage;
use crate::error::NetError;
use crate::packet::{
    flags, PacketConstruct, NET_MAX_CHUNKHEADERSIZE, NET_MAX_PACKET_CHUNKS, NET_MAX_PAYLOAD,
    NET_TOKEN_NONE,
};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::mem;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConnState {
    Offline,
    /// Waiting for the server's token
    Token,
    /// Waiting for the server to accept us
    Connect,
    Online,
    Error,
}

/// Something the connection produced for the application
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connected,
    Chunk {
        vital: bool,
        data: Vec<u8>,
    },
    Connless {
        token: u32,
        response_token: u32,
        data: Vec<u8>,
    },
    Closed {
        reason: Option<String>,
    },
}

/// A vital chunk kept until the server acknowledges it
struct ResendChunk {
    flags: u8,
    sequence: u16,
    data: Vec<u8>,
    first_send: Instant,
    last_send: Instant,
}

/// Client side of a connection. Holds no socket: datagrams to send are
/// collected and handed out through `drain_outgoing`.
pub struct Connection {
    config: Config,
    state: ConnState,
    /// The token the server puts in packets addressed to us
    token: u32,
    /// The token we put in packets addressed to the server
    peer_token: u32,
    /// Last vital sequence we sent
    sequence: u16,
    /// Last vital sequence we received in order
    ack: u16,
    peer_ack: u16,
    resend_requested: bool,
    error: Option<String>,
    construct: PacketConstruct,
    resend: VecDeque<ResendChunk>,
    resend_bytes: usize,
    outgoing: Vec<Vec<u8>>,
    last_recv: Instant,
    last_send: Instant,
    last_handshake: Instant,
}

impl Connection {
    pub fn new(config: Config, now: Instant) -> Self {
        Self {
            config,
            state: ConnState::Offline,
            token: NET_TOKEN_NONE,
            peer_token: NET_TOKEN_NONE,
            sequence: 0,
            ack: 0,
            peer_ack: 0,
            resend_requested: false,
            error: None,
            construct: PacketConstruct::default(),
            resend: VecDeque::new(),
            resend_bytes: 0,
            outgoing: Vec::new(),
            last_recv: now,
            last_send: now,
            last_handshake: now,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn peer_token(&self) -> u32 {
        self.peer_token
    }

    pub fn ack(&self) -> u16 {
        self.ack
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Last of our vital sequences the server acknowledged
    pub fn peer_ack(&self) -> u16 {
        self.peer_ack
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of vital chunks waiting for an ack
    pub fn unacked(&self) -> usize {
        self.resend.len()
    }

    /// Takes the datagrams produced since the last call
    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        mem::take(&mut self.outgoing)
    }

    fn reset(&mut self, now: Instant) {
        self.peer_token = NET_TOKEN_NONE;
        self.sequence = 0;
        self.ack = 0;
        self.peer_ack = 0;
        self.resend_requested = false;
        self.error = None;
        self.construct = PacketConstruct::default();
        self.resend.clear();
        self.resend_bytes = 0;
        self.last_recv = now;
        self.last_send = now;
        self.last_handshake = now;
    }

    /// Starts the handshake by requesting a token from the server
    pub fn connect(&mut self, now: Instant) {
        self.reset(now);
        self.token = loop {
            let token = rand::random::<u32>();
            if token != NET_TOKEN_NONE {
                break token;
            }
        };
        self.state = ConnState::Token;
        debug!("requesting token, our token={:#010x}", self.token);
        self.send_control(ControlMessage::Token { token: self.token }, now);
    }

    /// Sends CLOSE and drops all connection state
    pub fn disconnect(&mut self, reason: Option<&str>, now: Instant) {
        if self.state == ConnState::Offline {
            return;
        }
        self.send_control(
            ControlMessage::Close {
                reason: reason.map(str::to_owned),
            },
            now,
        );
        let outgoing = self.drain_outgoing();
        self.reset(now);
        self.outgoing = outgoing;
        self.state = ConnState::Offline;
    }

    fn send_control(&mut self, msg: ControlMessage, now: Instant) {
        let mut packet = PacketConstruct::new(self.peer_token, flags::CONTROL);
        packet.ack = self.ack;
        // control payloads are at most 1 + NET_TOKENREQUEST_DATASIZE bytes
        if let Err(e) = packet.set_data(&msg.encode()) {
            warn!("dropping control message {:?}: {}", msg, e);
            return;
        }
        self.emit(&packet, now);
    }

    fn emit(&mut self, packet: &PacketConstruct, now: Instant) {
        match packet.encode() {
            Ok(bytes) => {
                self.outgoing.push(bytes);
                self.last_send = now;
            }
            Err(e) => warn!("could not encode packet: {}", e),
        }
    }

    /// Queues a chunk for the next flush. Vital chunks get a sequence number
    /// and are kept until acknowledged.
    pub fn queue_chunk(&mut self, vital: bool, data: &[u8], now: Instant) -> Result<(), NetError> {
        if self.state != ConnState::Online {
            return Err(NetError::NotConnected);
        }
        if data.len() > NET_MAX_PAYLOAD - NET_MAX_CHUNKHEADERSIZE {
            return Err(NetError::ChunkTooLarge(data.len()));
        }

        if !vital {
            self.queue_raw(ChunkHeader::new(0, data.len() as u16, 0), data, now);
            return Ok(());
        }

        if self.resend_bytes + data.len() > self.config.resend_buffer_size {
            self.state = ConnState::Error;
            self.error = Some("too weak connection (out of buffer)".to_owned());
            return Err(NetError::ResendBufferFull);
        }

        self.sequence = (self.sequence + 1) & NET_SEQUENCE_MASK;
        let header = ChunkHeader::new(NET_CHUNKFLAG_VITAL, data.len() as u16, self.sequence);
        self.queue_raw(header, data, now);
        self.resend.push_back(ResendChunk {
            flags: NET_CHUNKFLAG_VITAL,
            sequence: self.sequence,
            data: data.to_vec(),
            first_send: now,
            last_send: now,
        });
        self.resend_bytes += data.len();
        Ok(())
    }

    fn queue_raw(&mut self, header: ChunkHeader, data: &[u8], now: Instant) {
        if self.construct.remaining() < header.packed_len() + data.len()
            || self.construct.num_chunks as usize >= NET_MAX_PACKET_CHUNKS - 1
        {
            self.flush(now);
        }

        let mut buf = Vec::with_capacity(header.packed_len() + data.len());
        header.pack(&mut buf);
        buf.extend_from_slice(data);
        // fits: the construct was flushed above if it had no room
        if self.construct.append(&buf).is_ok() {
            self.construct.num_chunks += 1;
        }
    }

    /// Sends the queued chunks as one packet. Returns the number of chunks sent.
    pub fn flush(&mut self, now: Instant) -> usize {
        let num_chunks = self.construct.num_chunks as usize;
        if num_chunks == 0 && !self.resend_requested {
            return 0;
        }

        let mut packet = mem::take(&mut self.construct);
        packet.token = self.peer_token;
        packet.ack = self.ack;
        if self.resend_requested {
            packet.flags |= flags::RESEND;
            self.resend_requested = false;
        }
        self.emit(&packet, now);
        num_chunks
    }

    fn resend_front(&mut self, now: Instant) {
        let (header, data) = match self.resend.front_mut() {
            Some(chunk) => {
                chunk.last_send = now;
                (
                    ChunkHeader::new(
                        chunk.flags | NET_CHUNKFLAG_RESEND,
                        chunk.data.len() as u16,
                        chunk.sequence,
                    ),
                    chunk.data.clone(),
                )
            }
            None => return,
        };
        self.queue_raw(header, &data, now);
    }

    fn resend_all(&mut self, now: Instant) {
        let chunks: Vec<(ChunkHeader, Vec<u8>)> = self
            .resend
            .iter_mut()
            .map(|chunk| {
                chunk.last_send = now;
                (
                    ChunkHeader::new(
                        chunk.flags | NET_CHUNKFLAG_RESEND,
                        chunk.data.len() as u16,
                        chunk.sequence,
                    ),
                    chunk.data.clone(),
                )
            })
            .collect();
        debug!("resending {} vital chunks", chunks.len());
        for (header, data) in chunks {
            self.queue_raw(header, &data, now);
        }
    }

    fn acknowledge(&mut self, ack: u16) {
        // only acks between the last one and our newest sequence count
        let ahead = ack.wrapping_sub(self.peer_ack) & NET_SEQUENCE_MASK;
        let window = self.sequence.wrapping_sub(self.peer_ack) & NET_SEQUENCE_MASK;
        if ahead > window {
            debug!(
                "ignoring ack {}, last ack {} sequence {}",
                ack, self.peer_ack, self.sequence
            );
            return;
        }
        self.peer_ack = ack;
        while let Some(chunk) = self.resend.front() {
            if !is_seq_in_backroom(chunk.sequence, ack) {
                break;
            }
            self.resend_bytes -= chunk.data.len();
            self.resend.pop_front();
        }
    }

    /// Processes a packet received from the server
    pub fn feed(&mut self, packet: &PacketConstruct, now: Instant) -> Result<Vec<Event>, NetError> {
        let mut events = Vec::new();

        if packet.is_connless() {
            events.push(Event::Connless {
                token: packet.token,
                response_token: packet.response_token,
                data: packet.data().to_vec(),
            });
            return Ok(events);
        }

        if matches!(self.state, ConnState::Offline | ConnState::Error) {
            return Ok(events);
        }
        if packet.token != self.token {
            debug!(
                "dropping packet with token {:#010x}, expected {:#010x}",
                packet.token, self.token
            );
            return Ok(events);
        }

        self.last_recv = now;

        if packet.is_control() {
            let msg = ControlMessage::decode(packet.data())?;
            self.handle_control(msg, packet, now, &mut events);
            return Ok(events);
        }

        if self.state != ConnState::Online {
            debug!("dropping data packet in state {:?}", self.state);
            return Ok(events);
        }

        self.acknowledge(packet.ack);
        if packet.flags & flags::RESEND != 0 {
            self.resend_all(now);
        }

        for chunk in ChunkUnpacker::new(packet.data(), packet.num_chunks) {
            // chunks before a broken one are already acked, so they are kept
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("dropping rest of packet after {} chunks: {}", events.len(), e);
                    break;
                }
            };
            if chunk.header.is_vital() {
                let expected = (self.ack + 1) & NET_SEQUENCE_MASK;
                if chunk.header.sequence == expected {
                    self.ack = expected;
                } else {
                    if !is_seq_in_backroom(chunk.header.sequence, self.ack) {
                        debug!(
                            "asking for resend, got sequence {} expected {}",
                            chunk.header.sequence, expected
                        );
                        self.resend_requested = true;
                    }
                    continue;
                }
            }
            events.push(Event::Chunk {
                vital: chunk.header.is_vital(),
                data: chunk.data.to_vec(),
            });
        }

        Ok(events)
    }

    fn handle_control(
        &mut self,
        msg: ControlMessage,
        packet: &PacketConstruct,
        now: Instant,
        events: &mut Vec<Event>,
    ) {
        match msg {
            ControlMessage::Token { token } if self.state == ConnState::Token => {
                self.peer_token = token;
                self.state = ConnState::Connect;
                self.last_handshake = now;
                debug!("got token {:#010x}, sending connect", token);
                self.send_control(ControlMessage::Connect { token: self.token }, now);
            }
            ControlMessage::Accept if self.state == ConnState::Connect => {
                self.state = ConnState::Online;
                info!("connection online");
                events.push(Event::Connected);
            }
            ControlMessage::Close { reason } => {
                info!(
                    "closed by peer: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.state = ConnState::Error;
                self.error = Some(reason.clone().unwrap_or_default());
                events.push(Event::Closed { reason });
            }
            ControlMessage::KeepAlive => {
                if self.state == ConnState::Online {
                    self.acknowledge(packet.ack);
                }
            }
            other => debug!("ignoring {:?} in state {:?}", other, self.state),
        }
    }

    /// Drives timers: handshake retries, resends, keepalives and timeouts.
    /// Queued chunks are flushed at the end.
    pub fn update(&mut self, now: Instant) -> Result<(), NetError> {
        match self.state {
            ConnState::Offline | ConnState::Error => return Ok(()),
            _ => {}
        }

        if now.saturating_duration_since(self.last_recv) > self.config.timeout {
            self.state = ConnState::Error;
            self.error = Some("timeout".to_owned());
            warn!("connection timed out");
            return Err(NetError::Timeout);
        }

        match self.state {
            ConnState::Token | ConnState::Connect => {
                if now.saturating_duration_since(self.last_handshake) >= self.config.handshake_retry
                {
                    self.last_handshake = now;
                    let msg = if self.state == ConnState::Token {
                        ControlMessage::Token { token: self.token }
                    } else {
                        ControlMessage::Connect { token: self.token }
                    };
                    debug!("repeating {:?}", msg);
                    self.send_control(msg, now);
                }
            }
            ConnState::Online => {
                let front = self
                    .resend
                    .front()
                    .map(|chunk| (chunk.first_send, chunk.last_send));
                if let Some((first_send, last_send)) = front {
                    if now.saturating_duration_since(first_send) > self.config.timeout {
                        self.state = ConnState::Error;
                        self.error = Some("too weak connection (not acked)".to_owned());
                        warn!("vital chunk not acked for {:?}", self.config.timeout);
                        return Err(NetError::Timeout);
                    }
                    if now.saturating_duration_since(last_send) > self.config.resend_interval {
                        self.resend_front(now);
                    }
                }

                self.flush(now);

                if now.saturating_duration_since(self.last_send) > self.config.keepalive_interval {
                    self.send_control(ControlMessage::KeepAlive, now);
                }
            }
            _ => {}
        }

        Ok(())
    }
}
