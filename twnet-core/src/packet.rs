use crate::control::{CTRLMSG_CONNECT, CTRLMSG_TOKEN};
use crate::error::NetError;
use std::fmt;
use std::net::SocketAddr;

pub const NET_MAX_CHUNKHEADERSIZE: usize = 3;
pub const NET_PACKETHEADERSIZE: usize = 7;
pub const NET_PACKETHEADERSIZE_CONNLESS: usize = NET_PACKETHEADERSIZE + 2;
pub const NET_MAX_PACKETHEADERSIZE: usize = NET_PACKETHEADERSIZE_CONNLESS;
pub const NET_MAX_PACKETSIZE: usize = 1400;
pub const NET_MAX_PAYLOAD: usize = NET_MAX_PACKETSIZE - NET_MAX_PACKETHEADERSIZE;
pub const NET_PACKETVERSION: u8 = 1;
pub const NET_MAX_PACKET_CHUNKS: usize = 256;

pub const NET_TOKEN_MAX: u32 = 0xffff_ffff;
pub const NET_TOKEN_NONE: u32 = NET_TOKEN_MAX;
pub const NET_TOKENREQUEST_DATASIZE: usize = 512;

/// Bits of the 6 bit packet flag field.
pub mod flags {
    pub const CONTROL: u8 = 1;
    pub const RESEND: u8 = 2;
    pub const COMPRESSION: u8 = 4;
    pub const CONNLESS: u8 = 8;
}

/*
    connected header, 7 bytes

        ffffffaa  6 bit flags, 2 high bits of ack
        aaaaaaaa  low 8 bits of ack
        NNNNNNNN  number of chunks
        TTTTTTTT  token, big endian
        TTTTTTTT
        TTTTTTTT
        TTTTTTTT

    connless header, 9 bytes

        ffffffvv  6 bit flags, 2 bit version
        TTTTTTTT  token, big endian
        TTTTTTTT
        TTTTTTTT
        TTTTTTTT
        RRRRRRRR  response token, big endian
        RRRRRRRR
        RRRRRRRR
        RRRRRRRR

    a token that was never set explicitly is NET_TOKEN_NONE
*/

/// A packet under construction or freshly received
#[derive(Clone, PartialEq)]
pub struct PacketConstruct {
    pub token: u32,
    /// Only carried on the wire by connless packets. Also filled in from
    /// the payload of CONNECT and TOKEN control packets.
    pub response_token: u32,
    pub flags: u8,
    pub ack: u16,
    pub num_chunks: u8,
    pub data_size: usize,
    pub chunk_data: [u8; NET_MAX_PAYLOAD],
}

impl Default for PacketConstruct {
    fn default() -> Self {
        Self {
            token: NET_TOKEN_NONE,
            response_token: NET_TOKEN_NONE,
            flags: 0,
            ack: 0,
            num_chunks: 0,
            data_size: 0,
            chunk_data: [0u8; NET_MAX_PAYLOAD],
        }
    }
}

impl fmt::Debug for PacketConstruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketConstruct")
            .field("token", &format_args!("{:#010x}", self.token))
            .field("response_token", &format_args!("{:#010x}", self.response_token))
            .field("flags", &flag_names(self.flags))
            .field("ack", &self.ack)
            .field("num_chunks", &self.num_chunks)
            .field("data_size", &self.data_size)
            .finish()
    }
}

impl PacketConstruct {
    /// Creates an empty packet addressed with `token`
    pub fn new(token: u32, flags: u8) -> Self {
        Self {
            token,
            flags,
            ..Self::default()
        }
    }

    /// The token request the native library sends from `SendSample`: a
    /// TOKEN control message padded with the zeroed request area.
    pub fn sample() -> Self {
        let mut packet = Self::new(NET_TOKEN_NONE, flags::CONTROL);
        packet.chunk_data[0] = CTRLMSG_TOKEN;
        packet.data_size = 1 + NET_TOKENREQUEST_DATASIZE;
        packet
    }

    /// The used part of the payload buffer
    pub fn data(&self) -> &[u8] {
        &self.chunk_data[..self.data_size]
    }

    /// Replaces the payload
    pub fn set_data(&mut self, data: &[u8]) -> Result<(), NetError> {
        if data.len() > NET_MAX_PAYLOAD {
            return Err(NetError::PayloadTooLarge(data.len()));
        }
        self.chunk_data[..data.len()].copy_from_slice(data);
        self.data_size = data.len();
        Ok(())
    }

    /// Appends to the payload
    pub fn append(&mut self, data: &[u8]) -> Result<(), NetError> {
        let end = self.data_size + data.len();
        if end > NET_MAX_PAYLOAD {
            return Err(NetError::PayloadTooLarge(end));
        }
        self.chunk_data[self.data_size..end].copy_from_slice(data);
        self.data_size = end;
        Ok(())
    }

    /// Room left in the payload buffer
    pub fn remaining(&self) -> usize {
        NET_MAX_PAYLOAD - self.data_size
    }

    pub fn is_control(&self) -> bool {
        self.flags & flags::CONTROL != 0
    }

    pub fn is_connless(&self) -> bool {
        self.flags & flags::CONNLESS != 0
    }

    /// Serializes the packet for the wire. Payloads are never compressed.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        if self.data_size > NET_MAX_PAYLOAD {
            return Err(NetError::PayloadTooLarge(self.data_size));
        }

        let mut buf = Vec::with_capacity(NET_MAX_PACKETHEADERSIZE + self.data_size);
        if self.is_connless() {
            buf.push((flags::CONNLESS << 2) | NET_PACKETVERSION);
            buf.extend_from_slice(&self.token.to_be_bytes());
            buf.extend_from_slice(&self.response_token.to_be_bytes());
        } else {
            let packet_flags = self.flags & !flags::COMPRESSION & 0x3f;
            buf.push((packet_flags << 2) | ((self.ack >> 8) as u8 & 0x03));
            buf.push((self.ack & 0xff) as u8);
            buf.push(self.num_chunks);
            buf.extend_from_slice(&self.token.to_be_bytes());
        }
        buf.extend_from_slice(self.data());
        Ok(buf)
    }

    /// Parses a received datagram
    pub fn decode(buf: &[u8]) -> Result<Self, NetError> {
        let size = buf.len();
        if size < NET_PACKETHEADERSIZE {
            return Err(NetError::PacketTooSmall(size));
        }
        if size > NET_MAX_PACKETSIZE {
            return Err(NetError::PacketTooLarge(size));
        }

        let mut packet = Self::default();
        packet.flags = (buf[0] & 0xfc) >> 2;

        if packet.is_connless() {
            if size < NET_PACKETHEADERSIZE_CONNLESS {
                return Err(NetError::PacketTooSmall(size));
            }
            let version = buf[0] & 0x03;
            if version != NET_PACKETVERSION {
                return Err(NetError::BadVersion(version));
            }

            packet.flags = flags::CONNLESS;
            packet.token = read_token(&buf[1..5]);
            packet.response_token = read_token(&buf[5..9]);
            packet.set_data(&buf[NET_PACKETHEADERSIZE_CONNLESS..])?;
        } else {
            if size - NET_PACKETHEADERSIZE > NET_MAX_PAYLOAD {
                return Err(NetError::PayloadTooLarge(size - NET_PACKETHEADERSIZE));
            }
            if packet.flags & flags::COMPRESSION != 0 {
                return Err(NetError::CompressionUnsupported);
            }

            packet.ack = (((buf[0] & 0x03) as u16) << 8) | buf[1] as u16;
            packet.num_chunks = buf[2];
            packet.token = read_token(&buf[3..7]);
            packet.set_data(&buf[NET_PACKETHEADERSIZE..])?;
        }

        // control byte followed by the sender's token
        if packet.is_control()
            && packet.data_size >= 5
            && (packet.chunk_data[0] == CTRLMSG_CONNECT || packet.chunk_data[0] == CTRLMSG_TOKEN)
        {
            packet.response_token = read_token(&packet.chunk_data[1..5]);
        }

        Ok(packet)
    }

    /// Multi-line dump used for tracing traffic from local peers
    pub fn describe(&self, addr: &SocketAddr, wire_size: usize) -> String {
        let names = flag_names(self.flags);
        let names = if names.is_empty() {
            String::new()
        } else {
            format!(" ({})", names)
        };
        let raw: String = self
            .data()
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();

        format!(
            "{} size={} flags={}{}\n  data: {}\n  data_raw: {}",
            addr,
            wire_size,
            self.flags,
            names,
            to_hex(self.data()),
            raw
        )
    }
}

pub(crate) fn read_token(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Renders set packet flags as `CONTROL|RESEND|...`
pub fn flag_names(packet_flags: u8) -> String {
    let names = [
        (flags::CONTROL, "CONTROL"),
        (flags::RESEND, "RESEND"),
        (flags::COMPRESSION, "COMPRESSION"),
        (flags::CONNLESS, "CONNLESS"),
    ];
    names
        .iter()
        .filter(|(bit, _)| packet_flags & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join("|")
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_capacity_leaves_room_for_connless_header() {
        assert_eq!(NET_MAX_PAYLOAD, 1391);
    }

    #[test]
    fn connected_header_layout() {
        let mut packet = PacketConstruct::new(0x0102_0304, flags::CONTROL | flags::RESEND);
        packet.ack = 0x2ab;
        packet.num_chunks = 3;
        packet.set_data(&[9, 8]).unwrap();

        let bytes = packet.encode().unwrap();
        assert_eq!(
            bytes,
            vec![(0b11 << 2) | 0b10, 0xab, 3, 0x01, 0x02, 0x03, 0x04, 9, 8]
        );
    }

    #[test]
    fn compression_flag_is_never_sent() {
        let packet = PacketConstruct::new(1, flags::COMPRESSION);
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[0] & (flags::COMPRESSION << 2), 0);
    }

    #[test]
    fn decode_connected_packet() {
        let buf = [(flags::RESEND << 2) | 0x01, 0x05, 2, 0xde, 0xad, 0xbe, 0xef, 1, 2, 3];
        let packet = PacketConstruct::decode(&buf).unwrap();
        assert_eq!(packet.flags, flags::RESEND);
        assert_eq!(packet.ack, 0x105);
        assert_eq!(packet.num_chunks, 2);
        assert_eq!(packet.token, 0xdead_beef);
        assert_eq!(packet.response_token, NET_TOKEN_NONE);
        assert_eq!(packet.data(), &[1, 2, 3]);
    }

    #[test]
    fn decode_connless_packet() {
        let mut buf = vec![(flags::CONNLESS << 2) | NET_PACKETVERSION];
        buf.extend_from_slice(&[0, 0, 0, 7]);
        buf.extend_from_slice(&[0, 0, 0, 9]);
        buf.extend_from_slice(b"info");

        let packet = PacketConstruct::decode(&buf).unwrap();
        assert!(packet.is_connless());
        assert_eq!(packet.token, 7);
        assert_eq!(packet.response_token, 9);
        assert_eq!(packet.ack, 0);
        assert_eq!(packet.data(), b"info");
    }

    #[test]
    fn decode_rejects_bad_sizes() {
        assert!(matches!(
            PacketConstruct::decode(&[0u8; 6]),
            Err(NetError::PacketTooSmall(6))
        ));
        assert!(matches!(
            PacketConstruct::decode(&[0u8; NET_MAX_PACKETSIZE + 1]),
            Err(NetError::PacketTooLarge(_))
        ));
        let connless = [(flags::CONNLESS << 2) | NET_PACKETVERSION, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            PacketConstruct::decode(&connless),
            Err(NetError::PacketTooSmall(8))
        ));
    }

    #[test]
    fn decode_rejects_connected_payload_past_capacity() {
        let buf = [0u8; NET_MAX_PACKETSIZE];
        assert!(matches!(
            PacketConstruct::decode(&buf),
            Err(NetError::PayloadTooLarge(1393))
        ));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let buf = [(flags::CONNLESS << 2) | 2, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            PacketConstruct::decode(&buf),
            Err(NetError::BadVersion(2))
        ));
    }

    #[test]
    fn decode_rejects_compressed_payload() {
        let buf = [flags::COMPRESSION << 2, 0, 0, 0, 0, 0, 0, 0xff];
        assert!(matches!(
            PacketConstruct::decode(&buf),
            Err(NetError::CompressionUnsupported)
        ));
    }

    #[test]
    fn control_token_reply_carries_response_token() {
        let buf = [
            flags::CONTROL << 2,
            0,
            0,
            0x11,
            0x22,
            0x33,
            0x44,
            CTRLMSG_TOKEN,
            0xaa,
            0xbb,
            0xcc,
            0xdd,
        ];
        let packet = PacketConstruct::decode(&buf).unwrap();
        assert_eq!(packet.token, 0x1122_3344);
        assert_eq!(packet.response_token, 0xaabb_ccdd);
    }

    #[test]
    fn sample_is_padded_token_request() {
        let sample = PacketConstruct::sample();
        assert_eq!(sample.token, NET_TOKEN_NONE);
        assert_eq!(sample.flags, flags::CONTROL);
        assert_eq!(sample.data_size, 1 + NET_TOKENREQUEST_DATASIZE);
        assert_eq!(sample.chunk_data[0], CTRLMSG_TOKEN);

        let bytes = sample.encode().unwrap();
        assert_eq!(bytes.len(), NET_PACKETHEADERSIZE + 1 + NET_TOKENREQUEST_DATASIZE);
        assert_eq!(&bytes[3..7], &[0xff; 4]);
    }

    #[test]
    fn append_stops_at_capacity() {
        let mut packet = PacketConstruct::default();
        packet.append(&[0u8; NET_MAX_PAYLOAD - 1]).unwrap();
        assert_eq!(packet.remaining(), 1);
        assert!(packet.append(&[1, 2]).is_err());
        assert_eq!(packet.data_size, NET_MAX_PAYLOAD - 1);
    }

    #[test]
    fn describe_lists_flags_and_payload() {
        let mut packet = PacketConstruct::new(0, flags::CONTROL | flags::CONNLESS);
        packet.set_data(&[0x41, 0x00]).unwrap();
        let addr: SocketAddr = "127.0.0.1:8303".parse().unwrap();
        let text = packet.describe(&addr, 9);
        assert!(text.starts_with("127.0.0.1:8303 size=9 flags=9 (CONTROL|CONNLESS)"));
        assert!(text.contains("data: 41 00"));
        assert!(text.contains("data_raw: A."));
    }
}
