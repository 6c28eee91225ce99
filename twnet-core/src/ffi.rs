//! C ABI with the symbol names of the native network library, so existing
//! ctypes drivers can load this crate's cdylib instead.
//!
//! Every entry point returns 0 on success and -1 on failure; failures are
//! logged. Calls are serialized through one process wide bridge.

use crate::client::Client;
use crate::config::Config;
use crate::connection::Event;
use crate::error::NetError;
use crate::packet::{PacketConstruct, NET_MAX_PAYLOAD};
use env_logger::Env;
use log::{error, info};
use std::convert::TryFrom;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uchar, c_uint};
use std::sync::Mutex;
use tokio::runtime::{Builder, Runtime};

/// Layout of the packet record shared with C callers
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawPacketConstruct {
    pub token: c_uint,
    pub response_token: c_uint,
    pub flags: c_int,
    pub ack: c_int,
    pub num_chunks: c_int,
    pub data_size: c_int,
    pub chunk_data: [c_uchar; NET_MAX_PAYLOAD],
}

/// Sum of the record's field sizes, before any alignment padding
pub const RAW_PACKET_CONSTRUCT_FIELDS_SIZE: usize = 6 * 4 + NET_MAX_PAYLOAD;

impl TryFrom<&RawPacketConstruct> for PacketConstruct {
    type Error = NetError;

    fn try_from(raw: &RawPacketConstruct) -> Result<Self, Self::Error> {
        if raw.flags < 0 || raw.flags > 0x3f {
            return Err(NetError::InvalidField("flags"));
        }
        if raw.ack < 0 || raw.ack > 0x3ff {
            return Err(NetError::InvalidField("ack"));
        }
        if raw.num_chunks < 0 || raw.num_chunks > 0xff {
            return Err(NetError::InvalidField("num_chunks"));
        }
        if raw.data_size < 0 || raw.data_size as usize > NET_MAX_PAYLOAD {
            return Err(NetError::InvalidField("data_size"));
        }

        let mut packet = PacketConstruct::new(raw.token, raw.flags as u8);
        packet.response_token = raw.response_token;
        packet.ack = raw.ack as u16;
        packet.num_chunks = raw.num_chunks as u8;
        packet.set_data(&raw.chunk_data[..raw.data_size as usize])?;
        Ok(packet)
    }
}

impl From<&PacketConstruct> for RawPacketConstruct {
    fn from(packet: &PacketConstruct) -> Self {
        Self {
            token: packet.token,
            response_token: packet.response_token,
            flags: packet.flags as c_int,
            ack: packet.ack as c_int,
            num_chunks: packet.num_chunks as c_int,
            data_size: packet.data_size as c_int,
            chunk_data: packet.chunk_data,
        }
    }
}

struct Bridge {
    runtime: Runtime,
    client: Client,
}

static BRIDGE: Mutex<Option<Bridge>> = Mutex::new(None);

fn status(result: Result<(), NetError>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            -1
        }
    }
}

fn with_bridge<F>(f: F) -> c_int
where
    F: FnOnce(&mut Bridge) -> Result<(), NetError>,
{
    let mut guard = match BRIDGE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match guard.as_mut() {
        Some(bridge) => status(f(bridge)),
        None => status(Err(NetError::NotConnected)),
    }
}

fn connect(ip: *const c_char, port: c_int) -> Result<(), NetError> {
    if ip.is_null() {
        return Err(NetError::InvalidAddress("(null)".to_owned()));
    }
    // SAFETY: the caller passes a NUL terminated string that outlives this call
    let host = unsafe { CStr::from_ptr(ip) }.to_string_lossy().into_owned();
    if port < 0 || port > u16::MAX as c_int {
        return Err(NetError::InvalidAddress(format!("{}:{}", host, port)));
    }
    info!("connecting to ip={} port={}", host, port);

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|_| NetError::SocketBindError)?;
    let client = runtime.block_on(Client::connect(&host, port as u16, Config::default()))?;

    let mut guard = match BRIDGE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(Bridge { runtime, client });
    Ok(())
}

/// Resolves `ip`, binds a local socket and starts the handshake. Replaces
/// any earlier connection.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn Connect(ip: *const c_char, port: c_int) -> c_int {
    let _ = env_logger::Builder::from_env(Env::default().filter_or("TWNET_LOG", "info")).try_init();
    status(connect(ip, port))
}

/// Sends a caller built packet record as is
#[no_mangle]
#[allow(non_snake_case, clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn Send(packet: *const RawPacketConstruct) -> c_int {
    if packet.is_null() {
        return status(Err(NetError::InvalidField("packet")));
    }
    // SAFETY: non-null and, per the C contract, pointing at a live record
    let raw = unsafe { &*packet };
    with_bridge(|bridge| {
        let packet = PacketConstruct::try_from(raw)?;
        let Bridge { runtime, client } = bridge;
        runtime.block_on(client.send(&packet)).map(|_| ())
    })
}

/// Sends the padded token request
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn SendSample() -> c_int {
    with_bridge(|bridge| {
        let Bridge { runtime, client } = bridge;
        runtime.block_on(client.send_sample()).map(|_| ())
    })
}

/// Processes pending traffic and timers once
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn PumpNetwork() -> c_int {
    with_bridge(|bridge| {
        let Bridge { runtime, client } = bridge;
        for event in runtime.block_on(client.pump_network())? {
            match event {
                Event::Chunk { vital, data } => {
                    info!("received chunk vital={} size={}", vital, data.len())
                }
                Event::Connless { data, .. } => info!("received connless size={}", data.len()),
                other => info!("{:?}", other),
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnState;
    use crate::control::{ControlMessage, CTRLMSG_CONNECT, CTRLMSG_TOKEN};
    use crate::packet::{flags, NET_PACKETHEADERSIZE, NET_TOKENREQUEST_DATASIZE, NET_TOKEN_NONE};
    use std::ffi::CString;
    use std::mem;
    use std::net::{SocketAddr, UdpSocket};
    use std::ptr;
    use std::thread;
    use std::time::Duration;

    const SERVER_TOKEN: u32 = 0x7e57_0001;

    fn recv_packet(server: &UdpSocket) -> (PacketConstruct, usize, SocketAddr) {
        let mut buf = [0u8; 2048];
        let (len, from) = server.recv_from(&mut buf).expect("server recv");
        (PacketConstruct::decode(&buf[..len]).unwrap(), len, from)
    }

    fn bridge_state() -> Option<ConnState> {
        let guard = match BRIDGE.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().map(|bridge| bridge.client.state())
    }

    #[test]
    fn record_layout_matches_native() {
        assert_eq!(RAW_PACKET_CONSTRUCT_FIELDS_SIZE, 1415);
        // one byte of tail padding keeps the record 4 byte aligned
        assert_eq!(mem::size_of::<RawPacketConstruct>(), 1416);
        assert_eq!(mem::align_of::<RawPacketConstruct>(), 4);
    }

    #[test]
    fn raw_record_converts_both_ways() {
        let mut packet = PacketConstruct::new(42, flags::CONTROL);
        packet.ack = 7;
        packet.set_data(&[5, 1, 2, 3, 4]).unwrap();

        let raw = RawPacketConstruct::from(&packet);
        assert_eq!(raw.data_size, 5);
        assert_eq!(PacketConstruct::try_from(&raw).unwrap(), packet);
    }

    #[test]
    fn bad_raw_fields_are_rejected() {
        let mut raw = RawPacketConstruct::from(&PacketConstruct::default());
        raw.data_size = NET_MAX_PAYLOAD as c_int + 1;
        assert!(matches!(
            PacketConstruct::try_from(&raw),
            Err(NetError::InvalidField("data_size"))
        ));
        raw.data_size = 0;
        raw.ack = -1;
        assert!(PacketConstruct::try_from(&raw).is_err());
    }

    #[test]
    fn c_entry_points_drive_a_loopback_server() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = server.local_addr().unwrap().port();

        let ip = CString::new("127.0.0.1").unwrap();
        assert_eq!(Connect(ip.as_ptr(), port as c_int), 0);
        assert_eq!(bridge_state(), Some(ConnState::Token));

        let (request, _, from) = recv_packet(&server);
        assert_eq!(request.token, NET_TOKEN_NONE);
        assert_eq!(request.chunk_data[0], CTRLMSG_TOKEN);
        let client_token = request.response_token;

        let mut reply = PacketConstruct::new(client_token, flags::CONTROL);
        reply
            .set_data(&ControlMessage::Token { token: SERVER_TOKEN }.encode())
            .unwrap();
        server.send_to(&reply.encode().unwrap(), from).unwrap();

        for _ in 0..200 {
            assert_eq!(PumpNetwork(), 0);
            if bridge_state() == Some(ConnState::Connect) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(bridge_state(), Some(ConnState::Connect));

        let (connect, _, _) = recv_packet(&server);
        assert_eq!(connect.token, SERVER_TOKEN);
        assert_eq!(connect.chunk_data[0], CTRLMSG_CONNECT);

        assert_eq!(SendSample(), 0);
        let (sample, len, _) = recv_packet(&server);
        assert_eq!(len, NET_PACKETHEADERSIZE + 1 + NET_TOKENREQUEST_DATASIZE);
        assert!(sample.is_control());
        assert_eq!(sample.token, NET_TOKEN_NONE);
        assert_eq!(sample.chunk_data[0], CTRLMSG_TOKEN);

        let mut packet = PacketConstruct::new(SERVER_TOKEN, 0);
        packet.ack = 3;
        packet.num_chunks = 1;
        packet.set_data(&[0x00, 0x02, b'h', b'i']).unwrap();
        let raw = RawPacketConstruct::from(&packet);
        assert_eq!(Send(&raw), 0);
        let (received, _, _) = recv_packet(&server);
        assert_eq!(received, packet);
    }

    #[test]
    fn null_pointers_fail_cleanly() {
        assert_eq!(Send(ptr::null()), -1);
        assert_eq!(Connect(ptr::null(), 8303), -1);
    }
}
