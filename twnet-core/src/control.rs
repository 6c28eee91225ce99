use crate::error::NetError;
use crate::packet::{read_token, NET_TOKENREQUEST_DATASIZE};

pub const CTRLMSG_KEEPALIVE: u8 = 0;
pub const CTRLMSG_CONNECT: u8 = 1;
pub const CTRLMSG_ACCEPT: u8 = 2;
pub const CTRLMSG_CLOSE: u8 = 4;
pub const CTRLMSG_TOKEN: u8 = 5;

/// Payload of a packet carrying the CONTROL flag
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    KeepAlive,
    Connect { token: u32 },
    Accept,
    Close { reason: Option<String> },
    Token { token: u32 },
}

impl ControlMessage {
    pub fn code(&self) -> u8 {
        match self {
            ControlMessage::KeepAlive => CTRLMSG_KEEPALIVE,
            ControlMessage::Connect { .. } => CTRLMSG_CONNECT,
            ControlMessage::Accept => CTRLMSG_ACCEPT,
            ControlMessage::Close { .. } => CTRLMSG_CLOSE,
            ControlMessage::Token { .. } => CTRLMSG_TOKEN,
        }
    }

    /// Serializes the message. CONNECT and TOKEN are padded to the token
    /// request size so a spoofed request can't be amplified by the reply.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.code()];
        match self {
            ControlMessage::Connect { token } | ControlMessage::Token { token } => {
                buf.extend_from_slice(&token.to_be_bytes());
                buf.resize(1 + NET_TOKENREQUEST_DATASIZE, 0);
            }
            ControlMessage::Close {
                reason: Some(reason),
            } => {
                buf.extend_from_slice(reason.as_bytes());
                buf.push(0);
            }
            _ => {}
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, NetError> {
        let (&code, rest) = buf.split_first().ok_or(NetError::EmptyControl)?;
        match code {
            CTRLMSG_KEEPALIVE => Ok(ControlMessage::KeepAlive),
            CTRLMSG_ACCEPT => Ok(ControlMessage::Accept),
            CTRLMSG_CONNECT | CTRLMSG_TOKEN => {
                if rest.len() < 4 {
                    return Err(NetError::ControlTruncated);
                }
                let token = read_token(rest);
                if code == CTRLMSG_CONNECT {
                    Ok(ControlMessage::Connect { token })
                } else {
                    Ok(ControlMessage::Token { token })
                }
            }
            CTRLMSG_CLOSE => {
                let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                let reason = if end == 0 {
                    None
                } else {
                    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
                };
                Ok(ControlMessage::Close { reason })
            }
            other => Err(NetError::UnknownControl(other)),
        }
    }
}
