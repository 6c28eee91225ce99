use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("invalid address {0}")]
    InvalidAddress(String),
    #[error("could not resolve {0}")]
    AddressResolveError(String),
    #[error("error binding local addr to socket")]
    SocketBindError,
    #[error("error connecting to remote addr")]
    SocketConnectError,
    #[error("error sending data to remote addr")]
    SocketSendError,
    #[error("error recving data from remote addr")]
    SocketRecvError,
    #[error("packet too small, size={0}")]
    PacketTooSmall(usize),
    #[error("packet too large, size={0}")]
    PacketTooLarge(usize),
    #[error("packet payload too large, size={0}")]
    PayloadTooLarge(usize),
    #[error("unsupported connless packet version {0}")]
    BadVersion(u8),
    #[error("compressed packets are not supported")]
    CompressionUnsupported,
    #[error("chunk runs past the end of the packet")]
    ChunkTruncated,
    #[error("chunk too large, size={0}")]
    ChunkTooLarge(usize),
    #[error("unknown control message {0}")]
    UnknownControl(u8),
    #[error("control message too short")]
    ControlTruncated,
    #[error("invalid {0} field")]
    InvalidField(&'static str),
    #[error("empty control packet")]
    EmptyControl,
    #[error("resend buffer is full")]
    ResendBufferFull,
    #[error("not connected")]
    NotConnected,
    #[error("connection timed out")]
    Timeout,
    #[error("connection closed by peer: {0}")]
    Closed(String),
}
