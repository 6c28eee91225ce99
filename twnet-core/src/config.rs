use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8303;
pub const NET_CONN_BUFFERSIZE: usize = 1024 * 32;

/// Protocol timings and limits for a client connection
#[derive(Clone, Debug)]
pub struct Config {
    /// Silence from the server after which the connection is dropped
    pub timeout: Duration,
    /// Age of an unacknowledged vital chunk before it is sent again
    pub resend_interval: Duration,
    /// Idle time after which a keepalive is sent
    pub keepalive_interval: Duration,
    /// Gap between repeated TOKEN/CONNECT requests while handshaking
    pub handshake_retry: Duration,
    /// Tick of the pump loop
    pub pump_interval: Duration,
    /// Bytes of unacknowledged vital chunk data kept for resending
    pub resend_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            resend_interval: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(1),
            handshake_retry: Duration::from_secs(1),
            pump_interval: Duration::from_millis(10),
            resend_buffer_size: NET_CONN_BUFFERSIZE,
        }
    }
}
