use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 50005;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    /// Upper bound on how long `connect` may block the calling thread.
    pub connect_timeout: Duration,
    /// Encoded frames waiting for the writer.
    pub outbound_queue: usize,
    /// Decoded packets waiting for the response dispatcher.
    pub inbound_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            connect_timeout: Duration::from_secs(5),
            outbound_queue: 64,
            inbound_queue: 64,
        }
    }
}
