use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 50005;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// How long a fresh connection may stay silent before it must send INIT.
    pub handshake_timeout: Duration,
    /// Capacity of the channel feeding the dispatcher.
    pub inbound_queue: usize,
    /// Per-connection capacity of encoded frames waiting for the writer.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            handshake_timeout: Duration::from_secs(10),
            inbound_queue: 1024,
            outbound_queue: 256,
        }
    }
}
