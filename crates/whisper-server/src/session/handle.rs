use std::net::SocketAddr;

use bytes::Bytes;
use tokio::{sync::mpsc::error::TrySendError, task::AbortHandle};
use tokio_util::sync::CancellationToken;

use crate::net::{inbound::ConnId, outbound::OutboundTx};

/// Server-side record of one peer.
///
/// Session fields are only written by the dispatcher and its handlers. The
/// connection tasks only observe closure through `cancel` and the outbound
/// queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnId,
    address: SocketAddr,
    outbound: OutboundTx,
    cancel: CancellationToken,
    pub(crate) username: Option<String>,
    pub(crate) key: Option<String>,
    /// Set once a valid INIT has been accepted.
    pub(crate) serve: bool,
    /// Set by a handler to have the dispatcher drop the connection after
    /// routing that handler's responses.
    pub(crate) close: bool,
    timeout: Option<AbortHandle>,
}

impl ConnectionHandle {
    pub fn new(id: ConnId, address: SocketAddr, outbound: OutboundTx, cancel: CancellationToken) -> Self {
        Self {
            id,
            address,
            outbound,
            cancel,
            username: None,
            key: None,
            serve: false,
            close: false,
            timeout: None,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_serving(&self) -> bool {
        self.serve
    }

    pub fn is_authenticated(&self) -> bool {
        self.serve && self.username.is_some()
    }

    /// Username once known, otherwise the peer address.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(name) => name.clone(),
            None => self.address.to_string(),
        }
    }

    pub(crate) fn arm_timeout(&mut self, timer: AbortHandle) {
        if let Some(old) = self.timeout.replace(timer) {
            old.abort();
        }
    }

    /// Removes the pending handshake timer. Only the first caller gets it.
    pub(crate) fn take_timeout(&mut self) -> Option<AbortHandle> {
        self.timeout.take()
    }

    /// Queues `frame` without waiting. `Full` means the peer has stopped
    /// reading and its writer is stuck behind the socket.
    pub(crate) fn try_send(&self, frame: Bytes) -> Result<(), TrySendError<Bytes>> {
        self.outbound.try_send(frame)
    }

    /// Cancels any pending timer. Once the handle, and with it the last
    /// outbound sender, is dropped the writer flushes what is queued, closes
    /// the socket and stops the reader.
    pub(crate) fn shutdown(&mut self) {
        if let Some(timer) = self.take_timeout() {
            timer.abort();
        }
    }

    /// Tears the connection down now, discarding anything still queued.
    pub(crate) fn abort(&mut self) {
        self.cancel.cancel();
        self.shutdown();
    }
}
