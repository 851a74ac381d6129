use std::collections::HashMap;

use super::handle::ConnectionHandle;
use crate::net::inbound::ConnId;

/// Active connections. Owned by the dispatcher task alone.
#[derive(Debug, Default)]
pub struct ChatState {
    conns: HashMap<ConnId, ConnectionHandle>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ConnectionHandle) {
        self.conns.insert(handle.id(), handle);
    }

    pub fn remove(&mut self, id: ConnId) -> Option<ConnectionHandle> {
        self.conns.remove(&id)
    }

    pub fn get(&self, id: ConnId) -> Option<&ConnectionHandle> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut ConnectionHandle> {
        self.conns.get_mut(&id)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Authenticated peers other than `except`, in id order.
    pub fn authenticated_except(&self, except: ConnId) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self
            .conns
            .values()
            .filter(|h| h.id() != except && h.is_authenticated())
            .map(|h| h.id())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Usernames of every authenticated peer, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .conns
            .values()
            .filter(|h| h.is_authenticated())
            .filter_map(|h| h.username().map(str::to_owned))
            .collect();
        names.sort_unstable();
        names
    }

    /// Case-insensitive lookup among authenticated peers other than `except`.
    pub fn username_taken(&self, name: &str, except: ConnId) -> bool {
        self.conns.values().any(|h| {
            h.id() != except
                && h.is_authenticated()
                && h.username().is_some_and(|u| u.eq_ignore_ascii_case(name))
        })
    }
}
