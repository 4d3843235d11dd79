use std::{
    collections::HashMap,
    net::IpAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    enrichment::DeviceInfo,
    recipient::{ConnectionHandle, ConnectionId},
    roster::{RosterEntry, RosterSnapshot},
};

/// Chat participant joined over TCP. Immutable once created; a reconnect
/// produces a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub username: String,
    pub ip: IpAddr,
    pub device: DeviceInfo,
}

impl ClientRecord {
    pub fn new(username: impl Into<String>, ip: IpAddr, device: DeviceInfo) -> Self {
        Self {
            username: username.into(),
            ip,
            device,
        }
    }

    fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            username: self.username.clone(),
            ip: self.ip,
        }
    }
}

struct Participant {
    handle: ConnectionHandle,
    record: ClientRecord,
}

#[derive(Default)]
struct RegistryState {
    participants: HashMap<ConnectionId, Participant>,
    observers: HashMap<ConnectionId, ConnectionHandle>,
}

impl RegistryState {
    fn contains(&self, id: ConnectionId) -> bool {
        self.participants.contains_key(&id) || self.observers.contains_key(&id)
    }

    fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot::new(
            self.participants
                .values()
                .map(|participant| participant.record.roster_entry()),
        )
    }
}

/// Every live connection the hub knows about.
///
/// TCP participants and WebSocket observers sit in two collections behind
/// one lock, so readers never see a connection half-added or half-removed.
/// Accessors copy data out; nothing hands out a guard.
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Adds a chat participant. Returns `false` (and leaves the registry
    /// untouched) when the handle is already registered.
    pub async fn register_tcp(&self, handle: ConnectionHandle, record: ClientRecord) -> bool {
        let id = handle.id();
        let mut state = self.state.lock().await;
        if state.contains(id) {
            warn!(connection = %id, username = %record.username, "connection already registered");
            return false;
        }
        state.participants.insert(id, Participant { handle, record });
        true
    }

    /// Adds a roster observer. Returns `false` for a duplicate handle.
    pub async fn register_ws(&self, handle: ConnectionHandle) -> bool {
        let id = handle.id();
        let mut state = self.state.lock().await;
        if state.contains(id) {
            warn!(connection = %id, "connection already registered");
            return false;
        }
        state.observers.insert(id, handle);
        true
    }

    /// Removes a connection from whichever collection holds it. Only TCP
    /// participants yield a record; unknown ids are ignored.
    pub async fn deregister(&self, id: ConnectionId) -> Option<ClientRecord> {
        let mut state = self.state.lock().await;
        if let Some(participant) = state.participants.remove(&id) {
            return Some(participant.record);
        }
        state.observers.remove(&id);
        None
    }

    pub async fn snapshot(&self) -> RosterSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn all_recipients(&self) -> Vec<ConnectionHandle> {
        let state = self.state.lock().await;
        state
            .participants
            .values()
            .map(|participant| participant.handle.clone())
            .chain(state.observers.values().cloned())
            .collect()
    }

    pub async fn observers(&self) -> Vec<ConnectionHandle> {
        self.state.lock().await.observers.values().cloned().collect()
    }

    /// Roster and the observers that should see it, taken under one lock.
    pub async fn roster_view(&self) -> (RosterSnapshot, Vec<ConnectionHandle>) {
        let state = self.state.lock().await;
        (state.snapshot(), state.observers.values().cloned().collect())
    }

    pub async fn participant_count(&self) -> usize {
        self.state.lock().await.participants.len()
    }

    pub async fn observer_count(&self) -> usize {
        self.state.lock().await.observers.len()
    }
}
