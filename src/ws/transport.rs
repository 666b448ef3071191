//! Outbound delivery and the connection table

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::util::time::unix_millis;

use super::protocol::PeerMsg;

/// Per-peer outbound queue depth
pub const PEER_QUEUE_CAPACITY: usize = 256;

/// Who an outbound message is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Broadcast,
    To(String),
    /// Everyone but the originating peer (host relay)
    AllExcept(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub msg: PeerMsg,
}

impl Outbound {
    pub fn broadcast(msg: PeerMsg) -> Self {
        Self {
            target: Target::Broadcast,
            msg,
        }
    }

    pub fn to(peer_id: &str, msg: PeerMsg) -> Self {
        Self {
            target: Target::To(peer_id.to_string()),
            msg,
        }
    }

    pub fn all_except(peer_id: &str, msg: PeerMsg) -> Self {
        Self {
            target: Target::AllExcept(peer_id.to_string()),
            msg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Host,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Pending,
    Open,
    Closed,
}

/// One row of the connection table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub peer_id: String,
    /// Role of the peer at the far end
    pub role: PeerRole,
    pub state: ConnectionState,
    pub last_received_ms: u64,
}

impl Connection {
    pub fn pending(peer_id: &str, role: PeerRole) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            role,
            state: ConnectionState::Pending,
            last_received_ms: unix_millis(),
        }
    }
}

/// Outbound side of the peer network. `deliver` never blocks the match task.
pub trait Transport: Send + Sync {
    fn deliver(&self, out: Outbound);

    fn connections(&self) -> Vec<Connection>;

    fn open_count(&self) -> usize {
        self.connections()
            .iter()
            .filter(|c| c.state == ConnectionState::Open)
            .count()
    }
}

fn push(tx: &mpsc::Sender<String>, peer_id: &str, text: String) {
    match tx.try_send(text) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(peer_id = %peer_id, "Peer queue full, dropping message");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(peer_id = %peer_id, "Peer queue closed");
        }
    }
}

struct PeerSlot {
    tx: mpsc::Sender<String>,
    conn: Connection,
}

/// Host side: one queue per connected client (star topology)
#[derive(Default)]
pub struct PeerHub {
    peers: DashMap<String, PeerSlot>,
}

impl PeerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending peer; `None` when the id is already connected
    pub fn register(&self, peer_id: &str) -> Option<mpsc::Receiver<String>> {
        if self.peers.contains_key(peer_id) {
            return None;
        }
        let (tx, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
        self.peers.insert(
            peer_id.to_string(),
            PeerSlot {
                tx,
                conn: Connection::pending(peer_id, PeerRole::Client),
            },
        );
        Some(rx)
    }

    pub fn mark_open(&self, peer_id: &str) {
        if let Some(mut slot) = self.peers.get_mut(peer_id) {
            slot.conn.state = ConnectionState::Open;
        }
    }

    pub fn touch(&self, peer_id: &str) {
        if let Some(mut slot) = self.peers.get_mut(peer_id) {
            slot.conn.last_received_ms = unix_millis();
        }
    }

    /// Drop a peer's row and queue
    pub fn unregister(&self, peer_id: &str) -> bool {
        self.peers.remove(peer_id).is_some()
    }
}

impl Transport for PeerHub {
    fn deliver(&self, out: Outbound) {
        let text = match out.msg.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = out.msg.kind(), error = %e, "Failed to encode peer message");
                return;
            }
        };

        match &out.target {
            Target::To(peer_id) => match self.peers.get(peer_id) {
                Some(slot) => push(&slot.tx, peer_id, text),
                None => debug!(peer_id = %peer_id, "Delivery to unknown peer skipped"),
            },
            Target::Broadcast => {
                for slot in self.peers.iter() {
                    push(&slot.tx, slot.key(), text.clone());
                }
            }
            Target::AllExcept(origin) => {
                for slot in self.peers.iter().filter(|s| s.key() != origin) {
                    push(&slot.tx, slot.key(), text.clone());
                }
            }
        }
    }

    fn connections(&self) -> Vec<Connection> {
        self.peers.iter().map(|s| s.conn.clone()).collect()
    }
}

/// Client side: the single upstream link to the host
pub struct HostLink {
    conn: Mutex<Connection>,
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl HostLink {
    pub fn new(host_peer_id: &str) -> Self {
        Self {
            conn: Mutex::new(Connection::pending(host_peer_id, PeerRole::Host)),
            tx: Mutex::new(None),
        }
    }

    pub fn host_peer_id(&self) -> String {
        self.conn.lock().peer_id.clone()
    }

    /// Attach the writer queue of a freshly opened socket
    pub fn attach(&self, tx: mpsc::Sender<String>) {
        *self.tx.lock() = Some(tx);
        let mut conn = self.conn.lock();
        conn.state = ConnectionState::Open;
        conn.last_received_ms = unix_millis();
    }

    pub fn touch(&self) {
        self.conn.lock().last_received_ms = unix_millis();
    }

    pub fn detach(&self) {
        self.tx.lock().take();
        self.conn.lock().state = ConnectionState::Closed;
    }
}

impl Transport for HostLink {
    /// Every target goes upstream; the host relays
    fn deliver(&self, out: Outbound) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            trace!(kind = out.msg.kind(), "No host link, message dropped");
            return;
        };
        match out.msg.encode() {
            Ok(text) => push(tx, "host", text),
            Err(e) => warn!(kind = out.msg.kind(), error = %e, "Failed to encode peer message"),
        }
    }

    fn connections(&self) -> Vec<Connection> {
        vec![self.conn.lock().clone()]
    }
}

/// Solo matches: nothing leaves the process
pub struct Offline;

impl Transport for Offline {
    fn deliver(&self, out: Outbound) {
        trace!(kind = out.msg.kind(), "Offline, message dropped");
    }

    fn connections(&self) -> Vec<Connection> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score() -> PeerMsg {
        PeerMsg::ScoreUpdate { alpha: 1, bravo: 0 }
    }

    #[test]
    fn hub_routes_by_target() {
        let hub = PeerHub::new();
        let mut a = hub.register("a").unwrap();
        let mut b = hub.register("b").unwrap();

        hub.deliver(Outbound::broadcast(score()));
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());

        hub.deliver(Outbound::all_except("a", score()));
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());

        hub.deliver(Outbound::to("a", score()));
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn duplicate_peer_is_refused() {
        let hub = PeerHub::new();
        let _rx = hub.register("a").unwrap();
        assert!(hub.register("a").is_none());
        assert!(hub.unregister("a"));
        assert!(!hub.unregister("a"));
        assert!(hub.register("a").is_some());
    }

    #[test]
    fn connection_table_tracks_state() {
        let hub = PeerHub::new();
        let _rx = hub.register("a").unwrap();
        assert_eq!(hub.open_count(), 0);
        hub.mark_open("a");
        assert_eq!(hub.open_count(), 1);
        assert_eq!(hub.connections()[0].role, PeerRole::Client);
    }

    #[test]
    fn host_link_drops_until_attached() {
        let link = HostLink::new("arena-room");
        link.deliver(Outbound::broadcast(score()));
        assert_eq!(link.connections()[0].state, ConnectionState::Pending);

        let (tx, mut rx) = mpsc::channel(4);
        link.attach(tx);
        link.deliver(Outbound::to("someone", score()));
        assert!(rx.try_recv().is_ok());

        link.detach();
        assert_eq!(link.connections()[0].state, ConnectionState::Closed);
        assert_eq!(link.open_count(), 0);
    }
}
