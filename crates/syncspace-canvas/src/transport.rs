//! Transport boundary and an in-process loopback room.
//!
//! The hosted provider that relays CRDT updates and presence between peers is
//! out of process. [`SyncProvider`] is the seam a session talks to; the
//! [`LoopbackRoom`] implements it in memory so that several replicas can be
//! driven from one thread in tests and in the CLI simulation.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use smol_str::SmolStr;

use crate::error::CanvasError;
use crate::presence::{ConnectionId, PresenceEvent};

/// Something a provider reports back to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// The initial (or renewed) state exchange finished or was invalidated.
    Sync(bool),
    /// Raw transport status: `connecting`, `connected`, `disconnected`.
    Status(SmolStr),
    /// A CRDT update from another peer.
    Update(Vec<u8>),
    Presence(PresenceEvent),
}

/// A connection to a room on some relay.
pub trait SyncProvider {
    /// Stable id the relay assigned to this connection.
    fn connection_id(&self) -> ConnectionId;

    /// Send a committed local update to the other peers.
    fn broadcast(&mut self, update: &[u8]) -> Result<(), CanvasError>;

    fn broadcast_presence(&mut self, event: PresenceEvent) -> Result<(), CanvasError>;

    /// Drain everything that arrived since the last poll.
    fn poll(&mut self) -> Vec<ProviderEvent>;

    /// Leave the room. Safe to call more than once.
    fn destroy(&mut self);
}

#[derive(Default)]
struct PeerSlot {
    online: bool,
    queue: VecDeque<ProviderEvent>,
    /// Events that arrived while offline, delivered on resume.
    held: Vec<ProviderEvent>,
    /// Local updates sent while offline, relayed on resume.
    outbox: Vec<Vec<u8>>,
    joined: Option<PresenceEvent>,
}

impl PeerSlot {
    fn deliver(&mut self, event: ProviderEvent) {
        if self.online {
            self.queue.push_back(event);
        } else {
            self.held.push(event);
        }
    }
}

#[derive(Default)]
struct RoomState {
    name: SmolStr,
    /// Every update relayed so far, replayed to late joiners.
    log: Vec<Vec<u8>>,
    peers: BTreeMap<ConnectionId, PeerSlot>,
    next_id: ConnectionId,
    refuse_connections: bool,
}

impl RoomState {
    fn relay(&mut self, from: ConnectionId, update: Vec<u8>) {
        for (id, slot) in self.peers.iter_mut() {
            if *id != from {
                slot.deliver(ProviderEvent::Update(update.clone()));
            }
        }
        self.log.push(update);
    }

    fn relay_presence(&mut self, from: ConnectionId, event: PresenceEvent) {
        for (id, slot) in self.peers.iter_mut() {
            if *id != from {
                slot.deliver(ProviderEvent::Presence(event.clone()));
            }
        }
    }
}

/// In-memory stand-in for a hosted room.
#[derive(Clone, Default)]
pub struct LoopbackRoom {
    state: Rc<RefCell<RoomState>>,
}

impl LoopbackRoom {
    pub fn new(name: &str) -> Self {
        Self {
            state: Rc::new(RefCell::new(RoomState {
                name: SmolStr::new(name),
                ..RoomState::default()
            })),
        }
    }

    pub fn name(&self) -> SmolStr {
        self.state.borrow().name.clone()
    }

    /// Join the room.
    ///
    /// The new connection sees `connecting`, `connected`, the room's full
    /// update history and then `sync(true)`.
    pub fn connect(&self) -> Result<LoopbackProvider, CanvasError> {
        let mut state = self.state.borrow_mut();
        if state.refuse_connections {
            return Err(CanvasError::Transport(format!(
                "room `{}` refused the connection",
                state.name
            )));
        }

        let id = state.next_id;
        state.next_id += 1;

        let mut slot = PeerSlot {
            online: true,
            ..PeerSlot::default()
        };
        slot.queue.push_back(ProviderEvent::Status("connecting".into()));
        slot.queue.push_back(ProviderEvent::Status("connected".into()));
        for update in &state.log {
            slot.queue.push_back(ProviderEvent::Update(update.clone()));
        }
        for other in state.peers.values() {
            if let Some(joined) = &other.joined {
                slot.queue.push_back(ProviderEvent::Presence(joined.clone()));
            }
        }
        slot.queue.push_back(ProviderEvent::Sync(true));
        state.peers.insert(id, slot);

        tracing::debug!(room = %state.name, connection = id, "peer connected");
        Ok(LoopbackProvider {
            room: self.clone(),
            id,
            destroyed: false,
        })
    }

    /// Make every following `connect` fail until called with `false`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.borrow_mut().refuse_connections = refuse;
    }

    /// Simulate a network blip: the peer goes back to `connecting` and stops
    /// exchanging updates until [`LoopbackRoom::resume`].
    pub fn interrupt(&self, id: ConnectionId) {
        if let Some(slot) = self.state.borrow_mut().peers.get_mut(&id) {
            slot.queue.push_back(ProviderEvent::Status("connecting".into()));
            slot.online = false;
        }
    }

    /// Simulate a hard drop. The peer sees `disconnected` and `sync(false)`.
    pub fn drop_peer(&self, id: ConnectionId) {
        if let Some(slot) = self.state.borrow_mut().peers.get_mut(&id) {
            slot.queue.push_back(ProviderEvent::Status("disconnected".into()));
            slot.queue.push_back(ProviderEvent::Sync(false));
            slot.online = false;
        }
    }

    /// Bring an interrupted or dropped peer back and exchange what was missed
    /// in both directions.
    pub fn resume(&self, id: ConnectionId) {
        let mut state = self.state.borrow_mut();
        let outbox = match state.peers.get_mut(&id) {
            Some(slot) if !slot.online => {
                slot.online = true;
                slot.queue.push_back(ProviderEvent::Status("connected".into()));
                let held = std::mem::take(&mut slot.held);
                slot.queue.extend(held);
                slot.queue.push_back(ProviderEvent::Sync(true));
                std::mem::take(&mut slot.outbox)
            }
            _ => return,
        };
        for update in outbox {
            state.relay(id, update);
        }
    }

    pub fn is_online(&self, id: ConnectionId) -> bool {
        self.state
            .borrow()
            .peers
            .get(&id)
            .is_some_and(|slot| slot.online)
    }

    pub fn peer_count(&self) -> usize {
        self.state.borrow().peers.len()
    }

    /// Number of updates relayed so far.
    pub fn log_len(&self) -> usize {
        self.state.borrow().log.len()
    }
}

impl std::fmt::Debug for LoopbackRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LoopbackRoom")
            .field("name", &state.name)
            .field("peers", &state.peers.len())
            .field("log", &state.log.len())
            .finish()
    }
}

/// One connection to a [`LoopbackRoom`].
#[derive(Debug)]
pub struct LoopbackProvider {
    room: LoopbackRoom,
    id: ConnectionId,
    destroyed: bool,
}

impl LoopbackProvider {
    pub fn room(&self) -> &LoopbackRoom {
        &self.room
    }
}

impl SyncProvider for LoopbackProvider {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn broadcast(&mut self, update: &[u8]) -> Result<(), CanvasError> {
        let mut state = self.room.state.borrow_mut();
        let online = match state.peers.get_mut(&self.id) {
            Some(slot) if slot.online => true,
            Some(slot) => {
                slot.outbox.push(update.to_vec());
                false
            }
            None => {
                return Err(CanvasError::Transport(
                    "connection is no longer part of the room".into(),
                ));
            }
        };
        if online {
            state.relay(self.id, update.to_vec());
        }
        Ok(())
    }

    fn broadcast_presence(&mut self, event: PresenceEvent) -> Result<(), CanvasError> {
        let mut state = self.room.state.borrow_mut();
        let Some(slot) = state.peers.get_mut(&self.id) else {
            return Err(CanvasError::Transport(
                "connection is no longer part of the room".into(),
            ));
        };
        if matches!(event, PresenceEvent::Joined { .. }) {
            slot.joined = Some(event.clone());
        }
        state.relay_presence(self.id, event);
        Ok(())
    }

    fn poll(&mut self) -> Vec<ProviderEvent> {
        self.room
            .state
            .borrow_mut()
            .peers
            .get_mut(&self.id)
            .map(|slot| slot.queue.drain(..).collect())
            .unwrap_or_default()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let mut state = self.room.state.borrow_mut();
        state.peers.remove(&self.id);
        state.relay_presence(
            self.id,
            PresenceEvent::Left {
                connection_id: self.id,
            },
        );
        tracing::debug!(room = %state.name, connection = self.id, "peer left");
    }
}

impl Drop for LoopbackProvider {
    fn drop(&mut self) {
        self.destroy();
    }
}
