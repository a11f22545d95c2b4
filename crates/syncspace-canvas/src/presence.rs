//! Presence tracking for a canvas room.
//!
//! Tracks who else is in the room, their display identity and their
//! ephemeral cursor. Presence is never written to the document.

use std::collections::HashMap;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use web_time::Instant;

use crate::types::{CanvasPoint, PopColor};

/// Stable id the presence provider assigns to each connection.
pub type ConnectionId = u64;

const NAME_PREFIXES: [&str; 8] = [
    "Neon", "Cyber", "Pixel", "Nano", "Hyper", "Mega", "Ultra", "Turbo",
];

const NAME_ANIMALS: [&str; 10] = [
    "Cat", "Dog", "Fox", "Owl", "Bear", "Wolf", "Tiger", "Panda", "Koala", "Bunny",
];

/// Display name and color this replica shows to others.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub name: SmolStr,
    pub color: PopColor,
}

impl LocalIdentity {
    /// A random "Neon Fox" style name with a random palette color.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self::random_with(&mut rng)
    }

    pub fn random_with(rng: &mut impl Rng) -> Self {
        let prefix = NAME_PREFIXES.choose(rng).copied().unwrap_or("Nano");
        let animal = NAME_ANIMALS.choose(rng).copied().unwrap_or("Cat");
        let color = PopColor::ALL[rng.random_range(0..PopColor::ALL.len())];
        Self {
            name: format_smolstr!("{prefix} {animal}"),
            color,
        }
    }
}

/// A remote participant's cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerCursor {
    pub position: CanvasPoint,
    /// When this cursor was last updated.
    pub updated_at: Instant,
}

/// A participant in the room.
#[derive(Debug, Clone)]
pub struct Peer {
    pub connection_id: ConnectionId,
    pub name: SmolStr,
    pub color: PopColor,
    pub cursor: Option<PeerCursor>,
}

/// Presence messages exchanged through the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PresenceEvent {
    Joined {
        connection_id: ConnectionId,
        identity: LocalIdentity,
    },
    Cursor {
        connection_id: ConnectionId,
        cursor: Option<CanvasPoint>,
    },
    Left {
        connection_id: ConnectionId,
    },
}

/// Tracks all other participants in a room.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    peers: HashMap<ConnectionId, Peer>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one presence message into the tracker.
    pub fn apply(&mut self, event: &PresenceEvent) {
        match event {
            PresenceEvent::Joined {
                connection_id,
                identity,
            } => self.add_peer(*connection_id, identity.clone()),
            PresenceEvent::Cursor {
                connection_id,
                cursor,
            } => self.update_cursor(*connection_id, *cursor),
            PresenceEvent::Left { connection_id } => {
                self.remove_peer(*connection_id);
            }
        }
    }

    pub fn add_peer(&mut self, connection_id: ConnectionId, identity: LocalIdentity) {
        let cursor = self.peers.remove(&connection_id).and_then(|p| p.cursor);
        self.peers.insert(
            connection_id,
            Peer {
                connection_id,
                name: identity.name,
                color: identity.color,
                cursor,
            },
        );
    }

    pub fn remove_peer(&mut self, connection_id: ConnectionId) -> Option<Peer> {
        self.peers.remove(&connection_id)
    }

    /// Update a peer's cursor. `None` hides it. Unknown peers are ignored.
    pub fn update_cursor(&mut self, connection_id: ConnectionId, position: Option<CanvasPoint>) {
        if let Some(peer) = self.peers.get_mut(&connection_id) {
            peer.cursor = position.map(|position| PeerCursor {
                position,
                updated_at: Instant::now(),
            });
        }
    }

    /// All peers, ordered by connection id.
    pub fn peers(&self) -> Vec<&Peer> {
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|p| p.connection_id);
        peers
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Peer> {
        self.peers.get(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remove stale cursors that haven't been updated recently.
    pub fn prune_stale_cursors(&mut self, max_age: std::time::Duration) {
        let now = Instant::now();
        for peer in self.peers.values_mut() {
            let stale = peer
                .cursor
                .as_ref()
                .is_some_and(|c| now.duration_since(c.updated_at) > max_age);
            if stale {
                peer.cursor = None;
            }
        }
    }
}
