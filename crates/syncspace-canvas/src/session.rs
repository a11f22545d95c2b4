//! Session lifecycle: one replica, one provider connection, one room.
//!
//! A [`CanvasSession`] is owned explicitly by whoever drives the UI. It
//! creates the store, undo manager and presence tracker on `init`, connects
//! the provider exactly once, and forwards traffic in both directions on
//! `pump`.

use std::cell::{Cell, RefCell};

use smol_str::SmolStr;
use tokio::sync::mpsc;

use crate::canvas::Canvas;
use crate::connection::{ConnectionChange, ConnectionMonitor, ConnectionStatus};
use crate::error::CanvasError;
use crate::observer::Subscription;
use crate::presence::{ConnectionId, LocalIdentity, Peer, PresenceEvent, PresenceTracker};
use crate::store::CanvasStore;
use crate::transport::{ProviderEvent, SyncProvider};
use crate::types::CanvasPoint;
use crate::undo::{UndoConfig, UndoManager};

/// Result of [`CanvasSession::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// Store created and provider connected.
    Started,
    /// A session is already running; nothing was done.
    AlreadyActive,
    /// `init` was called again while the first call was still connecting.
    AlreadyInitializing,
    /// Store created but the provider could not connect. The canvas works
    /// locally and the status is `Disconnected`.
    Offline,
}

impl InitOutcome {
    /// Whether this call created a new replica.
    pub fn created(self) -> bool {
        matches!(self, Self::Started | Self::Offline)
    }
}

struct Active<P> {
    room: SmolStr,
    store: CanvasStore,
    canvas: Canvas,
    undo: UndoManager,
    /// `None` while working offline.
    link: Option<Link<P>>,
    presence: PresenceTracker,
}

/// A live provider connection and the local updates waiting to go out on it.
///
/// Local updates are only captured while a link exists; offline edits reach
/// peers through the snapshot sent by [`CanvasSession::reconnect`].
struct Link<P> {
    provider: P,
    outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    _local_updates: loro::Subscription,
}

/// A collaborative canvas session.
pub struct CanvasSession<P: SyncProvider> {
    identity: LocalIdentity,
    undo_config: UndoConfig,
    monitor: ConnectionMonitor,
    initializing: Cell<bool>,
    active: RefCell<Option<Active<P>>>,
}

impl<P: SyncProvider> CanvasSession<P> {
    pub fn new(identity: LocalIdentity) -> Self {
        Self::with_undo_config(identity, UndoConfig::default())
    }

    pub fn with_undo_config(identity: LocalIdentity, undo_config: UndoConfig) -> Self {
        Self {
            identity,
            undo_config,
            monitor: ConnectionMonitor::new(),
            initializing: Cell::new(false),
            active: RefCell::new(None),
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Create the replica for `room` and connect through `connect`.
    ///
    /// Runs at most once per session until [`CanvasSession::teardown`].
    pub fn init(
        &self,
        room: &str,
        connect: impl FnOnce(&str) -> Result<P, CanvasError>,
    ) -> InitOutcome {
        if self.initializing.get() {
            return InitOutcome::AlreadyInitializing;
        }
        if self.active.borrow().is_some() {
            return InitOutcome::AlreadyActive;
        }
        self.initializing.set(true);
        self.monitor.reset();

        let store = CanvasStore::new();
        let undo = UndoManager::with_config(&store, self.undo_config);
        let link = self.open_link(&store, room, connect);
        let outcome = if link.is_some() {
            InitOutcome::Started
        } else {
            InitOutcome::Offline
        };

        *self.active.borrow_mut() = Some(Active {
            room: SmolStr::new(room),
            canvas: Canvas::new(store.clone()),
            store,
            undo,
            link,
            presence: PresenceTracker::new(),
        });
        self.initializing.set(false);

        tracing::info!(room, ?outcome, name = %self.identity.name, "canvas session initialized");
        outcome
    }

    /// Connect an offline session, keeping its replica.
    ///
    /// The full local state is sent once the provider is attached, so edits
    /// made while offline reach the room. Returns `false` if there is no
    /// session, it is already connected, or `connect` fails again.
    pub fn reconnect(&self, connect: impl FnOnce(&str) -> Result<P, CanvasError>) -> bool {
        let (room, store) = match self.active.borrow().as_ref() {
            Some(active) if active.link.is_none() => (active.room.clone(), active.store.clone()),
            _ => return false,
        };

        let Some(mut link) = self.open_link(&store, &room, connect) else {
            return false;
        };
        match store.export_snapshot() {
            Ok(snapshot) => {
                if let Err(e) = link.provider.broadcast(&snapshot) {
                    tracing::warn!(%room, "failed to send offline edits: {e}");
                }
            }
            Err(e) => tracing::warn!(%room, "could not export offline edits: {e}"),
        }

        let mut guard = self.active.borrow_mut();
        let Some(active) = guard.as_mut() else {
            link.provider.destroy();
            return false;
        };
        active.link = Some(link);
        tracing::info!(%room, "canvas session reconnected");
        true
    }

    fn open_link(
        &self,
        store: &CanvasStore,
        room: &str,
        connect: impl FnOnce(&str) -> Result<P, CanvasError>,
    ) -> Option<Link<P>> {
        let (local_updates, outgoing) = store.subscribe_local_updates();
        let mut provider = match connect(room) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(room, "could not connect, working offline: {e}");
                self.monitor.mark_disconnected();
                return None;
            }
        };

        let joined = PresenceEvent::Joined {
            connection_id: provider.connection_id(),
            identity: self.identity.clone(),
        };
        if let Err(e) = provider.broadcast_presence(joined) {
            tracing::warn!(room, "failed to announce presence: {e}");
        }
        Some(Link {
            provider,
            outgoing,
            _local_updates: local_updates,
        })
    }

    /// Leave the room and drop all session state. Safe to call repeatedly.
    pub fn teardown(&self) {
        let active = self.active.borrow_mut().take();
        self.initializing.set(false);
        if let Some(mut active) = active {
            if let Some(link) = active.link.as_mut() {
                link.provider.destroy();
            }
            tracing::info!(room = %active.room, "canvas session torn down");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.borrow().is_some()
    }

    /// Forward committed local updates to the provider and apply whatever the
    /// provider delivered.
    ///
    /// Returns how many updates were sent plus how many provider events were
    /// handled; zero means there was nothing to do.
    pub fn pump(&self) -> usize {
        let (store, sent, events) = {
            let mut guard = self.active.borrow_mut();
            let Some(active) = guard.as_mut() else {
                return 0;
            };
            let Some(link) = active.link.as_mut() else {
                return 0;
            };

            let mut sent = 0;
            while let Ok(update) = link.outgoing.try_recv() {
                sent += 1;
                if let Err(e) = link.provider.broadcast(&update) {
                    tracing::warn!(room = %active.room, "failed to broadcast update: {e}");
                }
            }
            (active.store.clone(), sent, link.provider.poll())
        };

        let handled = sent + events.len();
        for event in events {
            match event {
                ProviderEvent::Sync(synced) => self.monitor.on_sync(synced),
                ProviderEvent::Status(status) => self.monitor.on_status(&status),
                ProviderEvent::Update(update) => {
                    if let Err(e) = store.apply_update(&update) {
                        tracing::warn!("dropping remote update: {e}");
                    }
                }
                ProviderEvent::Presence(event) => {
                    if let Some(active) = self.active.borrow_mut().as_mut() {
                        active.presence.apply(&event);
                    }
                }
            }
        }
        handled
    }

    /// Mutation API for the current replica. Inert before `init`.
    pub fn canvas(&self) -> Canvas {
        self.active
            .borrow()
            .as_ref()
            .map(|a| a.canvas.clone())
            .unwrap_or_default()
    }

    pub fn store(&self) -> Option<CanvasStore> {
        self.active.borrow().as_ref().map(|a| a.store.clone())
    }

    pub fn undo_manager(&self) -> Option<UndoManager> {
        self.active.borrow().as_ref().map(|a| a.undo.clone())
    }

    pub fn room(&self) -> Option<SmolStr> {
        self.active.borrow().as_ref().map(|a| a.room.clone())
    }

    /// Our id in the room, if connected.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.active
            .borrow()
            .as_ref()
            .and_then(|a| a.link.as_ref())
            .map(|link| link.provider.connection_id())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.monitor.status()
    }

    pub fn is_synced(&self) -> bool {
        self.monitor.is_synced()
    }

    pub fn is_loading(&self) -> bool {
        self.monitor.is_loading()
    }

    pub fn subscribe_connection(&self, f: impl Fn(&ConnectionChange) + 'static) -> Subscription {
        self.monitor.subscribe(f)
    }

    /// Publish this replica's cursor. `None` hides it.
    pub fn set_cursor(&self, cursor: Option<CanvasPoint>) {
        let mut guard = self.active.borrow_mut();
        let Some(provider) = guard
            .as_mut()
            .and_then(|a| a.link.as_mut())
            .map(|link| &mut link.provider)
        else {
            return;
        };
        let event = PresenceEvent::Cursor {
            connection_id: provider.connection_id(),
            cursor,
        };
        if let Err(e) = provider.broadcast_presence(event) {
            tracing::debug!("cursor update not sent: {e}");
        }
    }

    /// Other participants currently in the room.
    pub fn peers(&self) -> Vec<Peer> {
        self.active
            .borrow()
            .as_ref()
            .map(|a| a.presence.peers().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop cursors that have not moved for `max_age`.
    pub fn prune_stale_cursors(&self, max_age: std::time::Duration) {
        if let Some(active) = self.active.borrow_mut().as_mut() {
            active.presence.prune_stale_cursors(max_age);
        }
    }
}

impl<P: SyncProvider> Drop for CanvasSession<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}
