//! Connection state machine.
//!
//! Derives a process-local [`ConnectionStatus`] from transport lifecycle
//! events. Nothing here is replicated and nothing here gates mutation: the
//! canvas keeps working against the local replica in every state.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use smol_str::SmolStr;

use crate::observer::{Registry, Subscription};

/// How long the "synced" notice stays up.
pub const SYNCED_NOTICE_DURATION: Duration = Duration::from_millis(2000);

/// Connection state machine states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Initial state, first connection attempt in flight.
    #[default]
    Connecting,
    Connected,
    /// Lost the connection after having had one.
    Reconnecting,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Next state after a transport `status` event.
    ///
    /// `"connecting"` only counts as a reconnect when we were connected right
    /// before. Unknown strings leave the state alone.
    pub fn after_status(self, status: &str) -> Self {
        match status {
            "connected" => Self::Connected,
            "connecting" if self == Self::Connected => Self::Reconnecting,
            "connecting" => Self::Connecting,
            "disconnected" => Self::Disconnected,
            _ => self,
        }
    }

    /// Next state after a transport `sync` event.
    pub fn after_sync(self, synced: bool) -> Self {
        if synced { Self::Connected } else { self }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient, non-blocking user notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: SmolStr,
    /// `None` keeps the notice up until replaced.
    pub duration: Option<Duration>,
}

impl Notice {
    pub fn connection_lost() -> Self {
        Self {
            level: NoticeLevel::Error,
            message: SmolStr::new_static("Connection lost. Reconnecting..."),
            duration: None,
        }
    }

    pub fn reconnecting() -> Self {
        Self {
            level: NoticeLevel::Info,
            message: SmolStr::new_static("Reconnecting..."),
            duration: None,
        }
    }

    pub fn synced() -> Self {
        Self {
            level: NoticeLevel::Success,
            message: SmolStr::new_static("Synced and ready!"),
            duration: Some(SYNCED_NOTICE_DURATION),
        }
    }

    pub fn is_sticky(&self) -> bool {
        self.duration.is_none()
    }
}

/// Emitted when the status or the synced flag changes.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionChange {
    pub previous: ConnectionStatus,
    pub current: ConnectionStatus,
    pub synced: bool,
    pub notice: Option<Notice>,
}

/// Tracks connection status and the synced flag for one session.
pub struct ConnectionMonitor {
    status: Cell<ConnectionStatus>,
    synced: Cell<bool>,
    listeners: Rc<Registry<ConnectionChange>>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self {
            status: Cell::new(ConnectionStatus::default()),
            synced: Cell::new(false),
            listeners: Registry::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.get()
    }

    pub fn is_loading(&self) -> bool {
        !self.synced.get()
    }

    /// Apply a transport `status` event.
    pub fn on_status(&self, status: &str) {
        let next = self.status.get().after_status(status);
        self.transition(next, self.synced.get());
    }

    /// Apply a transport `sync` event.
    pub fn on_sync(&self, synced: bool) {
        let next = self.status.get().after_sync(synced);
        self.transition(next, synced);
    }

    /// Force the disconnected state, e.g. after a failed connect.
    pub fn mark_disconnected(&self) {
        self.transition(ConnectionStatus::Disconnected, self.synced.get());
    }

    /// Back to the initial state, without notifying.
    pub fn reset(&self) {
        self.status.set(ConnectionStatus::default());
        self.synced.set(false);
    }

    pub fn subscribe(&self, f: impl Fn(&ConnectionChange) + 'static) -> Subscription {
        self.listeners.subscribe(f)
    }

    fn transition(&self, next: ConnectionStatus, synced: bool) {
        let previous = self.status.replace(next);
        let was_synced = self.synced.replace(synced);
        if previous == next && was_synced == synced {
            return;
        }

        if previous != next {
            tracing::info!(from = %previous, to = %next, "connection status changed");
        }

        let became_ready = next.is_connected() && synced && !(previous.is_connected() && was_synced);
        let notice = if previous != next && next == ConnectionStatus::Disconnected {
            Some(Notice::connection_lost())
        } else if previous != next && next == ConnectionStatus::Reconnecting {
            Some(Notice::reconnecting())
        } else if became_ready {
            Some(Notice::synced())
        } else {
            None
        };

        self.listeners.emit(&ConnectionChange {
            previous,
            current: next,
            synced,
            notice,
        });
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("status", &self.status())
            .field("synced", &self.is_synced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    use ConnectionStatus::*;

    #[test]
    fn test_status_default() {
        assert_eq!(ConnectionStatus::default(), Connecting);
        let monitor = ConnectionMonitor::new();
        assert!(monitor.is_loading());
    }

    #[test]
    fn test_status_transitions() {
        assert_eq!(Connecting.after_status("connected"), Connected);
        assert_eq!(Connected.after_status("connecting"), Reconnecting);
        assert_eq!(Disconnected.after_status("connecting"), Connecting);
        assert_eq!(Reconnecting.after_status("connecting"), Connecting);
        assert_eq!(Connected.after_status("disconnected"), Disconnected);
        assert_eq!(Reconnecting.after_status("bogus"), Reconnecting);
        assert_eq!(Disconnected.after_sync(true), Connected);
        assert_eq!(Disconnected.after_sync(false), Disconnected);
    }

    #[test]
    fn test_blip_sequence() {
        let monitor = ConnectionMonitor::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = monitor.subscribe(move |change| s.borrow_mut().push(change.clone()));

        monitor.on_sync(true);
        assert_eq!(monitor.status(), Connected);
        monitor.on_status("connecting");
        assert_eq!(monitor.status(), Reconnecting);
        monitor.on_status("connected");
        assert_eq!(monitor.status(), Connected);
        assert!(monitor.is_synced());

        let notices: Vec<_> = seen
            .borrow()
            .iter()
            .map(|c| c.notice.as_ref().map(|n| n.message.to_string()))
            .collect();
        assert_eq!(
            notices,
            vec![
                Some("Synced and ready!".to_string()),
                Some("Reconnecting...".to_string()),
                Some("Synced and ready!".to_string()),
            ]
        );
    }

    #[test]
    fn test_disconnect_notice_is_sticky() {
        let monitor = ConnectionMonitor::new();
        let last = Rc::new(RefCell::new(None));
        let l = last.clone();
        let _sub = monitor.subscribe(move |change| *l.borrow_mut() = change.notice.clone());

        monitor.on_status("connected");
        monitor.on_status("disconnected");
        let notice = last.borrow().clone().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.is_sticky());
    }

    #[test]
    fn test_unchanged_state_is_silent() {
        let monitor = ConnectionMonitor::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = monitor.subscribe(move |_| c.set(c.get() + 1));

        monitor.on_status("connecting");
        monitor.on_status("whatever");
        monitor.on_sync(false);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_sync_false_only_clears_flag() {
        let monitor = ConnectionMonitor::new();
        monitor.on_sync(true);
        monitor.on_sync(false);
        assert_eq!(monitor.status(), Connected);
        assert!(monitor.is_loading());
    }
}
