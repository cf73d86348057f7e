//! Typed pub-sub for cross-component notifications (listener
//! transitions, recorder lifecycle, config changes), fanned out to
//! whatever out-of-crate surface wants to relay them (HTTP/SSE,
//! `on_record_finished` hook, logs) without this crate depending on any
//! of them.

use tokio::sync::broadcast;

use crate::ids::RoomId;
use crate::listener::LiveStatus;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    RoomAdded { room_id: RoomId },
    RoomRemoved { room_id: RoomId },
    LiveStatusChanged {
        room_id: RoomId,
        from: LiveStatus,
        to: LiveStatus,
    },
    RecordingStarted { room_id: RoomId, output_path: String },
    RecordingFinished {
        room_id: RoomId,
        output_path: String,
        exit_code: Option<i32>,
    },
    RecordingFailed { room_id: RoomId, reason: String },
    ConfigReloaded { version: i64 },
    RoomRenamed {
        room_id: RoomId,
        old_name: String,
        new_name: String,
    },
    RoomInitializationFinished { room_id: RoomId },
}

/// Wraps a `broadcast` channel. Lagging subscribers silently miss
/// events rather than block publishers; a subscriber that needs an
/// authoritative view should pair this with a direct query (e.g.
/// `Registry::snapshot`) rather than relying on the event stream alone.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishes `event`; returns the number of subscribers it reached.
    /// Zero subscribers is not an error, just means nobody's listening.
    pub fn publish(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
