//! Per-room listener state machine: turns successive [`RoomInfo`]
//! snapshots from an adapter into a classified transition, so the
//! reconciler can decide whether to start or stop recording without
//! re-deriving liveness logic itself.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::RoomInfo;
use crate::ids::RoomId;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum LiveStatus {
    #[default]
    Offline,
    Initializing,
    Live,
}

impl LiveStatus {
    fn classify(info: &RoomInfo) -> LiveStatus {
        if info.is_live {
            LiveStatus::Live
        } else if info.is_initializing {
            LiveStatus::Initializing
        } else {
            LiveStatus::Offline
        }
    }
}

/// The outcome of feeding one new `RoomInfo` into a [`Listener`]: either
/// nothing changed that the reconciler cares about, or a transition it
/// must act on.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Unchanged,
    WentLive { info: RoomInfo },
    WentOffline { last_info: RoomInfo },
    StillLiveStreamsChanged { info: RoomInfo },
    /// The room stayed live but its display name changed, e.g. a
    /// streamer renamed their channel mid-broadcast. Only reported when
    /// the room's config opts into `on_room_name_changed`.
    RoomRenamed { old_name: String, new_name: String },
    /// The adapter reported a room the listener considers gone
    /// (`AdapterPermanent`); the reconciler should stop recording and
    /// the caller should consider removing the room.
    PermanentlyInvalid { reason: String },
}

/// Holds the last observed `RoomInfo` and status for one room, and
/// classifies each new observation against it. A fresh `Listener` has
/// no prior observation, so its first call always yields a transition
/// (even `WentOffline`-equivalent "still offline" is folded into
/// `Unchanged` only once a baseline exists).
pub struct Listener {
    room_id: RoomId,
    state: Mutex<ListenerState>,
}

struct ListenerState {
    last_status: Option<LiveStatus>,
    last_info: Option<RoomInfo>,
}

impl Listener {
    pub fn new(room_id: RoomId) -> Self {
        Listener {
            room_id,
            state: Mutex::new(ListenerState {
                last_status: None,
                last_info: None,
            }),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn last_status(&self) -> Option<LiveStatus> {
        self.state.lock().last_status
    }

    pub fn last_info(&self) -> Option<RoomInfo> {
        self.state.lock().last_info.clone()
    }

    /// Classifies `info` against the previously observed state and
    /// updates it. `is_live` + a change in `available_streams_at`
    /// while already live is reported as `StillLiveStreamsChanged`
    /// (e.g. the adapter rotated to a new CDN URL) rather than
    /// `Unchanged`, so the reconciler can decide whether to restart the
    /// recorder against the new variant. A `room_name` change while
    /// already live is reported as `RoomRenamed`, but only when
    /// `notify_renames` is set — rooms that don't opt into
    /// `on_room_name_changed` treat a display-name edit as noise.
    /// `now` stamps `info.last_start_time` on a `WentLive` transition.
    pub fn observe(&self, mut info: RoomInfo, notify_renames: bool, now: i64) -> Transition {
        let status = LiveStatus::classify(&info);
        let went_live = {
            let state = self.state.lock();
            matches!(state.last_status, None | Some(LiveStatus::Offline) | Some(LiveStatus::Initializing))
                && matches!(status, LiveStatus::Live)
        };
        if went_live {
            info.last_start_time = now;
        }

        let mut state = self.state.lock();
        let previous_status = state.last_status;
        let previous_info = state.last_info.clone();
        state.last_status = Some(status);
        state.last_info = Some(info.clone());
        drop(state);

        match (previous_status, status) {
            (None, LiveStatus::Live) | (Some(LiveStatus::Offline), LiveStatus::Live)
            | (Some(LiveStatus::Initializing), LiveStatus::Live) => Transition::WentLive { info },
            (Some(LiveStatus::Live), LiveStatus::Live) => {
                let streams_changed = previous_info
                    .as_ref()
                    .map(|p| p.available_streams_at != info.available_streams_at)
                    .unwrap_or(true);
                let name_changed = notify_renames
                    && previous_info
                        .as_ref()
                        .map(|p| p.room_name != info.room_name)
                        .unwrap_or(false);
                if name_changed {
                    Transition::RoomRenamed {
                        old_name: previous_info.map(|p| p.room_name).unwrap_or_default(),
                        new_name: info.room_name,
                    }
                } else if streams_changed {
                    Transition::StillLiveStreamsChanged { info }
                } else {
                    Transition::Unchanged
                }
            }
            (Some(LiveStatus::Live), LiveStatus::Offline | LiveStatus::Initializing) => {
                Transition::WentOffline {
                    last_info: previous_info.unwrap_or(info),
                }
            }
            _ => Transition::Unchanged,
        }
    }

    pub fn record_permanent_failure(&self, reason: String) -> Transition {
        Transition::PermanentlyInvalid { reason }
    }
}

/// Owns one [`Listener`] per registered room.
pub type ListenerManager = crate::registry::Registry<Listener>;

pub fn new_manager() -> Arc<ListenerManager> {
    Arc::new(ListenerManager::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(is_live: bool, is_initializing: bool, streams_at: i64) -> RoomInfo {
        RoomInfo {
            is_live,
            is_initializing,
            available_streams_at: streams_at,
            ..Default::default()
        }
    }

    #[test]
    fn first_observation_of_live_room_is_went_live() {
        let listener = Listener::new(RoomId::native("room1"));
        let transition = listener.observe(info(true, false, 1), false, 0);
        assert_eq!(transition, Transition::WentLive { info: info(true, false, 1) });
    }

    #[test]
    fn first_observation_of_offline_room_is_unchanged() {
        let listener = Listener::new(RoomId::native("room1"));
        let transition = listener.observe(info(false, false, 0), false, 0);
        assert_eq!(transition, Transition::Unchanged);
    }

    #[test]
    fn offline_to_live_transition_is_went_live() {
        let listener = Listener::new(RoomId::native("room1"));
        listener.observe(info(false, false, 0), false, 0);
        let transition = listener.observe(info(true, false, 1), false, 0);
        assert_eq!(transition, Transition::WentLive { info: info(true, false, 1) });
    }

    #[test]
    fn went_live_transition_stamps_last_start_time() {
        let listener = Listener::new(RoomId::native("room1"));
        let transition = listener.observe(info(true, false, 1), false, 1_700_000_000);
        match transition {
            Transition::WentLive { info } => assert_eq!(info.last_start_time, 1_700_000_000),
            other => panic!("expected WentLive, got {other:?}"),
        }
    }

    #[test]
    fn live_to_offline_transition_carries_last_info() {
        let listener = Listener::new(RoomId::native("room1"));
        listener.observe(info(true, false, 1), false, 0);
        let transition = listener.observe(info(false, false, 1), false, 0);
        assert_eq!(
            transition,
            Transition::WentOffline {
                last_info: info(true, false, 1)
            }
        );
    }

    #[test]
    fn repeated_live_with_same_streams_is_unchanged() {
        let listener = Listener::new(RoomId::native("room1"));
        listener.observe(info(true, false, 1), false, 0);
        let transition = listener.observe(info(true, false, 1), false, 0);
        assert_eq!(transition, Transition::Unchanged);
    }

    #[test]
    fn repeated_live_with_rotated_streams_is_reported() {
        let listener = Listener::new(RoomId::native("room1"));
        listener.observe(info(true, false, 1), false, 0);
        let transition = listener.observe(info(true, false, 2), false, 0);
        assert_eq!(transition, Transition::StillLiveStreamsChanged { info: info(true, false, 2) });
    }

    #[test]
    fn repeated_calls_are_idempotent_given_identical_input() {
        let listener = Listener::new(RoomId::native("room1"));
        listener.observe(info(true, false, 1), false, 0);
        let a = listener.observe(info(true, false, 1), false, 0);
        let b = listener.observe(info(true, false, 1), false, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn room_rename_while_live_is_unchanged_when_not_opted_in() {
        let listener = Listener::new(RoomId::native("room1"));
        listener.observe(named_info("before"), false, 0);
        let transition = listener.observe(named_info("after"), false, 0);
        assert_eq!(transition, Transition::Unchanged);
    }

    #[test]
    fn room_rename_while_live_is_reported_when_opted_in() {
        let listener = Listener::new(RoomId::native("room1"));
        listener.observe(named_info("before"), true, 0);
        let transition = listener.observe(named_info("after"), true, 0);
        assert_eq!(
            transition,
            Transition::RoomRenamed {
                old_name: "before".to_string(),
                new_name: "after".to_string(),
            }
        );
    }

    fn named_info(room_name: &str) -> RoomInfo {
        RoomInfo {
            is_live: true,
            room_name: room_name.to_string(),
            available_streams_at: 1,
            ..Default::default()
        }
    }
}
