//! The per-room polling loop: on a live-tunable interval, waits its
//! turn at the platform rate limiter, polls the adapter once, and
//! publishes whatever transition resulted. Modeled on the
//! retry-and-continue shape of a long-lived streaming connection loop:
//! one room's failure sleeps and retries without taking any other room
//! down with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use base::clock::jitter;
use base::shutdown;

use crate::config::Config;
use crate::event_bus::{Event, EventBus};
use crate::listener::Transition;
use crate::rate_limiter::RateLimiter;

use super::{Room, RoomRegistry};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SchedulerStatus {
    #[default]
    Stopped,
    Waiting {
        next_poll_unix: i64,
    },
    Polling,
}

/// Spawns the background loop for `room` and stores its `JoinHandle` on
/// the room so [`Room::close`](super::Room::close) can await it.
/// `room_url` is the config's identity key for this room; once it no
/// longer appears (or is no longer `listening`) in a published config
/// snapshot, the loop exits on its own — the caller does not need to
/// separately cancel it when a room is deleted from config.
pub fn spawn(
    room: Arc<Room>,
    room_url: String,
    platform_key: String,
    mut config_rx: watch::Receiver<Arc<Config>>,
    rate_limiter: Arc<RateLimiter>,
    event_bus: Arc<EventBus>,
    rooms: Arc<RoomRegistry>,
) {
    let shutdown = room.shutdown_receiver().clone();
    let handle = tokio::spawn(async move {
        let mut next_poll_at: Option<Instant> = None;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let config = config_rx.borrow_and_update().clone();
            let room_config = match config.rooms.iter().find(|r| r.url == room_url) {
                Some(rc) if rc.listening => rc.clone(),
                _ => break,
            };
            let resolved = crate::config::resolve(
                &config.defaults,
                &config.platform_overrides,
                &room_config,
                &platform_key,
            );
            let interval = Duration::from_secs(resolved.interval_sec.max(0) as u64);
            let notify_renames = resolved
                .split_strategies
                .iter()
                .any(|s| s == "on_room_name_changed");

            room.set_status(SchedulerStatus::Waiting {
                next_poll_unix: base::clock::RealClocks.now_unix(),
            });
            rate_limiter.wait(&platform_key, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }

            room.set_status(SchedulerStatus::Polling);
            if let Some(transition) = room.poll_once(notify_renames).await {
                if let Some(native_id) = room.maybe_native_id() {
                    let old_id = room.room_id();
                    rooms.rename(&old_id, native_id.clone());
                    room.rekey(native_id.clone());
                    event_bus.publish(Event::RoomInitializationFinished { room_id: native_id });
                }
                publish(&event_bus, room.room_id(), transition);
            }

            // The wait until the *next* desired poll, measured from the
            // last time we scheduled one. On the first iteration (or
            // after catching up from a backlog) this is zero, which is
            // exactly when jitter matters: a zero wait means many rooms
            // sharing this interval would otherwise all wake on the same
            // tick forever after.
            let remaining = next_poll_at
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::ZERO);
            let sleep_for = if remaining.is_zero() {
                jitter(interval, interval / 10)
            } else {
                remaining
            };
            next_poll_at = Some(Instant::now() + interval);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        room.set_status(SchedulerStatus::Stopped);
    });
    room.store_scheduler_task(handle);
}

fn publish(event_bus: &EventBus, room_id: crate::ids::RoomId, transition: Transition) {
    use crate::listener::LiveStatus;
    match transition {
        Transition::WentLive { .. } => {
            event_bus.publish(Event::LiveStatusChanged {
                room_id,
                from: LiveStatus::Offline,
                to: LiveStatus::Live,
            });
        }
        Transition::WentOffline { .. } => {
            event_bus.publish(Event::LiveStatusChanged {
                room_id,
                from: LiveStatus::Live,
                to: LiveStatus::Offline,
            });
        }
        Transition::StillLiveStreamsChanged { .. } => {
            event_bus.publish(Event::LiveStatusChanged {
                room_id,
                from: LiveStatus::Live,
                to: LiveStatus::Live,
            });
        }
        Transition::RoomRenamed { old_name, new_name } => {
            event_bus.publish(Event::RoomRenamed { room_id, old_name, new_name });
        }
        Transition::PermanentlyInvalid { reason } => {
            event_bus.publish(Event::RecordingFailed { room_id, reason });
        }
        Transition::Unchanged => {}
    }
}
