//! Reconciles the room registry and recorder state against the live
//! config snapshot and the transitions listeners report, so whichever
//! path triggers a change — a config edit or an adapter poll — the
//! system converges to the same rooms-running/recording set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use base::shutdown;

use parking_lot::Mutex;

use crate::adapter::RoomAdapter;
use crate::config::{platform_key_for_url, Config, ResolvedConfig, RoomConfig};
use crate::event_bus::{Event, EventBus};
use crate::ids::RoomId;
use crate::listener::LiveStatus;
use crate::rate_limiter::RateLimiter;
use crate::recorder::{Downloader, Recorder, RecorderManager, RecordingSpec};
use crate::room::{Room, RoomRegistry};

/// Whether switching from `old` to `new` resolved settings requires
/// tearing down and respawning an in-flight recorder, as opposed to
/// something the adapter alone can absorb on its next poll (interval,
/// output template, logging). Quality, stream preference and the
/// downloader binary itself are baked into the running process's
/// command line, so changing any of them needs a fresh process.
fn restart_required(old: &ResolvedConfig, new: &ResolvedConfig) -> bool {
    old.quality != new.quality
        || old.stream_preference != new.stream_preference
        || old.ffmpeg_path != new.ffmpeg_path
}

/// Builds the per-platform adapter a newly-registered room needs. Real
/// per-platform scraping lives outside this crate; the supervisor
/// supplies a factory that knows how to construct (or look up) one.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, platform_key: &str, room: &RoomConfig) -> Arc<dyn RoomAdapter>;
}

/// Wires together the registry, config store, rate limiter and event
/// bus, and runs for the supervisor's whole lifetime.
pub struct Reconciler {
    rooms: Arc<RoomRegistry>,
    recorders: Arc<RecorderManager>,
    rate_limiter: Arc<RateLimiter>,
    event_bus: Arc<EventBus>,
    adapters: Arc<dyn AdapterFactory>,
    downloader: Arc<dyn Downloader>,
    shutdown: shutdown::Receiver,
    /// The `RoomConfig` last applied for each room, keyed by its stable
    /// `origin_id`. Diffed against the newest `wanted` set on every
    /// `reconcile_rooms` pass to detect overrides that changed on a
    /// retained room, as distinct from a room being added or removed.
    applied: Mutex<HashMap<RoomId, RoomConfig>>,
}

impl Reconciler {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        recorders: Arc<RecorderManager>,
        rate_limiter: Arc<RateLimiter>,
        event_bus: Arc<EventBus>,
        adapters: Arc<dyn AdapterFactory>,
        downloader: Arc<dyn Downloader>,
        shutdown: shutdown::Receiver,
    ) -> Self {
        Reconciler {
            rooms,
            recorders,
            rate_limiter,
            event_bus,
            adapters,
            downloader,
            shutdown,
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// Applies one config snapshot to the room registry: registers any
    /// room present in `config` and `listening` but not yet tracked,
    /// spawning its scheduler, and closes+removes any room tracked but
    /// no longer wanted. Calling this twice with the same snapshot is a
    /// no-op the second time: idempotent reconciliation against the
    /// wanted set, not an edge-triggered diff against a remembered
    /// previous snapshot.
    pub async fn reconcile_rooms(&self, config: &Arc<Config>, config_rx: &watch::Receiver<Arc<Config>>) {
        let mut wanted: HashMap<RoomId, RoomConfig> = HashMap::new();
        let mut intervals: HashMap<String, Duration> = HashMap::new();

        for room_config in &config.rooms {
            let Some(platform_key) = platform_key_for_url(&room_config.url) else {
                continue;
            };
            if let Some(platform_override) = config.platform_overrides.get(&platform_key) {
                if let Some(secs) = platform_override.min_access_interval_sec {
                    intervals.insert(platform_key.clone(), Duration::from_secs(secs.max(0) as u64));
                }
            }
            if !room_config.listening {
                continue;
            }
            let Ok(room_id) = RoomId::from_url(&room_config.url) else {
                continue;
            };
            wanted.insert(room_id, room_config.clone());
        }
        self.rate_limiter.reconcile(&intervals);

        // A previously-registered room may have been re-keyed away from
        // its URL-derived id (see `origin_id` on `Room`), so "already
        // registered" is judged against every room's stable origin, not
        // registry-key containment — otherwise a renamed room would be
        // registered a second time under its original url-derived id.
        let existing_origins: std::collections::HashSet<RoomId> = self
            .rooms
            .snapshot()
            .into_iter()
            .map(|(_, room)| room.origin_id().clone())
            .collect();

        for (room_id, room_config) in &wanted {
            if existing_origins.contains(room_id) {
                continue;
            }
            let Some(platform_key) = platform_key_for_url(&room_config.url) else {
                continue;
            };
            let adapter = self.adapters.create(&platform_key, room_config);
            let room = self.rooms.set_if_absent(room_id.clone(), || {
                Room::new(room_id.clone(), platform_key.clone(), adapter, &self.shutdown)
            });
            crate::room::scheduler::spawn(
                room,
                room_config.url.clone(),
                platform_key,
                config_rx.clone(),
                self.rate_limiter.clone(),
                self.event_bus.clone(),
                self.rooms.clone(),
            );
            self.event_bus.publish(Event::RoomAdded {
                room_id: room_id.clone(),
            });
        }

        // A room's live registry key may have been re-keyed to a
        // platform-native id by its scheduler (see
        // `Room::maybe_native_id`), but `wanted` is always keyed by the
        // URL-derived id the config itself produces — so staleness is
        // decided against each room's stable `origin_id`, not its
        // current registry key.
        let stale: Vec<RoomId> = self
            .rooms
            .snapshot()
            .into_iter()
            .filter(|(_, room)| !wanted.contains_key(room.origin_id()))
            .map(|(id, _)| id)
            .collect();
        for room_id in stale {
            if let Some(room) = self.rooms.remove(&room_id) {
                room.close().await;
                if let Some(recorder) = self.recorders.remove(&room_id) {
                    recorder.stop();
                }
                self.event_bus.publish(Event::RoomRemoved { room_id });
            }
        }

        // Retained rooms whose overrides changed since the last applied
        // snapshot: push the new options into the room's adapter, and
        // restart its recorder only if a field that actually requires a
        // fresh downloader process changed.
        let by_origin: HashMap<RoomId, Arc<Room>> = self
            .rooms
            .snapshot()
            .into_iter()
            .map(|(_, room)| (room.origin_id().clone(), room))
            .collect();
        {
            let applied = self.applied.lock();
            for (room_id, room_config) in &wanted {
                if !existing_origins.contains(room_id) {
                    continue;
                }
                let unchanged = applied.get(room_id).is_some_and(|prev| prev == room_config);
                if unchanged {
                    continue;
                }
                let Some(room) = by_origin.get(room_id) else {
                    continue;
                };
                let Some(platform_key) = platform_key_for_url(&room_config.url) else {
                    continue;
                };
                room.update_options(room_config);

                let new_resolved = crate::config::resolve(
                    &config.defaults,
                    &config.platform_overrides,
                    room_config,
                    &platform_key,
                );
                if let Some(recorder) = self.recorders.get(room_id) {
                    let previous_resolved = applied.get(room_id).map(|prev| {
                        crate::config::resolve(&config.defaults, &config.platform_overrides, prev, &platform_key)
                    });
                    let needs_restart = previous_resolved
                        .as_ref()
                        .map(|prev| restart_required(prev, &new_resolved))
                        .unwrap_or(false);
                    if needs_restart {
                        recorder.stop();
                        self.recorders.remove(room_id);
                        self.start_recording(room_id, room, &new_resolved).await;
                    }
                }
            }
        }
        *self.applied.lock() = wanted;
    }

    /// Starts (or restarts) recording for `room`, using its already
    /// cached adapter info and `resolved` settings. A no-op if the room
    /// has no cached info yet or no usable stream variant.
    async fn start_recording(&self, room_id: &RoomId, room: &Arc<Room>, resolved: &ResolvedConfig) {
        let Some(info) = room.cached_info() else {
            return;
        };
        let Some(variant) =
            crate::adapter::select_variant(&info.available_streams, &resolved.stream_preference)
        else {
            return;
        };
        let recorder = self
            .recorders
            .set_if_absent(room_id.clone(), || Recorder::new(room_id.clone(), self.downloader.clone()));
        let output_path = resolved.output_path.join(format!("{room_id}.mp4"));
        let spec = RecordingSpec {
            stream_url: variant.url.clone(),
            output_path: output_path.clone(),
            ffmpeg_path: resolved.ffmpeg_path.clone(),
            headers: variant.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let Some(handle) = recorder.start(spec, &self.shutdown) else {
            return;
        };
        self.event_bus.publish(Event::RecordingStarted {
            room_id: room_id.clone(),
            output_path: output_path.display().to_string(),
        });
        let event_bus = self.event_bus.clone();
        let finished_room_id = room_id.clone();
        let finished_path = output_path.display().to_string();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => {
                    event_bus.publish(Event::RecordingFinished {
                        room_id: finished_room_id,
                        output_path: finished_path,
                        exit_code: Some(0),
                    });
                }
                Ok(Err(e)) => {
                    event_bus.publish(Event::RecordingFailed {
                        room_id: finished_room_id,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {}
            }
        });
    }

    /// Runs until `shutdown` fires: reconciles rooms on every config
    /// change, and starts/stops recorders in response to listener
    /// transitions published on the event bus.
    pub async fn run(self: Arc<Self>, mut config_rx: watch::Receiver<Arc<Config>>) {
        let initial = config_rx.borrow_and_update().clone();
        self.reconcile_rooms(&initial, &config_rx).await;

        let mut events = self.event_bus.subscribe();
        loop {
            tokio::select! {
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let config = config_rx.borrow_and_update().clone();
                    self.reconcile_rooms(&config, &config_rx).await;
                }
                event = events.recv() => {
                    match event {
                        Ok(Event::LiveStatusChanged { room_id, to, .. }) => {
                            self.on_live_status_changed(&room_id, to, &config_rx).await;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
    }

    async fn on_live_status_changed(
        &self,
        room_id: &RoomId,
        to: LiveStatus,
        config_rx: &watch::Receiver<Arc<Config>>,
    ) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };

        match to {
            LiveStatus::Live => {
                let config = config_rx.borrow().clone();
                let origin_id = room.origin_id().clone();
                let Some(room_config) = config
                    .rooms
                    .iter()
                    .find(|r| RoomId::from_url(&r.url).map(|id| id == origin_id).unwrap_or(false))
                else {
                    return;
                };
                let resolved = crate::config::resolve(
                    &config.defaults,
                    &config.platform_overrides,
                    room_config,
                    room.platform_key(),
                );
                self.start_recording(room_id, &room, &resolved).await;
            }
            LiveStatus::Offline | LiveStatus::Initializing => {
                if let Some(recorder) = self.recorders.get(room_id) {
                    recorder.stop();
                }
            }
        }
    }
}
