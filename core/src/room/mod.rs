//! A single room's handle: adapter ownership, the cached last-known
//! [`RoomInfo`], at-most-one-in-flight call enforcement, and the
//! background polling scheduler (see [`scheduler`]).

pub mod scheduler;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use base::shutdown;
use crate::adapter::{AdapterError, RoomAdapter, RoomInfo};
use crate::ids::RoomId;
use crate::listener::{Listener, Transition};

pub use scheduler::SchedulerStatus;

struct CallState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<Result<RoomInfo, AdapterError>>>,
}

/// Owns one room's adapter and cached state. Cheap to clone via `Arc`;
/// the registry in [`crate::registry`] stores `Arc<Room>`.
pub struct Room {
    /// The id this room was first registered under, always derived from
    /// its config URL. Stable for the room's whole lifetime — used to
    /// match it back against a config snapshot even after `room_id` has
    /// been re-keyed to a platform-native id, since the config itself
    /// has no notion of the native id.
    origin_id: RoomId,
    room_id: RwLock<RoomId>,
    platform_key: String,
    adapter: Arc<dyn RoomAdapter>,
    listener: Arc<Listener>,
    cached_info: RwLock<Option<RoomInfo>>,
    call_state: Mutex<CallState>,
    status: RwLock<SchedulerStatus>,
    scheduler_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: shutdown::Receiver,
}

impl Room {
    pub fn new(
        room_id: RoomId,
        platform_key: String,
        adapter: Arc<dyn RoomAdapter>,
        parent_shutdown: &shutdown::Receiver,
    ) -> Self {
        Room {
            origin_id: room_id.clone(),
            room_id: RwLock::new(room_id.clone()),
            platform_key,
            adapter,
            listener: Arc::new(Listener::new(room_id)),
            cached_info: RwLock::new(None),
            call_state: Mutex::new(CallState {
                in_flight: false,
                waiters: Vec::new(),
            }),
            status: RwLock::new(SchedulerStatus::Stopped),
            scheduler_task: Mutex::new(None),
            shutdown: parent_shutdown.child(),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id.read().clone()
    }

    /// The id this room was registered under, unaffected by any later
    /// [`rekey`](Self::rekey) to a platform-native id.
    pub fn origin_id(&self) -> &RoomId {
        &self.origin_id
    }

    pub fn platform_key(&self) -> &str {
        &self.platform_key
    }

    /// If the last cached `get_info` result carries a platform-native id
    /// (`RoomInfo::room_id`) different from the id this room is
    /// currently keyed under, returns it so the caller can re-key the
    /// room registry. `RoomInfo::room_id` is empty until an adapter
    /// reports one; adapters that never resolve a native id leave the
    /// room on its URL-derived id forever.
    pub fn maybe_native_id(&self) -> Option<RoomId> {
        let info = self.cached_info.read();
        let native = &info.as_ref()?.room_id;
        if native.is_empty() {
            return None;
        }
        let native_id = RoomId::native(native.clone());
        let current = self.room_id.read();
        if native_id == *current {
            None
        } else {
            Some(native_id)
        }
    }

    /// Re-keys this room's own identity after the registry has been
    /// re-keyed to match. Does not touch the registry itself — callers
    /// that hold the registry (the scheduler loop) do both together.
    pub(crate) fn rekey(&self, new_id: RoomId) {
        *self.room_id.write() = new_id;
    }

    pub fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    pub fn cached_info(&self) -> Option<RoomInfo> {
        self.cached_info.read().clone()
    }

    pub fn get_scheduler_status(&self) -> SchedulerStatus {
        *self.status.read()
    }

    /// Calls the adapter for fresh info, or — if a call is already in
    /// flight — waits for that call's result instead of issuing a
    /// second one. At most one `adapter.get_info()` call is ever
    /// outstanding for a given room at a time.
    pub async fn get_info(&self) -> Result<RoomInfo, AdapterError> {
        let pending_rx = {
            let mut state = self.call_state.lock();
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };
        if let Some(rx) = pending_rx {
            return rx.await.unwrap_or(Err(AdapterError::Cancelled));
        }

        let result = self.adapter.get_info().await;
        if let Ok(info) = &result {
            *self.cached_info.write() = Some(info.clone());
        }
        let waiters = {
            let mut state = self.call_state.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        for tx in waiters {
            let _ = tx.send(clone_adapter_result(&result));
        }
        result
    }

    /// Waits for `rate_limiter`'s permission for this room's platform,
    /// then calls [`get_info`](Self::get_info). The scheduler loop in
    /// [`scheduler`] drives this on a timer; callers that need an
    /// immediate out-of-band refresh (e.g. a manual "check now" request)
    /// can call it directly too, and still queue behind the same
    /// platform bucket as the scheduler.
    pub async fn get_info_with_interval(
        &self,
        rate_limiter: &crate::rate_limiter::RateLimiter,
        shutdown: &shutdown::Receiver,
    ) -> Result<RoomInfo, AdapterError> {
        rate_limiter.wait(&self.platform_key, shutdown).await;
        self.get_info().await
    }

    /// Feeds a fresh `get_info` result through the room's [`Listener`],
    /// returning the classified transition. Adapter errors are folded
    /// into `PermanentlyInvalid` for `RoomUrlIncorrect`/`NotImplemented`
    /// and otherwise left for the caller to retry next tick.
    /// `notify_renames` gates room-name-change detection; on a `WentLive`
    /// result the stamped info is written back into the room's cache.
    pub async fn poll_once(&self, notify_renames: bool) -> Option<Transition> {
        match self.get_info().await {
            Ok(info) => {
                let now = base::clock::RealClocks.now_unix();
                let transition = self.listener.observe(info, notify_renames, now);
                if let Transition::WentLive { info } = &transition {
                    *self.cached_info.write() = Some(info.clone());
                }
                Some(transition)
            }
            Err(AdapterError::RoomUrlIncorrect) => {
                Some(self.listener.record_permanent_failure("room url is not valid for this platform".to_string()))
            }
            Err(AdapterError::RoomNotExist) => {
                Some(self.listener.record_permanent_failure("room no longer exists".to_string()))
            }
            Err(_) => None,
        }
    }

    /// Pushes updated per-room options into the adapter, e.g. after a
    /// config edit changes quality or stream preference for a room that
    /// is already being polled.
    pub fn update_options(&self, room_config: &crate::config::RoomConfig) {
        self.adapter.update_options(room_config);
    }

    pub(crate) fn shutdown_receiver(&self) -> &shutdown::Receiver {
        &self.shutdown
    }

    pub(crate) fn set_status(&self, status: SchedulerStatus) {
        *self.status.write() = status;
    }

    pub(crate) fn store_scheduler_task(&self, handle: tokio::task::JoinHandle<()>) {
        *self.scheduler_task.lock() = Some(handle);
    }

    /// Stops the background scheduler (if running) and releases the
    /// adapter. Idempotent; safe to call more than once.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.scheduler_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.adapter.close().await;
        self.set_status(SchedulerStatus::Stopped);
    }
}

fn clone_adapter_result(result: &Result<RoomInfo, AdapterError>) -> Result<RoomInfo, AdapterError> {
    match result {
        Ok(info) => Ok(info.clone()),
        Err(e) => Err(match e {
            AdapterError::RoomUrlIncorrect => AdapterError::RoomUrlIncorrect,
            AdapterError::RoomNotExist => AdapterError::RoomNotExist,
            AdapterError::NotImplemented => AdapterError::NotImplemented,
            AdapterError::Cancelled => AdapterError::Cancelled,
            AdapterError::Io(s) => AdapterError::Io(s.clone()),
        }),
    }
}

pub type RoomRegistry = crate::registry::Registry<Room>;

pub fn new_registry() -> Arc<RoomRegistry> {
    Arc::new(RoomRegistry::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::StubAdapter;
    use std::sync::Arc as StdArc;

    fn live_info() -> RoomInfo {
        RoomInfo {
            is_live: true,
            available_streams_at: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn concurrent_get_info_calls_share_a_single_adapter_call() {
        let adapter = StdArc::new(StubAdapter::new(
            "bilibili",
            vec![Ok(live_info())],
        ));
        let (_tx, shutdown) = shutdown::channel();
        let room = StdArc::new(Room::new(
            RoomId::native("room1"),
            "bilibili".to_string(),
            adapter.clone(),
            &shutdown,
        ));

        let r1 = room.clone();
        let r2 = room.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { r1.get_info().await }),
            tokio::spawn(async move { r2.get_info().await }),
        );
        a.unwrap().unwrap();
        b.unwrap().unwrap();
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn poll_once_classifies_through_listener() {
        let adapter = StdArc::new(StubAdapter::new("bilibili", vec![Ok(live_info())]));
        let (_tx, shutdown) = shutdown::channel();
        let room = Room::new(RoomId::native("room1"), "bilibili".to_string(), adapter, &shutdown);
        let transition = room.poll_once(false).await.unwrap();
        assert!(matches!(transition, Transition::WentLive { .. }));
    }

    #[tokio::test]
    async fn permanent_adapter_error_is_classified_as_permanently_invalid() {
        use crate::adapter::AdapterError;
        let adapter = StdArc::new(StubAdapter::new(
            "bilibili",
            vec![Err(AdapterError::RoomNotExist)],
        ));
        let (_tx, shutdown) = shutdown::channel();
        let room = Room::new(RoomId::native("room1"), "bilibili".to_string(), adapter, &shutdown);
        let transition = room.poll_once(false).await.unwrap();
        assert!(matches!(transition, Transition::PermanentlyInvalid { .. }));
    }

    #[tokio::test]
    async fn maybe_native_id_reports_once_adapter_resolves_one() {
        let adapter = StdArc::new(StubAdapter::new(
            "bilibili",
            vec![Ok(RoomInfo {
                is_live: true,
                room_id: "custom_live_id".to_string(),
                available_streams_at: 1,
                ..Default::default()
            })],
        ));
        let (_tx, shutdown) = shutdown::channel();
        let url_id = RoomId::from_url("https://live.bilibili.com/123").unwrap();
        let room = Room::new(url_id.clone(), "bilibili".to_string(), adapter, &shutdown);

        assert!(room.maybe_native_id().is_none(), "no info cached yet");
        room.get_info().await.unwrap();

        let native_id = room.maybe_native_id().expect("adapter reported a native id");
        assert_eq!(native_id, RoomId::native("custom_live_id"));
        assert_eq!(room.room_id(), url_id);

        room.rekey(native_id.clone());
        assert_eq!(room.room_id(), native_id);
        assert_eq!(*room.origin_id(), url_id, "origin id never changes");
        assert!(room.maybe_native_id().is_none(), "already rekeyed to the native id");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let adapter = StdArc::new(StubAdapter::new("bilibili", vec![Ok(live_info())]));
        let (_tx, shutdown) = shutdown::channel();
        let room = Room::new(RoomId::native("room1"), "bilibili".to_string(), adapter, &shutdown);
        room.close().await;
        room.close().await;
    }
}
