//! Top-level wiring: owns every long-lived component and drives the
//! reconciler for the process's lifetime.

use std::path::PathBuf;
use std::sync::Arc;

use base::shutdown;

use crate::config::{ConfigStore, StoreError};
use crate::event_bus::EventBus;
use crate::rate_limiter::RateLimiter;
use crate::recorder::{Downloader, FfmpegDownloader, RecorderManager};
use crate::reconciler::{AdapterFactory, Reconciler};
use crate::room::RoomRegistry;

pub struct Supervisor {
    config_store: Arc<ConfigStore>,
    rooms: Arc<RoomRegistry>,
    recorders: Arc<RecorderManager>,
    rate_limiter: Arc<RateLimiter>,
    event_bus: Arc<EventBus>,
    reconciler: Arc<Reconciler>,
    shutdown_tx: Arc<shutdown::Sender>,
    shutdown_rx: shutdown::Receiver,
}

impl Supervisor {
    /// Loads (or initializes) the config at `config_path` and wires up
    /// every component. `adapters` supplies the real per-platform
    /// scrapers; this crate only ships test doubles and a placeholder.
    pub fn new(config_path: PathBuf, adapters: Arc<dyn AdapterFactory>) -> Result<Self, StoreError> {
        Self::with_downloader(config_path, adapters, Arc::new(FfmpegDownloader))
    }

    pub fn with_downloader(
        config_path: PathBuf,
        adapters: Arc<dyn AdapterFactory>,
        downloader: Arc<dyn Downloader>,
    ) -> Result<Self, StoreError> {
        let config_store = Arc::new(match ConfigStore::load(config_path.clone()) {
            Ok(store) => store,
            Err(StoreError::Config(_)) if !config_path.exists() => ConfigStore::init(config_path)?,
            Err(e) => return Err(e),
        });
        let rooms = crate::room::new_registry();
        let recorders = crate::recorder::new_manager();
        let rate_limiter = Arc::new(RateLimiter::new());
        let event_bus = Arc::new(EventBus::default());
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let reconciler = Arc::new(Reconciler::new(
            rooms.clone(),
            recorders.clone(),
            rate_limiter.clone(),
            event_bus.clone(),
            adapters,
            downloader,
            shutdown_rx.clone(),
        ));

        Ok(Supervisor {
            config_store,
            rooms,
            recorders,
            rate_limiter,
            event_bus,
            reconciler,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config_store
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn recorders(&self) -> &Arc<RecorderManager> {
        &self.recorders
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// An owned handle that can trigger shutdown independently of
    /// `self`, so a caller can hold onto it across the `self`-consuming
    /// [`run`](Self::run) call (e.g. in a `tokio::select!` alongside it).
    pub fn shutdown_handle(&self) -> Arc<shutdown::Sender> {
        self.shutdown_tx.clone()
    }

    /// Runs the reconciler until shutdown is requested. Intended to be
    /// the single long-running task a binary's `main` awaits.
    pub async fn run(self) {
        let config_rx = self.config_store.subscribe();
        self.reconciler.run(config_rx).await;
    }

    pub fn shutdown_receiver(&self) -> shutdown::Receiver {
        self.shutdown_rx.clone()
    }
}
