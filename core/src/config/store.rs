//! The live-reconfigurable config store: a copy-on-write, version-checked
//! snapshot publisher.
//!
//! Readers (the scheduler, the rate limiter, the reconciler) hold a
//! `watch::Receiver<Arc<Config>>` and never block a writer; a writer
//! serializes against other writers through `write_lock`, recomputes the
//! next snapshot from the current one, persists it to disk, and only
//! then publishes it. A persistence failure aborts the publish, so
//! readers never observe a snapshot that didn't make it to disk.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};

use super::persist::{self, Config, ConfigError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("update rejected: version conflict, expected {expected}, current is {current}")]
    VersionConflict { expected: i64, current: i64 },
    #[error("update_with_retry exhausted {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Thread-safe, shareable handle to the live config snapshot.
pub struct ConfigStore {
    path: PathBuf,
    tx: watch::Sender<Arc<Config>>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Loads `path` and returns a store seeded with it.
    pub fn load(path: PathBuf) -> Result<Self, StoreError> {
        let config = persist::load(&path)?;
        let (tx, _rx) = watch::channel(Arc::new(config));
        Ok(ConfigStore {
            path,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    /// Creates a fresh store backed by a newly-written default config.
    pub fn init(path: PathBuf) -> Result<Self, StoreError> {
        let config = Config::default();
        persist::save(&path, &config)?;
        let (tx, _rx) = watch::channel(Arc::new(config));
        Ok(ConfigStore {
            path,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    /// A new receiver, initialized to whatever snapshot is current.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.tx.subscribe()
    }

    /// The current snapshot, without subscribing to future changes.
    pub fn current(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }

    /// Applies `mutate` to a clone of the current snapshot, persists and
    /// publishes the result unconditionally (no CAS check). Used for
    /// supervisor-internal bookkeeping writes (e.g. bumping `version`)
    /// where no concurrent editor can race.
    pub async fn update<F>(&self, mutate: F) -> Result<Arc<Config>, StoreError>
    where
        F: FnOnce(&mut Config),
    {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.tx.borrow()).as_ref().clone();
        mutate(&mut next);
        next.version += 1;
        persist::save(&self.path, &next)?;
        let next = Arc::new(next);
        let _ = self.tx.send(next.clone());
        Ok(next)
    }

    /// Like [`update`](Self::update), but rejects the write if the
    /// snapshot's version has moved past `expected_version` since the
    /// caller last read it, so a stale-read-then-write race is detected
    /// instead of silently clobbering a concurrent edit.
    pub async fn update_cas<F>(
        &self,
        expected_version: i64,
        mutate: F,
    ) -> Result<Arc<Config>, StoreError>
    where
        F: FnOnce(&mut Config),
    {
        let _guard = self.write_lock.lock().await;
        let current = self.tx.borrow().clone();
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                current: current.version,
            });
        }
        let mut next = (*current).clone();
        mutate(&mut next);
        next.version += 1;
        persist::save(&self.path, &next)?;
        let next = Arc::new(next);
        let _ = self.tx.send(next.clone());
        Ok(next)
    }

    /// Retries [`update_cas`](Self::update_cas) against a freshly-read
    /// version on every `VersionConflict`, up to `max_attempts` times.
    /// `mutate` must be re-runnable against an arbitrary base snapshot:
    /// it receives the current config each attempt, not a memoized one.
    pub async fn update_with_retry<F>(
        &self,
        max_attempts: u32,
        mut mutate: F,
    ) -> Result<Arc<Config>, StoreError>
    where
        F: FnMut(&mut Config),
    {
        for _attempt in 0..max_attempts {
            let expected = self.tx.borrow().version;
            match self.update_cas(expected, &mut mutate).await {
                Ok(published) => return Ok(published),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(StoreError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    /// A transient, unpersisted update: publishes a new snapshot without
    /// touching disk. Used for ephemeral runtime-only fields a future
    /// caller may add to `Config` that shouldn't round-trip to YAML;
    /// today no such field exists, so this always persists as well, but
    /// callers that only need "publish now" should prefer this over
    /// `update` so the distinction is load-bearing if that changes.
    pub async fn update_transient<F>(&self, mutate: F) -> Arc<Config>
    where
        F: FnOnce(&mut Config),
    {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.tx.borrow()).as_ref().clone();
        mutate(&mut next);
        let next = Arc::new(next);
        let _ = self.tx.send(next.clone());
        next
    }
}
