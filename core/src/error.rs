//! Error taxonomy per the recording supervisor's error-handling design:
//! each variant names a distinct propagation policy rather than a
//! particular failing call site.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Rejected at edit-time or startup without publishing a new snapshot.
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    /// `update_cas` lost a race; retried automatically by `update_with_retry`.
    #[error("config version conflict: expected {expected}, current is {current}")]
    VersionConflict { expected: i64, current: i64 },

    /// Network/platform-HTTP style failure. Logged per-room, stored in
    /// `RoomInfo::last_error`, never fatal to the owning listener.
    #[error("adapter error for room {room}: {source}")]
    AdapterTransient {
        room: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// `RoomUrlIncorrect` / `NotImplemented`-style failure: the listener
    /// keeps polling (the room might become valid again) but the error is
    /// surfaced persistently via `last_error`.
    #[error("adapter reports a permanent failure for room {room}: {reason}")]
    AdapterPermanent { room: String, reason: String },

    /// The downloader process exited non-zero after exhausting retries.
    #[error("downloader exited with status {0} after exhausting retries")]
    DownloaderExit(i32),

    /// The launcher companion is unreachable; self-update is disabled but
    /// recording continues unaffected.
    #[error("launcher ipc unavailable: {0}")]
    IpcUnavailable(String),

    /// Never user-visible; surfaces as a clean shutdown at the call site.
    #[error("operation cancelled")]
    Cancelled,
}

pub type CoreResult<T> = Result<T, CoreError>;
