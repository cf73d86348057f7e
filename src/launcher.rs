//! The launcher IPC handshake: opaque to this crate beyond the two
//! messages it must produce and the one it must await. Real transport
//! (a pipe, a unix socket, whatever the launcher companion speaks) is
//! out of scope; [`NoopLauncher`] is what runs when no launcher is
//! present, which is the common case for a standalone deployment.

use async_trait::async_trait;
use thiserror::Error;

/// Emitted after a downloaded self-update has been verified on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRequest {
    pub version: String,
    pub path: String,
    pub sha256: String,
}

/// What the core asks for once it wants to hand control back to the
/// launcher for the actual binary swap.
#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownRequest {
    pub reason: String,
    pub grace: std::time::Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShutdownAck;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("launcher ipc unavailable: {0}")]
    Unavailable(String),
}

/// The core's half of the handshake. A real implementation talks to a
/// companion process; this crate only needs the seam. The core's only
/// guarantees to its caller are: no config writes after `ShutdownAck`,
/// and all recorders terminated before the process exits — both are
/// enforced by the caller sequencing `request_update` → `request_shutdown`
/// around its own shutdown path, not by anything in this trait.
#[async_trait]
pub trait LauncherIpc: Send + Sync {
    async fn request_update(&self, request: UpdateRequest) -> Result<(), LauncherError>;
    async fn request_shutdown(&self, request: ShutdownRequest) -> Result<ShutdownAck, LauncherError>;
}

/// No launcher companion is running. Every call fails with
/// `Unavailable`, matching the error-handling design's "IPC/Launcher
/// unavailable: core continues without self-update capability" policy —
/// callers must treat this as non-fatal.
pub struct NoopLauncher;

#[async_trait]
impl LauncherIpc for NoopLauncher {
    async fn request_update(&self, _request: UpdateRequest) -> Result<(), LauncherError> {
        Err(LauncherError::Unavailable("no launcher companion configured".to_string()))
    }

    async fn request_shutdown(&self, _request: ShutdownRequest) -> Result<ShutdownAck, LauncherError> {
        Err(LauncherError::Unavailable("no launcher companion configured".to_string()))
    }
}
