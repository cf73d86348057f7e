//! Graceful shutdown plumbing.
//!
//! A thin, cloneable wrapper around [`tokio_util::sync::CancellationToken`]
//! that gives call sites the `Sender`/`Receiver` vocabulary spec.md's
//! concurrency model uses (one owner requests shutdown, many tasks observe
//! it) without each module reinventing its own waker bookkeeping.

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct ShutdownError;

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("shutdown requested")
    }
}

impl std::error::Error for ShutdownError {}

/// The single owner of a shutdown signal. Dropping it, or calling
/// [`Sender::shutdown`] explicitly, requests shutdown of every [`Receiver`]
/// cloned from it.
pub struct Sender(CancellationToken);

impl Sender {
    pub fn shutdown(&self) {
        self.0.cancel();
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[derive(Clone)]
pub struct Receiver(CancellationToken);

impl Receiver {
    /// Non-blocking check: has shutdown already been requested?
    pub fn check(&self) -> Result<(), ShutdownError> {
        if self.0.is_cancelled() {
            Err(ShutdownError)
        } else {
            Ok(())
        }
    }

    /// Resolves once shutdown has been requested. Cheap to poll repeatedly
    /// in a `tokio::select!` alongside other suspension points.
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }

    /// A child token that is cancelled when this one is, but can also be
    /// cancelled independently — used to scope a single Room's lifetime
    /// under the process-wide shutdown signal.
    pub fn child(&self) -> Receiver {
        Receiver(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Returns a sender and receiver for graceful shutdown. Dropping the
/// sender (or calling `Sender::shutdown`) requests shutdown on every
/// receiver cloned or derived from it.
pub fn channel() -> (Sender, Receiver) {
    let token = CancellationToken::new();
    (Sender(token.clone()), Receiver(token))
}
