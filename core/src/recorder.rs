//! Per-room recorder: owns the external downloader process for as long
//! as a room is live, and the state machine around starting, watching
//! and stopping it.
//!
//! The downloader itself (spawning `ffmpeg`, piping a stream URL to a
//! file) is abstracted behind [`Downloader`] so the recorder's restart
//! and idempotence logic can be tested without ever shelling out.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Notify;

use crate::ids::RoomId;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("failed to spawn downloader: {0}")]
    Spawn(String),
    #[error("downloader exited with status {0}")]
    NonZeroExit(i32),
    #[error("downloader killed by signal")]
    Signalled,
}

/// A single recording attempt's parameters, already resolved from the
/// live config snapshot at the moment recording started: stream URL,
/// destination file, and the external program path.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingSpec {
    pub stream_url: String,
    pub output_path: PathBuf,
    pub ffmpeg_path: String,
    pub headers: Vec<(String, String)>,
}

/// How long a graceful stop is given to exit on its own before the
/// recorder escalates to killing the process tree outright.
const GRACEFUL_STOP_GRACE: Duration = Duration::from_secs(3);

/// The process-management seam: given a [`RecordingSpec`], run to
/// completion (or until cancelled) and report how it ended. `started`
/// must be notified once the underlying process is actually running,
/// so the recorder can distinguish "preparing to record" from
/// "recording" (e.g. while `ffmpeg` is still probing the stream).
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn run(
        &self,
        spec: &RecordingSpec,
        shutdown: &base::shutdown::Receiver,
        started: Arc<Notify>,
    ) -> Result<(), DownloaderError>;
}

/// Spawns `ffmpeg -i <stream_url> -c copy <output_path>` and waits for
/// it. On shutdown, asks it to stop gracefully (`q` on stdin, the
/// interactive quit key ffmpeg itself listens for) and gives it
/// [`GRACEFUL_STOP_GRACE`] to flush and exit before killing its whole
/// process tree.
pub struct FfmpegDownloader;

#[async_trait]
impl Downloader for FfmpegDownloader {
    async fn run(
        &self,
        spec: &RecordingSpec,
        shutdown: &base::shutdown::Receiver,
        started: Arc<Notify>,
    ) -> Result<(), DownloaderError> {
        if let Some(parent) = spec.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloaderError::Spawn(e.to_string()))?;
        }
        let mut cmd = Command::new(&spec.ffmpeg_path);
        cmd.arg("-i").arg(&spec.stream_url);
        for (k, v) in &spec.headers {
            cmd.arg("-headers").arg(format!("{k}: {v}\r\n"));
        }
        cmd.arg("-c").arg("copy").arg(&spec.output_path);
        cmd.stdin(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own process group so a tree-kill on timeout reaches ffmpeg's
        // own children (it spawns none today, but a future decoder
        // wrapper might) without touching this supervisor.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| DownloaderError::Spawn(e.to_string()))?;
        let pid = child.id();
        started.notify_one();

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| DownloaderError::Spawn(e.to_string()))?;
                match status.code() {
                    Some(0) => Ok(()),
                    Some(code) => Err(DownloaderError::NonZeroExit(code)),
                    None => Err(DownloaderError::Signalled),
                }
            }
            _ = shutdown.cancelled() => {
                request_graceful_stop(&mut child).await;
                tokio::select! {
                    _ = child.wait() => {}
                    _ = tokio::time::sleep(GRACEFUL_STOP_GRACE) => {
                        kill_tree(&mut child, pid).await;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Writes `q` to the child's stdin, ffmpeg's documented "stop
/// recording cleanly" key. Any failure to write (stdin already closed,
/// process already gone) just falls through to the grace-window kill.
async fn request_graceful_stop(child: &mut tokio::process::Child) {
    if let Some(stdin) = child.stdin.as_mut() {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.shutdown().await;
    }
}

/// Escalates to killing the whole process tree once the grace window
/// has elapsed without a clean exit.
async fn kill_tree(child: &mut tokio::process::Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            // Negative pid targets the whole process group `spawn`
            // placed the child into.
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    #[cfg(windows)]
    {
        if let Some(pid) = pid {
            let _ = std::process::Command::new("taskkill")
                .args(["/T", "/F", "/PID", &pid.to_string()])
                .output();
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RecorderState {
    #[default]
    Waiting,
    Preparing,
    Recording,
    Finished,
}

/// Bounded retries on a crash or non-zero downloader exit, per attempt
/// backoff, before the recorder gives up and surfaces `RecordingFailed`.
const MAX_RESTART_ATTEMPTS: u32 = 3;
const RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// One room's recorder. `start` is idempotent: calling it while already
/// `Preparing` or `Recording` is a no-op, matching the reconciler's
/// "drive toward desired state" style rather than requiring callers to
/// track whether they've already started it.
pub struct Recorder {
    room_id: RoomId,
    downloader: Arc<dyn Downloader>,
    state: Mutex<RecorderState>,
    shutdown_tx: Mutex<Option<base::shutdown::Sender>>,
}

impl Recorder {
    pub fn new(room_id: RoomId, downloader: Arc<dyn Downloader>) -> Self {
        Recorder {
            room_id,
            downloader,
            state: Mutex::new(RecorderState::Waiting),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock()
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Starts recording in the background if not already preparing or
    /// recording. Returns a handle future the caller may await to learn
    /// the outcome, or `None` if an attempt was already in flight.
    ///
    /// The returned task moves through `Preparing` (downloader spawned,
    /// not yet confirmed running) to `Recording` (the downloader
    /// signalled it started) and, on a crash or non-zero exit, retries
    /// up to [`MAX_RESTART_ATTEMPTS`] times with backoff before settling
    /// in `Finished` and returning the last error.
    pub fn start(
        self: &Arc<Self>,
        spec: RecordingSpec,
        parent_shutdown: &base::shutdown::Receiver,
    ) -> Option<tokio::task::JoinHandle<Result<(), DownloaderError>>> {
        {
            let mut state = self.state.lock();
            if matches!(*state, RecorderState::Preparing | RecorderState::Recording) {
                return None;
            }
            *state = RecorderState::Preparing;
        }
        let (tx, rx) = base::shutdown::channel();
        *self.shutdown_tx.lock() = Some(tx);
        let child_shutdown = parent_shutdown.child();

        let this = self.clone();
        let downloader = self.downloader.clone();
        Some(tokio::spawn(async move {
            let mut attempt = 0u32;
            let result = loop {
                let started = Arc::new(Notify::new());
                let watcher = {
                    let this = this.clone();
                    let started = started.clone();
                    tokio::spawn(async move {
                        started.notified().await;
                        let mut state = this.state.lock();
                        if *state == RecorderState::Preparing {
                            *state = RecorderState::Recording;
                        }
                    })
                };

                let attempt_result = tokio::select! {
                    r = downloader.run(&spec, &rx, started) => r,
                    _ = child_shutdown.cancelled() => Ok(()),
                };
                watcher.abort();

                if child_shutdown.is_cancelled() {
                    break Ok(());
                }
                match attempt_result {
                    Ok(()) => break Ok(()),
                    Err(e) => {
                        attempt += 1;
                        if attempt >= MAX_RESTART_ATTEMPTS {
                            break Err(e);
                        }
                        *this.state.lock() = RecorderState::Preparing;
                        tokio::select! {
                            _ = tokio::time::sleep(RESTART_BACKOFF * attempt) => {}
                            _ = child_shutdown.cancelled() => break Ok(()),
                        }
                    }
                }
            };
            *this.state.lock() = RecorderState::Finished;
            *this.shutdown_tx.lock() = None;
            result
        }))
    }

    /// Requests the in-flight recording stop, if any. Idempotent.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            tx.shutdown();
        }
    }
}

pub type RecorderManager = crate::registry::Registry<Recorder>;

pub fn new_manager() -> Arc<RecorderManager> {
    Arc::new(RecorderManager::new())
}

/// Deterministic test double: completes immediately (or after a scripted
/// delay) with a scripted outcome, never touching a real process.
pub mod test_support {
    use super::*;

    pub struct MockDownloader {
        pub outcome: Result<(), DownloaderError>,
        /// Simulated time between spawn and "process started" — lets
        /// tests observe `RecorderState::Preparing` before it flips to
        /// `Recording`.
        pub start_delay: Duration,
        /// Simulated time spent actually recording, after `started` has
        /// already been notified.
        pub delay: Duration,
    }

    impl MockDownloader {
        pub fn success() -> Self {
            MockDownloader {
                outcome: Ok(()),
                start_delay: Duration::ZERO,
                delay: Duration::ZERO,
            }
        }

        pub fn failing(code: i32) -> Self {
            MockDownloader {
                outcome: Err(DownloaderError::NonZeroExit(code)),
                start_delay: Duration::ZERO,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Downloader for MockDownloader {
        async fn run(
            &self,
            _spec: &RecordingSpec,
            shutdown: &base::shutdown::Receiver,
            started: Arc<Notify>,
        ) -> Result<(), DownloaderError> {
            if !self.start_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.start_delay) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }
            started.notify_one();
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }
            match &self.outcome {
                Ok(()) => Ok(()),
                Err(DownloaderError::NonZeroExit(c)) => Err(DownloaderError::NonZeroExit(*c)),
                Err(DownloaderError::Spawn(s)) => Err(DownloaderError::Spawn(s.clone())),
                Err(DownloaderError::Signalled) => Err(DownloaderError::Signalled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::MockDownloader;

    fn spec() -> RecordingSpec {
        RecordingSpec {
            stream_url: "https://example.com/stream.flv".to_string(),
            output_path: PathBuf::from("/tmp/out.flv"),
            ffmpeg_path: "ffmpeg".to_string(),
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn start_transitions_to_recording_and_back_to_finished_on_success() {
        let recorder = Arc::new(Recorder::new(
            RoomId::native("room1"),
            Arc::new(MockDownloader::success()),
        ));
        let (_tx, rx) = base::shutdown::channel();
        let handle = recorder.start(spec(), &rx).unwrap();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(recorder.state(), RecorderState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn start_observably_passes_through_preparing_before_recording() {
        let recorder = Arc::new(Recorder::new(
            RoomId::native("room1"),
            Arc::new(MockDownloader {
                outcome: Ok(()),
                start_delay: Duration::from_millis(50),
                delay: Duration::from_millis(50),
            }),
        ));
        let (_tx, rx) = base::shutdown::channel();
        let handle = recorder.start(spec(), &rx).unwrap();
        assert_eq!(recorder.state(), RecorderState::Preparing);

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(recorder.state(), RecorderState::Recording);

        tokio::time::advance(Duration::from_millis(60)).await;
        handle.await.unwrap().unwrap();
        assert_eq!(recorder.state(), RecorderState::Finished);
    }

    #[tokio::test]
    async fn start_while_recording_is_a_no_op() {
        let recorder = Arc::new(Recorder::new(
            RoomId::native("room1"),
            Arc::new(MockDownloader {
                outcome: Ok(()),
                start_delay: Duration::ZERO,
                delay: std::time::Duration::from_millis(50),
            }),
        ));
        let (_tx, rx) = base::shutdown::channel();
        let first = recorder.start(spec(), &rx);
        assert!(first.is_some());
        let second = recorder.start(spec(), &rx);
        assert!(second.is_none());
        first.unwrap().await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_downloader_retries_before_surfacing_the_exit_code() {
        let recorder = Arc::new(Recorder::new(
            RoomId::native("room1"),
            Arc::new(MockDownloader::failing(13)),
        ));
        let (_tx, rx) = base::shutdown::channel();
        let handle = recorder.start(spec(), &rx).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(DownloaderError::NonZeroExit(13))));
        assert_eq!(recorder.state(), RecorderState::Finished);
    }

    #[tokio::test]
    async fn stop_cancels_an_in_flight_recording() {
        let recorder = Arc::new(Recorder::new(
            RoomId::native("room1"),
            Arc::new(MockDownloader {
                outcome: Ok(()),
                start_delay: Duration::ZERO,
                delay: std::time::Duration::from_secs(3600),
            }),
        ));
        let (_tx, rx) = base::shutdown::channel();
        let handle = recorder.start(spec(), &rx).unwrap();
        recorder.stop();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "stop() should cause prompt completion");
        assert_eq!(recorder.state(), RecorderState::Finished);
    }
}
