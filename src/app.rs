//! Binds a [`roomwatch_core::supervisor::Supervisor`] to process
//! signals and runs it to completion.

use std::sync::Arc;

use roomwatch_core::adapter::test_support::PlaceholderAdapter;
use roomwatch_core::adapter::RoomAdapter;
use roomwatch_core::config::RoomConfig;
use roomwatch_core::reconciler::AdapterFactory;
use roomwatch_core::supervisor::Supervisor;

use crate::cli::Args;

/// Until real per-platform adapters are wired in, every room is served
/// by [`PlaceholderAdapter`], which reports the room as permanently
/// offline. This keeps the supervisor's room-management and config
/// machinery fully exercised by a real CLI invocation without requiring
/// network access.
struct PlaceholderFactory;

impl AdapterFactory for PlaceholderFactory {
    fn create(&self, platform_key: &str, _room: &RoomConfig) -> Arc<dyn RoomAdapter> {
        Arc::new(PlaceholderAdapter::new(platform_key))
    }
}

pub enum ExitCode {
    Normal = 0,
    FatalStartup = 1,
    IpcFailure = 2,
}

pub async fn run(args: Args) -> ExitCode {
    base::tracing_setup::install(args.debug);

    let supervisor = match Supervisor::new(args.config.clone(), Arc::new(PlaceholderFactory)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(err = %e, config = %args.config.display(), "failed to start: config invalid");
            return ExitCode::FatalStartup;
        }
    };

    let shutdown = supervisor.shutdown_handle();
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(err = %e, "failed to install SIGTERM handler; only Ctrl-C will trigger shutdown");
            return run_without_sigterm(supervisor).await;
        }
    };

    tokio::select! {
        _ = supervisor.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            shutdown.shutdown();
        }
        _ = sigterm.recv() => {
            tracing::info!("received sigterm, shutting down");
            shutdown.shutdown();
        }
    }
    ExitCode::Normal
}

async fn run_without_sigterm(supervisor: Supervisor) -> ExitCode {
    let shutdown = supervisor.shutdown_handle();
    tokio::select! {
        _ = supervisor.run() => {}
        _ = tokio::signal::ctrl_c() => {
            shutdown.shutdown();
        }
    }
    ExitCode::Normal
}
