//! Logic for installing a `tracing` subscriber according to our
//! preferences: an `EnvFilter` that defaults to `info` (or `debug` when
//! `--debug` is passed), human-readable output on stderr, thread names
//! included so per-room task activity is distinguishable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV_VAR: &str = "ROOMWATCH_LOG";

/// Installs the global `tracing` subscriber. Idempotent-enough for tests:
/// a second call after one has already succeeded is a silent no-op.
pub fn install(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(
            if debug {
                tracing_subscriber::filter::LevelFilter::DEBUG
            } else {
                tracing_subscriber::filter::LevelFilter::INFO
            }
            .into(),
        )
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_filter(filter),
        )
        .try_init();

    tracing::debug!(default_level, "tracing subscriber installed");
}

/// Installs a subscriber suitable for `#[test]`/`#[tokio::test]` bodies:
/// writes through the test harness's captured-output writer instead of
/// directly to stderr.
pub fn install_for_tests() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_thread_names(true)
                .with_filter(filter),
        )
        .try_init();
}
