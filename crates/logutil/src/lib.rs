//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Build the filter for the subscriber.
///
/// `RUST_LOG` takes precedence over the provided default level.
fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(default_level).into())
        .from_env_lossy()
}

/// Configure a logger writing through the test harness' captured output.
///
/// Safe to call from every test, only the first call installs the logger.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(Level::DEBUG))
        .with_thread_ids(true)
        .with_test_writer()
        .try_init();
}
