use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

static INIT_TEST_TRACING: Once = Once::new();

/// Installs the global subscriber of the application.
///
/// Events are filtered with `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`], and written to
/// stdout by a fmt layer.
pub fn init_tracing(app_name: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true))
        .try_init()?;

    tracing::info!(app_name, "tracing initialized");

    Ok(())
}

/// Installs a subscriber writing through the test harness, once per test binary.
///
/// Output is captured per test and only shown for failing tests.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}
