//! Test logging.
//!
//! ```ignore
//! use gridtest_common::testing::init_test_logging;
//!
//! #[ctor::ctor]
//! fn setup() {
//!     init_test_logging();
//! }
//! ```

use std::sync::Once;
use tracing_subscriber::prelude::*;

static TEST_LOGGING_INIT: Once = Once::new();

/// Variable overriding the test log level (default `info`).
pub const TEST_LOG_LEVEL_VAR: &str = "GRIDTEST_TEST_LOG_LEVEL";

/// Install a compact subscriber that writes through the test harness
/// capture. Safe to call from every test.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let level = std::env::var(TEST_LOG_LEVEL_VAR).unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "gridtest={level},gridtest_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
