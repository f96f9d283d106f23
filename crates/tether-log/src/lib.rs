// ABOUTME: Shared logging setup for tether binaries and tests
// ABOUTME: init() for stderr, init_for() for one crate's logs, init_test() for test output capture

use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Crate-filtered logging to stderr. Default: INFO for the named crate, WARN for everything else.
pub fn init_for(crate_name: &str) {
    tracing_subscriber::fmt().with_env_filter(crate_filter(crate_name, "info")).init();
}

/// Logging routed through the test harness so output only shows for failing tests.
///
/// Default: DEBUG for tether crates, WARN for everything else. Safe to call from every test;
/// only the first call installs a subscriber.
pub fn init_test() {
    let filter = crate_filter("tether_grpc", "debug");
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn crate_filter(crate_name: &str, level: &str) -> EnvFilter {
    let directive = format!("{crate_name}={level}");
    EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        )
}
