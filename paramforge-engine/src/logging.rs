use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the default filter.
pub const LOG_ENV: &str = "PARAMFORGE_LOG";

/// Install the global fmt subscriber.
///
/// `PARAMFORGE_LOG` wins over `default_filter` when set. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
