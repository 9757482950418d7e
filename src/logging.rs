use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber for the process.
///
/// `RUST_LOG` takes precedence over `default_directive` (e.g. `"mqbox=debug"`).
/// Uses `try_init`, so calling it again, or after a test harness has set up
/// its own subscriber, is a no-op. Returns whether this call installed it.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
