use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` isn't set, shows the limiter lifecycle.
const DEFAULT_DIRECTIVE: &str = "burst_limiter=debug";

/// Initialize logging for a demo program.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}
