use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Default filter when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "postbuild=info";

/// Installs a global `fmt` subscriber, filtered by `RUST_LOG`.
///
/// Returns `false` when another subscriber was already installed.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
