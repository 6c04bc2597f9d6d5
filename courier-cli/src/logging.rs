//! Logging init: structured output to stderr, filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// `verbose` raises the fallback filter when `RUST_LOG` is unset.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "info,courier=trace"
    } else {
        "warn,courier=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
