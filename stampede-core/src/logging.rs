use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs a global `fmt` subscriber filtered by `STAMPEDE_LOG` (or `RUST_LOG`). Without
/// either, logs at `info`, or `debug` when `verbose`. Calling it again is a no-op.
pub fn init(verbose: bool) {
    let filter = std::env::var("STAMPEDE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| EnvFilter::new(if verbose { "debug" } else { "info" }),
            |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new("info")),
        );

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global subscriber already installed");
    }
}
