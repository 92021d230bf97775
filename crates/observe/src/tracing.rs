use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber.
///
/// `env_filter` uses the usual `RUST_LOG` directive syntax, e.g.
/// `"info,indexer=debug"`. Only runs from binary entry points; a second
/// call in the same process is a no-op.
pub fn initialize(env_filter: &str) {
    let filter = EnvFilter::try_new(env_filter).expect("invalid log filter");
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}
