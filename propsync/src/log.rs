use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global fmt subscriber, filtered by `RUST_LOG` (default `info`).
///
/// `log` records from dependencies are forwarded into tracing. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
