pub mod care; // Circles, check-ins, alerts, emergencies, workload
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod scheduler; // Background check-in monitor
pub mod sync; // Replica snapshot export & merge

pub use care::{CareError, ErrorKind};
pub use engine::CareEngine;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` takes precedence
/// over `filter`, which falls back to [`config::default_log_filter`].
/// Calling it again is harmless.
pub fn init_tracing(filter: Option<&str>) {
    let fallback = filter.unwrap_or(config::default_log_filter()).to_string();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .try_init();

    tracing::info!("{} engine v{}", config::APP_NAME, config::APP_VERSION);
}
