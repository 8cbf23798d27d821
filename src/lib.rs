pub mod analytics;
pub mod api;
pub mod billing;
pub mod cli;
pub mod clinic;
pub mod config;
pub mod core_state;
pub mod crypto;
pub mod db;
pub mod finance;
pub mod integrations;
pub mod maintenance;
pub mod models;
pub mod practice;
pub mod reports;
pub mod scheduling;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
