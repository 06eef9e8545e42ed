//! Structured logging initialization.
//!
//! The environment (`RUST_LOG`) wins over the configured level so
//! operators can raise verbosity without touching the config file.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_logging(configured_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| configured_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
