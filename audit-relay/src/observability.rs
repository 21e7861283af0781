//! Tracing initialisation

use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    error::{Error, Result},
};

/// Install the global JSON subscriber
///
/// `RUST_LOG`, when set, wins over `service.log_level`. Both accept full
/// `EnvFilter` directives (e.g. `info,audit_relay::persister=debug`). An
/// invalid directive falls back to `info`.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = build_filter(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &config.service.log_level,
    );

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!("Tracing initialized for service: {}", config.service.name);

    Ok(())
}

fn build_filter(env_directives: Option<String>, log_level: &str) -> EnvFilter {
    let directives = env_directives
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| log_level.to_string());

    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!(
            "invalid log filter '{}' ({}), falling back to info",
            directives, e
        );
        EnvFilter::new("info")
    })
}
