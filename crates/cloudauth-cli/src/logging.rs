//! Logging initialization
//!
//! Priority order:
//! 1. CLI flags (`-v/-q`)
//! 2. `RUST_LOG`
//! 3. The binary default filter

use clap_verbosity_flag::{LogLevel, Verbosity};
use color_eyre::eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber with a compact fmt layer
pub fn init_logging<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str) -> Result<()> {
    let filter = if let Some(log_level) = verbosity.log_level() {
        EnvFilter::try_new(log_level.to_string())?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
