//! Tracing subscriber setup for binaries embedding the bridge.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host's choice. This helper is what `agstream-replay` uses.

use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `config.level`. An unparsable level falls
/// back to `info`. Calling this twice is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        let disable_color =
            std::env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(!disable_color)
                    .with_target(false),
            )
            .try_init()
            .ok();
    }
}

/// Filter for a configured level directive, `info` when it does not parse.
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}
