//! Log subscriber setup.
//!
//! Library crates log through the `log` facade; the subscriber installed
//! here forwards those records alongside the CLI's own `tracing` events.

use tracing_subscriber::EnvFilter;

use crate::CliError;

/// Install a compact stderr subscriber.
///
/// `RUST_LOG` wins over `level` when it is set and parses.
pub(crate) fn init(level: &str) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|source| CliError::LogFilter {
            value: level.to_owned(),
            source,
        })?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(CliError::Logging)
}
