//! Command-line interface for running NestScout scoring scenarios.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};

mod error;
mod fs;
mod scenario;
mod score;
mod telemetry;

pub use error::CliError;
pub use scenario::{
    Affinity, FailedPair, ProfileRanking, RankedEntry, Scenario, ScoreOutput, SignalReading,
};

use score::ScoreArgs;

pub(crate) const ARG_SCENARIO: &str = "scenario";
pub(crate) const ARG_RESTORE: &str = "restore";
pub(crate) const ARG_SNAPSHOT_OUT: &str = "snapshot-out";
pub(crate) const ARG_LIMIT: &str = "limit";
pub(crate) const ARG_WORKERS: &str = "workers";
pub(crate) const ARG_QUEUE_CAPACITY: &str = "queue-capacity";
pub(crate) const ARG_TIMEOUT_MS: &str = "timeout-ms";
pub(crate) const ARG_MAX_ATTEMPTS: &str = "max-attempts";
pub(crate) const ARG_FAN_OUT: &str = "fan-out";
pub(crate) const ARG_LOG_LEVEL: &str = "log-level";
pub(crate) const ENV_SCENARIO: &str = "NESTSCOUT_CMDS_SCORE_SCENARIO";

/// Run the NestScout CLI with the current process arguments and environment.
///
/// # Errors
/// Returns [`CliError`] when arguments, configuration, the scenario or the
/// output fail.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Score(args) => {
            let config = score::resolve_score_config(args)?;
            telemetry::init(&config.log_level)?;
            let mut stdout = std::io::stdout().lock();
            score::run_score_with(&config, &mut stdout)
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "nestscout",
    about = "Run property scoring scenarios through the NestScout engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score a JSON scenario and print ranked listings per profile.
    Score(ScoreArgs),
}

#[cfg(test)]
mod tests;
