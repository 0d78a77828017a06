//! Score command implementation for the NestScout CLI.

use std::io::Write;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use nestscout_scheduler::{Engine, EngineConfig, FanOutPolicy};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs::{ensure_parent_dir, file_is_file};
use crate::scenario::{Scenario, ScoreOutput};
use crate::{
    ARG_FAN_OUT, ARG_LIMIT, ARG_LOG_LEVEL, ARG_MAX_ATTEMPTS, ARG_QUEUE_CAPACITY, ARG_RESTORE,
    ARG_SCENARIO, ARG_SNAPSHOT_OUT, ARG_TIMEOUT_MS, ARG_WORKERS, CliError, ENV_SCENARIO,
};

const DEFAULT_LOG_LEVEL: &str = "info";
const FAN_OUT_VALUES: &str = "all_profiles or affinity_only";

/// CLI arguments for the `score` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Load a JSON scenario of categories, POIs, listings, profiles \
                 and signals, run the engine until every score has converged \
                 and print the ranked listings of each profile as JSON. \
                 Options can come from CLI flags, configuration files, or \
                 environment variables.",
    about = "Score a scenario and print ranked listings"
)]
#[ortho_config(prefix = "NESTSCOUT")]
pub(crate) struct ScoreArgs {
    /// Path to a JSON scenario file.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) scenario: Option<Utf8PathBuf>,
    /// Seed the score store from a snapshot written by an earlier run.
    #[arg(long = ARG_RESTORE, value_name = "path")]
    #[serde(default)]
    pub(crate) restore: Option<Utf8PathBuf>,
    /// Write the converged score store to this path.
    #[arg(long = ARG_SNAPSHOT_OUT, value_name = "path")]
    #[serde(default)]
    pub(crate) snapshot_out: Option<Utf8PathBuf>,
    /// Print at most this many listings per profile.
    #[arg(long = ARG_LIMIT, value_name = "count")]
    #[serde(default)]
    pub(crate) limit: Option<usize>,
    /// Concurrent score computations.
    #[arg(long = ARG_WORKERS, value_name = "count")]
    #[serde(default)]
    pub(crate) workers: Option<usize>,
    /// Pending pairs accepted before background sweeps are deferred.
    #[arg(long = ARG_QUEUE_CAPACITY, value_name = "count")]
    #[serde(default)]
    pub(crate) queue_capacity: Option<usize>,
    /// Timeout for proximity and signal lookups, in milliseconds.
    #[arg(long = ARG_TIMEOUT_MS, value_name = "ms")]
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
    /// Attempts per pair before a failure becomes permanent.
    #[arg(long = ARG_MAX_ATTEMPTS, value_name = "count")]
    #[serde(default)]
    pub(crate) max_attempts: Option<u32>,
    /// Which profiles a listing change reaches (`all_profiles` or `affinity_only`).
    #[arg(long = ARG_FAN_OUT, value_name = "policy")]
    #[serde(default)]
    pub(crate) fan_out: Option<String>,
    /// Log filter used when `RUST_LOG` is unset (defaults to `info`).
    #[arg(long = ARG_LOG_LEVEL, value_name = "filter")]
    #[serde(default)]
    pub(crate) log_level: Option<String>,
}

impl ScoreArgs {
    pub(crate) fn into_config(self) -> Result<ScoreConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ScoreConfig::try_from(merged)
    }
}

/// Resolved `score` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScoreConfig {
    /// Scenario to replay.
    pub(crate) scenario: Utf8PathBuf,
    /// Snapshot to restore before replaying.
    pub(crate) restore: Option<Utf8PathBuf>,
    /// Where to persist the converged store.
    pub(crate) snapshot_out: Option<Utf8PathBuf>,
    /// Per-profile output cap.
    pub(crate) limit: Option<usize>,
    /// Engine tuning.
    pub(crate) engine: EngineConfig,
    /// Fallback log filter.
    pub(crate) log_level: String,
}

impl ScoreConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        Self::require_existing(&self.scenario, ARG_SCENARIO)?;
        if let Some(restore) = &self.restore {
            Self::require_existing(restore, ARG_RESTORE)?;
        }
        Ok(())
    }

    fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
        match file_is_file(path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CliError::SourcePathNotFile {
                field,
                path: path.to_path_buf(),
            }),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(CliError::MissingSourceFile {
                    field,
                    path: path.to_path_buf(),
                })
            }
            Err(source) => Err(CliError::InspectSourcePath {
                field,
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn parse_fan_out(value: &str) -> Result<FanOutPolicy, CliError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "all_profiles" | "all" => Ok(FanOutPolicy::AllProfiles),
        "affinity_only" | "affinity" => Ok(FanOutPolicy::AffinityOnly),
        _ => Err(CliError::InvalidOption {
            field: ARG_FAN_OUT,
            value: value.to_owned(),
            expected: FAN_OUT_VALUES,
        }),
    }
}

impl TryFrom<ScoreArgs> for ScoreConfig {
    type Error = CliError;

    fn try_from(args: ScoreArgs) -> Result<Self, Self::Error> {
        let scenario = args.scenario.ok_or(CliError::MissingArgument {
            field: ARG_SCENARIO,
            env: ENV_SCENARIO,
        })?;

        let mut engine = EngineConfig::default();
        if let Some(workers) = args.workers {
            engine = engine.with_workers(workers);
        }
        if let Some(capacity) = args.queue_capacity {
            engine = engine.with_queue_capacity(capacity);
        }
        if let Some(ms) = args.timeout_ms {
            let timeout = Duration::from_millis(ms);
            engine = engine.with_timeouts(timeout, timeout);
        }
        if let Some(max_attempts) = args.max_attempts {
            engine.retry.max_attempts = max_attempts;
        }
        if let Some(policy) = args.fan_out.as_deref() {
            engine = engine.with_fan_out(parse_fan_out(policy)?);
        }
        engine.validate()?;

        Ok(Self {
            scenario,
            restore: args.restore,
            snapshot_out: args.snapshot_out,
            limit: args.limit,
            engine,
            log_level: args
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned()),
        })
    }
}

pub(crate) fn resolve_score_config(args: ScoreArgs) -> Result<ScoreConfig, CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    Ok(config)
}

pub(crate) fn run_score_with(config: &ScoreConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    let output = execute_score(config)?;
    write_score_output(writer, &output)
}

fn execute_score(config: &ScoreConfig) -> Result<ScoreOutput, CliError> {
    let scenario = Scenario::load(&config.scenario)?;
    let profiles = scenario.profile_ids();
    let engine = start_engine(config)?;

    let events = scenario.into_events();
    debug!(events = events.len(), "replaying scenario");
    let mut queued = 0_usize;
    for event in events {
        let accepted = engine
            .apply(event)
            .map_err(|source| CliError::ApplyScenario {
                path: config.scenario.clone(),
                source: Box::new(source),
            })?;
        queued = queued.saturating_add(accepted);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.engine.workers)
        .enable_time()
        .build()
        .map_err(CliError::Runtime)?;
    let report = runtime.block_on(engine.run_until_idle());
    info!(
        queued,
        committed = report.committed,
        failed = report.failed,
        "scenario converged"
    );
    if report.failed > 0 {
        warn!(failed = report.failed, "some pairs could not be scored");
    }

    if let Some(path) = &config.snapshot_out {
        write_snapshot(&engine, path)?;
    }
    ScoreOutput::collect(&engine, &profiles, queued, &report, config.limit).map_err(|source| {
        CliError::ApplyScenario {
            path: config.scenario.clone(),
            source: Box::new(source),
        }
    })
}

fn start_engine(config: &ScoreConfig) -> Result<Engine, CliError> {
    let engine = match &config.restore {
        Some(path) => Engine::restore(config.engine.clone(), path.as_std_path()),
        None => Engine::new(config.engine.clone()),
    };
    engine.map_err(|source| CliError::StartEngine(Box::new(source)))
}

fn write_snapshot(engine: &Engine, path: &Utf8Path) -> Result<(), CliError> {
    ensure_parent_dir(path).map_err(|source| CliError::CreateSnapshotDir {
        path: path.to_path_buf(),
        source,
    })?;
    engine
        .write_snapshot(path.as_std_path())
        .map_err(|source| CliError::WriteSnapshot {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
}

fn write_score_output(writer: &mut dyn Write, output: &ScoreOutput) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(output).map_err(CliError::SerializeOutput)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ScoreConfig, CliError> {
    let merged = ScoreArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ScoreConfig::try_from(merged)
}
