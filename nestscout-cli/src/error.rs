//! Error types emitted by the NestScout CLI.
//!
//! Keep this error type reasonably small, as every CLI helper returns
//! `Result<_, CliError>`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use nestscout_scheduler::{ConfigError, EngineError};
use thiserror::Error;
use tracing_subscriber::filter::ParseError;

/// Errors emitted by the NestScout CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// An option holds a value outside its accepted set.
    #[error("invalid {field} value {value:?}: expected {expected}")]
    InvalidOption {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    /// The merged options do not form a usable engine configuration.
    #[error("invalid engine configuration: {0}")]
    EngineConfig(#[from] ConfigError),
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The configured log filter could not be parsed.
    #[error("invalid log level/filter {value:?}: {source}")]
    LogFilter {
        value: String,
        #[source]
        source: ParseError,
    },
    /// A global subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Logging(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The async runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Opening the scenario file failed.
    #[error("failed to open scenario at {path:?}: {source}")]
    OpenScenario {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Scenario JSON could not be decoded.
    #[error("failed to parse scenario JSON at {path:?}: {source}")]
    ParseScenario {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The engine could not be built or restored.
    #[error("failed to start engine: {0}")]
    StartEngine(#[source] Box<EngineError>),
    /// The engine rejected an entity of the scenario.
    #[error("scenario {path:?} was rejected: {source}")]
    ApplyScenario {
        path: Utf8PathBuf,
        #[source]
        source: Box<EngineError>,
    },
    /// Preparing or writing the score snapshot failed.
    #[error("failed to write score snapshot to {path:?}: {source}")]
    WriteSnapshot {
        path: Utf8PathBuf,
        #[source]
        source: Box<EngineError>,
    },
    /// Creating the snapshot's parent directory failed.
    #[error("failed to create directory for {path:?}: {source}")]
    CreateSnapshotDir {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serializing the ranked output failed.
    #[error("failed to serialize score output: {0}")]
    SerializeOutput(#[source] serde_json::Error),
    /// Writing the ranked output failed.
    #[error("failed to write score output: {0}")]
    WriteOutput(#[source] std::io::Error),
}
