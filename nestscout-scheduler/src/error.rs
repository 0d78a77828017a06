//! Error types for score computation and engine operations.

use std::time::Duration;

use nestscout_core::{
    ProfileId, PropertyId, ProximityError, RuleConfigError, ScorePair, ValidationError,
};
use thiserror::Error;

use crate::config::ConfigError;
use crate::source::SourceError;
use crate::store::{SnapshotError, SnapshotWriteError};

/// A failure worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransientError {
    /// The proximity lookup missed its deadline.
    #[error("proximity lookup for {pair} timed out after {after:?}")]
    QueryTimeout {
        /// Pair being computed.
        pair: ScorePair,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// Fetching external signals missed its deadline.
    #[error("signal fetch for {pair} timed out after {after:?}")]
    SignalTimeout {
        /// Pair being computed.
        pair: ScorePair,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The data source could not answer.
    #[error(transparent)]
    Unavailable(#[from] SourceError),
    /// The worker task ended without reporting.
    #[error("worker for {pair} stopped unexpectedly")]
    WorkerLost {
        /// Pair being computed.
        pair: ScorePair,
    },
}

/// A failure that retrying will not fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermanentError {
    /// Transient failures persisted through every attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure seen on the final attempt.
        #[source]
        last: TransientError,
    },
    /// The profile's rules cannot be evaluated.
    #[error(transparent)]
    RuleConfig(#[from] RuleConfigError),
}

/// Why a single computation did not produce a score.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Retry after backoff.
    #[error(transparent)]
    Transient(#[from] TransientError),
    /// Record in the failure ledger and stop retrying.
    #[error(transparent)]
    Permanent(#[from] PermanentError),
    /// The property or profile no longer exists.
    #[error("{pair} no longer exists")]
    NotFound {
        /// Pair being computed.
        pair: ScorePair,
    },
}

/// Raised by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An event carried invalid rules or entity data.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The proximity index rejected an update.
    #[error(transparent)]
    Proximity(#[from] ProximityError),
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A score snapshot could not be loaded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// A score snapshot could not be written.
    #[error(transparent)]
    SnapshotWrite(#[from] SnapshotWriteError),
    /// The event names a profile the engine does not know.
    #[error("unknown profile {id}")]
    UnknownProfile {
        /// Requested profile.
        id: ProfileId,
    },
    /// The event names a property the engine does not know.
    #[error("unknown property {id}")]
    UnknownProperty {
        /// Requested property.
        id: PropertyId,
    },
}
