//! Incremental recomputation for NestScout scores.
//!
//! Events flow into an [`Engine`], which updates its entity catalog and
//! proximity index and marks the affected (property, profile) pairs in a
//! coalescing [`DirtySet`]. The [`Scheduler`] drains that set onto a bounded
//! pool of async workers, each computing one score through the
//! [`nestscout_core::Aggregator`] and committing it to the versioned
//! [`ScoreStore`]. Transient failures are retried with exponential backoff;
//! permanent ones land in a failure ledger.

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
pub mod dirty;
mod engine;
mod error;
mod scheduler;
mod source;
pub mod store;

pub use crate::config::{ConfigError, EngineConfig, RetryPolicy};
pub use crate::dirty::{
    Checkout, DirtyEntry, DirtyReason, DirtySet, FanOutPolicy, Lane, MarkOutcome, MarkSummary,
};
pub use crate::engine::{Engine, EngineEvent, RankedProperty, SortOrder};
pub use crate::error::{ComputeError, EngineError, PermanentError, TransientError};
pub use crate::scheduler::{
    CycleReport, FailureRecord, PairState, ScoreCommitted, Scheduler, SweepAdmission,
};
pub use crate::source::{ScoringSource, SourceError};
pub use crate::store::{CommitOutcome, Score, ScoreStore, SnapshotError, SnapshotWriteError};
