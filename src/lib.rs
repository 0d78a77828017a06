//! Facade crate for the NestScout scoring engine.
//!
//! This crate re-exports the core domain types and exposes the incremental
//! scheduling engine behind the `scheduler` feature flag.

#![forbid(unsafe_code)]

pub use nestscout_core::{
    Aggregator, Attribute, CategoryId, Invalidation, Poi, PoiCategory, PoiId, ProfileId, Property,
    PropertyFilter, PropertyId, ProximityIndex, RuleContribution, RuleEvaluator, RuleId, RuleKind,
    ScoreCard, ScorePair, ScoringRule, SearchProfile, SignalKind, SignalSnapshot,
    StandardEvaluator, ValidationError,
};

#[cfg(feature = "serde")]
pub use nestscout_core::RuleSpec;

#[cfg(feature = "scheduler")]
pub use nestscout_scheduler::{
    Engine, EngineConfig, EngineError, EngineEvent, FanOutPolicy, RankedProperty, RetryPolicy,
    Score, ScoreCommitted, ScoreStore, SortOrder,
};
