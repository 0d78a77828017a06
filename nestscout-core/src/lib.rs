//! Core domain types and pure scoring logic for the NestScout engine.
//!
//! The crate covers everything that can be computed without scheduling:
//! - entity models ([`Property`], [`Poi`], [`PoiCategory`],
//!   [`SearchProfile`], [`ScoringRule`]);
//! - the incrementally maintained [`ProximityIndex`];
//! - rule evaluation ([`RuleEvaluator`], [`StandardEvaluator`]);
//! - weighted aggregation into a 0–100 [`ScoreCard`] ([`Aggregator`]).
//!
//! Constructors validate their input and return `Result` so malformed data
//! is rejected before it reaches evaluation.
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod aggregate;
pub mod distance;
pub mod evaluator;
mod ids;
mod poi;
mod profile;
mod property;
pub mod proximity;
#[cfg(feature = "serde")]
mod rule_spec;
mod rules;
mod signals;

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;

pub use crate::aggregate::{Aggregator, MAX_SCORE, RuleContribution, ScoreCard};
pub use crate::distance::LocationError;
pub use crate::evaluator::{RuleConfigError, RuleEvaluator, RuleOutcome, StandardEvaluator};
pub use crate::ids::{CategoryId, PoiId, ProfileId, PropertyId, RuleId, ScorePair};
pub use crate::poi::{CategoryError, Poi, PoiCategory};
pub use crate::profile::{PropertyFilter, SearchProfile, check_rule_ids};
pub use crate::property::{Attribute, Operation, Property, Provenance};
pub use crate::proximity::{
    Invalidation, ProximityError, ProximityFacts, ProximityIndex, ProximityRecord,
    ProximitySnapshot,
};
#[cfg(feature = "serde")]
pub use crate::rule_spec::{DEFAULT_MAX_DISTANCE_M, DEFAULT_TARGET_COUNT, RuleSpec};
pub use crate::rules::{RuleKind, RuleType, ScoringRule, ValidationError, WalkTarget};
pub use crate::signals::{SignalKind, SignalSnapshot};
