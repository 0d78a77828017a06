//! Data access seam between the scheduler and whatever owns the entities.

use async_trait::async_trait;
use nestscout_core::{
    ProfileId, Property, PropertyId, ProximitySnapshot, SearchProfile, SignalSnapshot,
};
use thiserror::Error;

/// Failure reported by a [`ScoringSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The backing store could not answer; retrying may succeed.
    #[error("source unavailable: {reason}")]
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },
}

/// Supplies everything one score computation reads.
///
/// Implementations must be cheap to call concurrently; each worker calls the
/// four methods once per computation.
#[async_trait]
pub trait ScoringSource: Send + Sync {
    /// Current state of a listing, or `None` when it no longer exists.
    async fn property(&self, id: PropertyId) -> Result<Option<Property>, SourceError>;

    /// Current state of a profile, or `None` when it no longer exists.
    async fn profile(&self, id: ProfileId) -> Result<Option<SearchProfile>, SourceError>;

    /// Proximity facts for a listing.
    async fn proximity(&self, property: PropertyId) -> Result<ProximitySnapshot, SourceError>;

    /// Latest external predictions for a listing.
    async fn signals(&self, property: PropertyId) -> Result<SignalSnapshot, SourceError>;
}
