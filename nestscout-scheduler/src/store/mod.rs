//! Versioned, materialized scores.
//!
//! Commits are compare-and-set on a per-pair version: a result is kept only
//! when its version is strictly newer than the one already stored, so a slow
//! worker can never overwrite a fresher score.

mod snapshot;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use nestscout_core::{ProfileId, PropertyId, RuleContribution, ScoreCard, ScorePair};
use serde::{Deserialize, Serialize};

pub use self::snapshot::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION, SnapshotError, SnapshotWriteError};

/// A committed score for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Scored pair.
    pub pair: ScorePair,
    /// Total in `[0, 100]`.
    pub total: f64,
    /// Per-rule contributions.
    pub breakdown: Vec<RuleContribution>,
    /// Computation version; higher is newer.
    pub version: u64,
    /// When the computation finished.
    pub computed_at: SystemTime,
}

impl Score {
    /// Wrap a score card computed at `version`.
    #[must_use]
    pub fn from_card(pair: ScorePair, card: ScoreCard, version: u64) -> Self {
        Self {
            pair,
            total: card.total,
            breakdown: card.breakdown,
            version,
            computed_at: SystemTime::now(),
        }
    }
}

/// Result of [`ScoreStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The score replaced an older one or was the first for its pair.
    Committed,
    /// A score with an equal or newer version was already stored.
    Stale {
        /// Version currently stored.
        current: u64,
    },
}

/// Thread-safe map from pair to latest score.
#[derive(Debug, Default)]
pub struct ScoreStore {
    scores: RwLock<HashMap<ScorePair, Score>>,
}

impl ScoreStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_scores(scores: impl IntoIterator<Item = Score>) -> Self {
        let mut map: HashMap<ScorePair, Score> = HashMap::new();
        for score in scores {
            let newer = map
                .get(&score.pair)
                .is_none_or(|existing| existing.version < score.version);
            if newer {
                map.insert(score.pair, score);
            }
        }
        Self {
            scores: RwLock::new(map),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ScorePair, Score>> {
        self.scores.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ScorePair, Score>> {
        self.scores.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest score for `pair`.
    #[must_use]
    pub fn get(&self, pair: ScorePair) -> Option<Score> {
        self.read().get(&pair).cloned()
    }

    /// Store `score` unless an equal or newer version is present.
    #[must_use]
    pub fn commit(&self, score: Score) -> CommitOutcome {
        let mut scores = self.write();
        if let Some(existing) = scores.get(&score.pair)
            && existing.version >= score.version
        {
            return CommitOutcome::Stale {
                current: existing.version,
            };
        }
        scores.insert(score.pair, score);
        CommitOutcome::Committed
    }

    /// Every stored score of `profile`, in no particular order.
    #[must_use]
    pub fn scores_for_profile(&self, profile: ProfileId) -> Vec<Score> {
        self.read()
            .values()
            .filter(|score| score.pair.profile == profile)
            .cloned()
            .collect()
    }

    /// Drop the score for `pair`.
    #[must_use]
    pub fn remove(&self, pair: ScorePair) -> Option<Score> {
        self.write().remove(&pair)
    }

    /// Drop every score of `property`, returning how many were removed.
    #[must_use]
    pub fn remove_property(&self, property: PropertyId) -> usize {
        let mut scores = self.write();
        let before = scores.len();
        scores.retain(|pair, _| pair.property != property);
        before.saturating_sub(scores.len())
    }

    /// Drop every score of `profile`, returning how many were removed.
    #[must_use]
    pub fn remove_profile(&self, profile: ProfileId) -> usize {
        let mut scores = self.write();
        let before = scores.len();
        scores.retain(|pair, _| pair.profile != profile);
        before.saturating_sub(scores.len())
    }

    /// Number of stored scores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Report whether no scores are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Highest version stored, or zero for an empty store.
    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.read()
            .values()
            .map(|score| score.version)
            .max()
            .unwrap_or(0)
    }

    fn to_vec(&self) -> Vec<Score> {
        let mut scores: Vec<Score> = self.read().values().cloned().collect();
        scores.sort_by_key(|score| score.pair);
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn score(version: u64, total: f64) -> Score {
        Score::from_card(
            ScorePair::new(PropertyId(1), ProfileId(1)),
            ScoreCard {
                total,
                breakdown: Vec::new(),
            },
            version,
        )
    }

    #[rstest]
    fn older_versions_never_overwrite() {
        let store = ScoreStore::new();
        assert_eq!(store.commit(score(5, 70.0)), CommitOutcome::Committed);
        assert_eq!(
            store.commit(score(3, 10.0)),
            CommitOutcome::Stale { current: 5 }
        );
        assert_eq!(
            store.commit(score(5, 10.0)),
            CommitOutcome::Stale { current: 5 }
        );
        let stored = store
            .get(ScorePair::new(PropertyId(1), ProfileId(1)))
            .map(|s| s.total);
        assert_eq!(stored, Some(70.0));
        assert_eq!(store.commit(score(6, 12.5)), CommitOutcome::Committed);
        assert_eq!(store.max_version(), 6);
    }

    #[rstest]
    fn removals_are_scoped() {
        let store = ScoreStore::new();
        for (property, profile) in [(1, 1), (1, 2), (2, 1)] {
            let outcome = store.commit(Score::from_card(
                ScorePair::new(PropertyId(property), ProfileId(profile)),
                ScoreCard::empty(),
                1,
            ));
            assert_eq!(outcome, CommitOutcome::Committed);
        }
        assert_eq!(store.scores_for_profile(ProfileId(1)).len(), 2);
        assert_eq!(store.remove_property(PropertyId(1)), 2);
        assert_eq!(store.remove_profile(ProfileId(1)), 1);
        assert!(store.is_empty());
    }
}
