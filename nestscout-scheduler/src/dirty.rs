//! Coalescing tracker of stale (property, profile) pairs.
//!
//! Each pair has at most one logical entry. Marking a pending pair again
//! only upgrades its reason; marking a pair that is currently checked out
//! for computation records that a fresh computation is needed once the
//! current one completes.
//!
//! Entries live in two lanes. Interactive reasons (rule edits, entity
//! changes, signals, retries) always drain before bulk sweep entries, and
//! only bulk admissions are refused once the tracker is at capacity.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use nestscout_core::{ProfileId, PropertyId, ScorePair};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Why a pair was marked dirty, in increasing priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyReason {
    /// Periodic background re-validation.
    Sweep,
    /// Scheduled retry after a transient failure.
    Retry,
    /// An external prediction was published.
    ExternalSignal,
    /// A nearby POI appeared, moved or vanished.
    PoiChanged,
    /// The listing itself changed.
    PropertyChanged,
    /// The profile's rules changed.
    RuleSetChanged,
}

impl DirtyReason {
    /// Queue lane serving this reason.
    #[must_use]
    pub const fn lane(self) -> Lane {
        match self {
            Self::Sweep => Lane::Bulk,
            _ => Lane::Interactive,
        }
    }
}

/// Drain lanes, served interactive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// User-visible changes.
    Interactive,
    /// Background sweeps.
    Bulk,
}

/// Which profiles a property change reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Every registered profile scores every property.
    #[default]
    AllProfiles,
    /// Only pairs with a registered affinity (for example a saved listing)
    /// are scored.
    AffinityOnly,
}

/// A pending pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyEntry {
    /// Stale pair.
    pub pair: ScorePair,
    /// Highest-priority reason seen since the pair was last drained.
    pub reason: DirtyReason,
    /// When the pair first became pending.
    pub enqueued_at: Instant,
}

/// Result of marking one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new pending entry was created.
    Inserted,
    /// The pair was already pending with an equal or higher reason.
    Coalesced,
    /// The pair was already pending; its reason was raised.
    Upgraded,
    /// The pair is being computed; it will be re-drained on completion.
    HeldForRedrain,
    /// Bulk admission refused because the tracker is at capacity.
    Deferred,
}

/// Outcomes of a fan-out mark, per pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkSummary {
    /// Every pair the fan-out reached, with its outcome.
    pub outcomes: Vec<(ScorePair, MarkOutcome)>,
}

impl MarkSummary {
    /// Number of pairs that ended up with the given outcome.
    #[must_use]
    pub fn count(&self, outcome: MarkOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    /// Number of pairs that will be (re)computed as a result of the mark.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o != MarkOutcome::Deferred)
            .count()
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: Self) {
        self.outcomes.extend(other.outcomes);
    }

    fn push(&mut self, pair: ScorePair, outcome: MarkOutcome) {
        self.outcomes.push((pair, outcome));
    }
}

/// What became of a checked-out pair while it was being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkout {
    /// Highest reason the pair was re-marked with, if any. The pair is
    /// pending again with this reason once returned.
    pub redrain: Option<DirtyReason>,
    /// Set when the pair's property, profile or affinity was discarded.
    /// The computed result must not be committed.
    pub cancelled: bool,
}

/// Pending and checked-out pairs.
#[derive(Debug)]
pub struct DirtySet {
    pending: HashMap<ScorePair, DirtyEntry>,
    interactive: VecDeque<ScorePair>,
    bulk: VecDeque<ScorePair>,
    checked_out: HashMap<ScorePair, Checkout>,
    capacity: usize,
    policy: FanOutPolicy,
    profiles: BTreeSet<ProfileId>,
    affinity: BTreeMap<PropertyId, BTreeSet<ProfileId>>,
}

impl Checkout {
    const fn cancel(&mut self) {
        self.redrain = None;
        self.cancelled = true;
    }
}

impl DirtySet {
    /// Construct an empty tracker.
    ///
    /// `capacity` bounds bulk admissions; interactive marks are always
    /// accepted.
    #[must_use]
    pub fn new(capacity: usize, policy: FanOutPolicy) -> Self {
        Self {
            pending: HashMap::new(),
            interactive: VecDeque::new(),
            bulk: VecDeque::new(),
            checked_out: HashMap::new(),
            capacity,
            policy,
            profiles: BTreeSet::new(),
            affinity: BTreeMap::new(),
        }
    }

    /// Number of pending pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Report whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of checked-out pairs.
    #[must_use]
    pub fn checked_out(&self) -> usize {
        self.checked_out.len()
    }

    /// Pending reason for `pair`, if any.
    #[must_use]
    pub fn reason(&self, pair: ScorePair) -> Option<DirtyReason> {
        self.pending.get(&pair).map(|entry| entry.reason)
    }

    /// Report whether `pair` is checked out for computation.
    #[must_use]
    pub fn is_checked_out(&self, pair: ScorePair) -> bool {
        self.checked_out.contains_key(&pair)
    }

    /// Active fan-out policy.
    #[must_use]
    pub const fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Make `profile` a fan-out target.
    pub fn register_profile(&mut self, profile: ProfileId) {
        self.profiles.insert(profile);
    }

    /// Record or clear an affinity between a property and a profile.
    pub fn set_affinity(&mut self, property: PropertyId, profile: ProfileId, active: bool) {
        if active {
            self.affinity.entry(property).or_default().insert(profile);
        } else if let Some(profiles) = self.affinity.get_mut(&property) {
            profiles.remove(&profile);
            if profiles.is_empty() {
                self.affinity.remove(&property);
            }
        }
    }

    /// Report whether the fan-out policy materializes a score for `pair`.
    #[must_use]
    pub fn is_tracked(&self, pair: ScorePair) -> bool {
        if !self.profiles.contains(&pair.profile) {
            return false;
        }
        match self.policy {
            FanOutPolicy::AllProfiles => true,
            FanOutPolicy::AffinityOnly => self
                .affinity
                .get(&pair.property)
                .is_some_and(|profiles| profiles.contains(&pair.profile)),
        }
    }

    /// Profiles a change to `property` reaches under the fan-out policy.
    #[must_use]
    pub fn profiles_for(&self, property: PropertyId) -> Vec<ProfileId> {
        match self.policy {
            FanOutPolicy::AllProfiles => self.profiles.iter().copied().collect(),
            FanOutPolicy::AffinityOnly => self
                .affinity
                .get(&property)
                .map(|profiles| {
                    profiles
                        .iter()
                        .filter(|p| self.profiles.contains(p))
                        .copied()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Mark one pair dirty.
    pub fn mark_dirty(&mut self, pair: ScorePair, reason: DirtyReason) -> MarkOutcome {
        if let Some(held) = self.checked_out.get_mut(&pair) {
            held.redrain = Some(held.redrain.map_or(reason, |previous| previous.max(reason)));
            return MarkOutcome::HeldForRedrain;
        }
        if let Some(entry) = self.pending.get_mut(&pair) {
            if reason <= entry.reason {
                return MarkOutcome::Coalesced;
            }
            let promoted = entry.reason.lane() != reason.lane();
            entry.reason = reason;
            if promoted {
                self.interactive.push_back(pair);
            }
            return MarkOutcome::Upgraded;
        }
        if reason.lane() == Lane::Bulk && self.pending.len() >= self.capacity {
            return MarkOutcome::Deferred;
        }
        self.pending.insert(
            pair,
            DirtyEntry {
                pair,
                reason,
                enqueued_at: Instant::now(),
            },
        );
        match reason.lane() {
            Lane::Interactive => self.interactive.push_back(pair),
            Lane::Bulk => self.bulk.push_back(pair),
        }
        MarkOutcome::Inserted
    }

    /// Mark every pair of `property` reached by the fan-out policy.
    pub fn mark_dirty_for_property(
        &mut self,
        property: PropertyId,
        reason: DirtyReason,
    ) -> MarkSummary {
        let mut summary = MarkSummary::default();
        for profile in self.profiles_for(property) {
            let pair = ScorePair::new(property, profile);
            let outcome = self.mark_dirty(pair, reason);
            summary.push(pair, outcome);
        }
        summary
    }

    /// Mark `profile` against each of `properties` that the policy tracks.
    pub fn mark_dirty_for_profile<I>(
        &mut self,
        profile: ProfileId,
        properties: I,
        reason: DirtyReason,
    ) -> MarkSummary
    where
        I: IntoIterator<Item = PropertyId>,
    {
        let mut summary = MarkSummary::default();
        for property in properties {
            let pair = ScorePair::new(property, profile);
            if self.is_tracked(pair) {
                let outcome = self.mark_dirty(pair, reason);
                summary.push(pair, outcome);
            }
        }
        summary
    }

    /// Remove and check out up to `max` entries, interactive lane first.
    pub fn drain(&mut self, max: usize) -> Vec<DirtyEntry> {
        let mut drained = Vec::with_capacity(max.min(self.pending.len()));
        for lane in [Lane::Interactive, Lane::Bulk] {
            while drained.len() < max {
                let queue = match lane {
                    Lane::Interactive => &mut self.interactive,
                    Lane::Bulk => &mut self.bulk,
                };
                let Some(pair) = queue.pop_front() else {
                    break;
                };
                // Skip keys left behind by upgrades and discards.
                let live = self
                    .pending
                    .get(&pair)
                    .is_some_and(|entry| entry.reason.lane() == lane);
                if !live {
                    continue;
                }
                if let Some(entry) = self.pending.remove(&pair) {
                    self.checked_out.insert(pair, Checkout::default());
                    drained.push(entry);
                }
            }
        }
        self.compact();
        drained
    }

    /// Return a checked-out pair.
    ///
    /// When the pair was re-marked while checked out it becomes pending
    /// again with the highest reason seen. A pair that was never checked
    /// out reports a default [`Checkout`].
    pub fn complete(&mut self, pair: ScorePair) -> Checkout {
        let checkout = self.checked_out.remove(&pair).unwrap_or_default();
        let Some(redrain) = checkout.redrain else {
            return checkout;
        };
        // Re-admission bypasses capacity: the pair already held a slot.
        self.pending.insert(
            pair,
            DirtyEntry {
                pair,
                reason: redrain,
                enqueued_at: Instant::now(),
            },
        );
        match redrain.lane() {
            Lane::Interactive => self.interactive.push_back(pair),
            Lane::Bulk => self.bulk.push_back(pair),
        }
        checkout
    }

    /// Drop every pending entry and affinity of `property`.
    ///
    /// Checked-out pairs are cancelled and lose any re-drain request.
    pub fn discard_property(&mut self, property: PropertyId) {
        self.pending.retain(|pair, _| pair.property != property);
        for (pair, held) in &mut self.checked_out {
            if pair.property == property {
                held.cancel();
            }
        }
        self.affinity.remove(&property);
    }

    /// Stop tracking `profile` and drop its pending entries.
    pub fn discard_profile(&mut self, profile: ProfileId) {
        self.profiles.remove(&profile);
        self.pending.retain(|pair, _| pair.profile != profile);
        for (pair, held) in &mut self.checked_out {
            if pair.profile == profile {
                held.cancel();
            }
        }
        for profiles in self.affinity.values_mut() {
            profiles.remove(&profile);
        }
        self.affinity.retain(|_, profiles| !profiles.is_empty());
    }

    /// Drop one pending entry and cancel it if checked out.
    pub fn discard(&mut self, pair: ScorePair) {
        self.pending.remove(&pair);
        if let Some(held) = self.checked_out.get_mut(&pair) {
            held.cancel();
        }
    }

    fn compact(&mut self) {
        let slack = self.pending.len().saturating_mul(2).saturating_add(64);
        if self.interactive.len().saturating_add(self.bulk.len()) <= slack {
            return;
        }
        let pending = &self.pending;
        let mut seen = std::collections::HashSet::new();
        self.interactive.retain(|pair| {
            pending
                .get(pair)
                .is_some_and(|e| e.reason.lane() == Lane::Interactive)
                && seen.insert(*pair)
        });
        self.bulk.retain(|pair| {
            pending
                .get(pair)
                .is_some_and(|e| e.reason.lane() == Lane::Bulk)
                && seen.insert(*pair)
        });
    }
}
