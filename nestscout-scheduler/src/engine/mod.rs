//! Event-driven front door of the scoring engine.
//!
//! [`Engine::apply`] folds one [`EngineEvent`] into the catalog and the
//! proximity index, then marks exactly the pairs whose score can change.
//! Scores are recomputed asynchronously by the [`Scheduler`] and read back
//! through [`Engine::get_score`] and [`Engine::list_scores`].

mod state;

use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};
use nestscout_core::{
    Aggregator, Invalidation, Poi, PoiCategory, PoiId, ProfileId, Property, PropertyFilter,
    PropertyId, ProximityIndex, RuleEvaluator, ScorePair, ScoringRule, SearchProfile, SignalKind,
    StandardEvaluator, ValidationError, check_rule_ids,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use self::state::EngineState;
use crate::config::EngineConfig;
use crate::dirty::{DirtyReason, MarkSummary};
use crate::error::EngineError;
use crate::scheduler::{CycleReport, FailureRecord, PairState, ScoreCommitted, Scheduler};
use crate::store::{Score, ScoreStore};

/// A change reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Make a POI category indexable.
    CategoryRegistered(PoiCategory),
    /// A listing was created or edited.
    PropertyUpserted(Property),
    /// A listing was removed.
    PropertyDeleted(PropertyId),
    /// A POI was created, moved or edited.
    PoiUpserted(Poi),
    /// A POI was removed.
    PoiDeleted(PoiId),
    /// A profile was created or edited.
    ProfileUpserted(SearchProfile),
    /// A profile was removed.
    ProfileDeleted(ProfileId),
    /// A profile's rules were replaced.
    RuleSetChanged {
        /// Edited profile.
        profile: ProfileId,
        /// Complete new rule list.
        rules: Vec<ScoringRule>,
    },
    /// An external prediction became available.
    ExternalSignalReady {
        /// Listing the prediction describes.
        property: PropertyId,
        /// Prediction kind.
        signal: SignalKind,
        /// Predicted value.
        value: f64,
    },
    /// A user saved or unsaved a listing.
    AffinityChanged {
        /// Listing.
        property: PropertyId,
        /// Profile the user scores with.
        profile: ProfileId,
        /// Whether the affinity now exists.
        active: bool,
    },
    /// Admit the next batch of background re-validation.
    SweepTick,
}

/// Ranked read order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Highest score first.
    #[default]
    Descending,
    /// Lowest score first.
    Ascending,
}

impl SortOrder {
    fn compare(self, left: f64, right: f64) -> Ordering {
        match self {
            Self::Descending => right.total_cmp(&left),
            Self::Ascending => left.total_cmp(&right),
        }
    }
}

/// One entry of a ranked read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProperty {
    /// Listing.
    pub property: Property,
    /// Its latest score for the queried profile.
    pub score: Score,
}

/// Incremental scoring engine.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use nestscout_core::{Attribute, ProfileId, Property, PropertyId, RuleId, RuleKind, ScoringRule, SearchProfile};
/// use nestscout_scheduler::{Engine, EngineConfig, EngineEvent};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = Engine::new(EngineConfig::default())?;
/// let rooms = ScoringRule::new(
///     RuleId(1),
///     1.0,
///     RuleKind::PropertyAttr { attribute: Attribute::Bedrooms, ideal_min: 2.0, ideal_max: 3.0, tolerance: 1.0 },
/// )?;
/// engine.apply(EngineEvent::ProfileUpserted(
///     SearchProfile::new(ProfileId(1), 7, "couple").with_rules(vec![rooms])?,
/// ))?;
/// engine.apply(EngineEvent::PropertyUpserted(
///     Property::new(PropertyId(1), Coord { x: 2.35, y: 48.85 }).with_bedrooms(2),
/// ))?;
/// let report = engine.run_until_idle().await;
/// assert_eq!(report.committed, 1);
/// let score = engine.get_score(PropertyId(1), ProfileId(1)).map(|s| s.total);
/// assert_eq!(score, Some(100.0));
/// # Ok(())
/// # }
/// ```
pub struct Engine<E = StandardEvaluator> {
    state: Arc<EngineState>,
    scheduler: Arc<Scheduler<EngineState, E>>,
    sweep_cursor: Mutex<Option<ScorePair>>,
}

impl<E> std::fmt::Debug for Engine<E>
where
    E: RuleEvaluator + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scores", &self.scheduler.store().len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine with an empty score store.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] when `config` fails validation.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_store(config, Arc::new(ScoreStore::new()))
    }

    /// Build an engine around an existing store.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] when `config` fails validation.
    pub fn with_store(config: EngineConfig, store: Arc<ScoreStore>) -> Result<Self, EngineError> {
        Self::with_parts(config, store, Aggregator::new())
    }

    /// Build an engine whose store is loaded from a snapshot file.
    ///
    /// Restored scores become visible once their property and profile are
    /// known again.
    ///
    /// # Errors
    /// Returns [`EngineError::Snapshot`] when the file cannot be loaded and
    /// [`EngineError::Config`] when `config` fails validation.
    pub fn restore(config: EngineConfig, snapshot: &Path) -> Result<Self, EngineError> {
        let store = ScoreStore::load_snapshot(snapshot)?;
        info!("restored {} scores from {}", store.len(), snapshot.display());
        Self::with_store(config, Arc::new(store))
    }
}

impl<E> Engine<E>
where
    E: RuleEvaluator + 'static,
{
    /// Build an engine with a custom aggregator.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] when `config` fails validation.
    pub fn with_parts(
        config: EngineConfig,
        store: Arc<ScoreStore>,
        aggregator: Aggregator<E>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let index = ProximityIndex::new().with_materiality(config.materiality_m);
        let state = Arc::new(EngineState::new(index));
        let scheduler = Scheduler::with_aggregator(Arc::clone(&state), store, config, aggregator)?;
        Ok(Self {
            state,
            scheduler: Arc::new(scheduler),
            sweep_cursor: Mutex::new(None),
        })
    }

    /// Store holding committed scores.
    #[must_use]
    pub fn store(&self) -> &Arc<ScoreStore> {
        self.scheduler.store()
    }

    /// Number of pairs waiting to be computed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Apply one event and return the number of pairs queued for
    /// recomputation.
    ///
    /// # Errors
    /// Returns [`EngineError`] when the event is invalid; the engine state
    /// is left unchanged in that case.
    pub fn apply(&self, event: EngineEvent) -> Result<usize, EngineError> {
        let summary = match event {
            EngineEvent::CategoryRegistered(category) => {
                info!("indexing category {} ({})", category.id, category.name);
                self.state.index_mut().register_category(category)?;
                MarkSummary::default()
            }
            EngineEvent::PropertyUpserted(property) => self.upsert_property(property)?,
            EngineEvent::PropertyDeleted(id) => {
                self.delete_property(id);
                MarkSummary::default()
            }
            EngineEvent::PoiUpserted(poi) => {
                let invalidation = self.state.index_mut().upsert_poi(&poi)?;
                self.fan_out_poi(&invalidation)
            }
            EngineEvent::PoiDeleted(id) => {
                let invalidation = self.state.index_mut().delete_poi(id);
                self.fan_out_poi(&invalidation)
            }
            EngineEvent::ProfileUpserted(profile) => self.upsert_profile(profile)?,
            EngineEvent::ProfileDeleted(id) => {
                self.delete_profile(id);
                MarkSummary::default()
            }
            EngineEvent::RuleSetChanged { profile, rules } => self.replace_rules(profile, rules)?,
            EngineEvent::ExternalSignalReady {
                property,
                signal,
                value,
            } => self.record_signal(property, signal, value)?,
            EngineEvent::AffinityChanged {
                property,
                profile,
                active,
            } => self.change_affinity(property, profile, active),
            EngineEvent::SweepTick => return Ok(self.sweep()),
        };
        Ok(summary.accepted())
    }

    fn properties(&self) -> Vec<PropertyId> {
        self.state.catalog().properties.keys().copied().collect()
    }

    fn upsert_property(&self, property: Property) -> Result<MarkSummary, EngineError> {
        if self.state.catalog().properties.get(&property.id) == Some(&property) {
            debug!("property {} unchanged", property.id);
            return Ok(MarkSummary::default());
        }
        let invalidation = self.state.index_mut().upsert_property(&property)?;
        let id = property.id;
        self.state.catalog_mut().properties.insert(id, property);
        debug!(
            "property {id} upserted; {} proximity categories touched",
            invalidation.categories.len()
        );
        Ok(self.scheduler.mark_for_property(id, DirtyReason::PropertyChanged))
    }

    fn delete_property(&self, id: PropertyId) {
        {
            let mut catalog = self.state.catalog_mut();
            catalog.properties.remove(&id);
            catalog.signals.remove(&id);
        }
        let invalidation = self.state.index_mut().delete_property(id);
        self.scheduler.forget_property(id);
        let removed = self.scheduler.store().remove_property(id);
        debug!(
            "property {id} deleted; dropped {removed} scores and {} proximity categories",
            invalidation.categories.len()
        );
    }

    fn fan_out_poi(&self, invalidation: &Invalidation) -> MarkSummary {
        if invalidation.is_empty() {
            return MarkSummary::default();
        }
        let profiles: Vec<ProfileId> = self
            .state
            .catalog()
            .profiles
            .values()
            .filter(|profile| {
                invalidation
                    .categories
                    .iter()
                    .any(|category| profile.references_category(*category))
            })
            .map(|profile| profile.id)
            .collect();
        let pairs = invalidation.properties.iter().flat_map(|property| {
            profiles
                .iter()
                .map(move |profile| ScorePair::new(*property, *profile))
        });
        let summary = self.scheduler.mark_tracked(pairs, DirtyReason::PoiChanged);
        debug!(
            "POI change touched {} properties; {} pairs marked",
            invalidation.properties.len(),
            summary.outcomes.len()
        );
        summary
    }

    fn validate_rules(&self, rules: &[ScoringRule]) -> Result<(), ValidationError> {
        check_rule_ids(rules)?;
        let index = self.state.index();
        for rule in rules {
            for (category, requested_m) in rule.kind().category_radii() {
                let Some(known) = index.category(category) else {
                    return Err(ValidationError::UnknownCategory {
                        rule: rule.id(),
                        category,
                    });
                };
                if requested_m > known.max_radius_m {
                    return Err(ValidationError::RadiusExceedsIndex {
                        rule: rule.id(),
                        category,
                        requested_m,
                        indexed_m: known.max_radius_m,
                    });
                }
            }
        }
        Ok(())
    }

    fn upsert_profile(&self, profile: SearchProfile) -> Result<MarkSummary, EngineError> {
        self.validate_rules(&profile.rules)?;
        let id = profile.id;
        let rules_changed = {
            let mut catalog = self.state.catalog_mut();
            let changed = catalog
                .profiles
                .get(&id)
                .is_none_or(|existing| existing.rules != profile.rules);
            catalog.profiles.insert(id, profile);
            changed
        };
        self.scheduler.register_profile(id);
        if !rules_changed {
            debug!("profile {id} updated without rule changes");
            return Ok(MarkSummary::default());
        }
        Ok(self
            .scheduler
            .mark_for_profile(id, self.properties(), DirtyReason::RuleSetChanged))
    }

    fn delete_profile(&self, id: ProfileId) {
        self.state.catalog_mut().profiles.remove(&id);
        self.scheduler.forget_profile(id);
        let removed = self.scheduler.store().remove_profile(id);
        debug!("profile {id} deleted; dropped {removed} scores");
    }

    fn replace_rules(
        &self,
        id: ProfileId,
        rules: Vec<ScoringRule>,
    ) -> Result<MarkSummary, EngineError> {
        self.validate_rules(&rules)?;
        {
            let mut catalog = self.state.catalog_mut();
            let profile = catalog
                .profiles
                .get_mut(&id)
                .ok_or(EngineError::UnknownProfile { id })?;
            profile.replace_rules(rules)?;
        }
        info!("rules of profile {id} replaced");
        Ok(self
            .scheduler
            .mark_for_profile(id, self.properties(), DirtyReason::RuleSetChanged))
    }

    fn record_signal(
        &self,
        property: PropertyId,
        signal: SignalKind,
        value: f64,
    ) -> Result<MarkSummary, EngineError> {
        let profiles: Vec<ProfileId> = {
            let mut catalog = self.state.catalog_mut();
            if !catalog.properties.contains_key(&property) {
                return Err(EngineError::UnknownProperty { id: property });
            }
            catalog
                .signals
                .entry(property)
                .or_default()
                .insert(signal, value);
            catalog
                .profiles
                .values()
                .filter(|profile| profile.uses_signal(signal))
                .map(|profile| profile.id)
                .collect()
        };
        let pairs = profiles
            .into_iter()
            .map(|profile| ScorePair::new(property, profile));
        Ok(self.scheduler.mark_tracked(pairs, DirtyReason::ExternalSignal))
    }

    fn change_affinity(&self, property: PropertyId, profile: ProfileId, active: bool) -> MarkSummary {
        self.scheduler.set_affinity(property, profile, active);
        let pair = ScorePair::new(property, profile);
        if !active {
            if !self.scheduler.is_tracked(pair)
                && let Some(score) = self.scheduler.store().remove(pair)
            {
                debug!("dropped v{} of {pair} with its affinity", score.version);
            }
            return MarkSummary::default();
        }
        let known = {
            let catalog = self.state.catalog();
            catalog.properties.contains_key(&property) && catalog.profiles.contains_key(&profile)
        };
        if !known {
            return MarkSummary::default();
        }
        self.scheduler
            .mark_tracked([pair], DirtyReason::PropertyChanged)
    }

    fn sweep(&self) -> usize {
        let (properties, profiles): (Vec<PropertyId>, Vec<ProfileId>) = {
            let catalog = self.state.catalog();
            (
                catalog.properties.keys().copied().collect(),
                catalog.profiles.keys().copied().collect(),
            )
        };
        let mut cursor = self
            .sweep_cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let start = *cursor;
        let candidates = properties
            .iter()
            .flat_map(|property| {
                profiles
                    .iter()
                    .map(move |profile| ScorePair::new(*property, *profile))
            })
            .filter(|pair| start.is_none_or(|after| *pair > after));
        let admission = self
            .scheduler
            .admit_sweep(candidates, self.scheduler.config().sweep_batch);
        *cursor = if admission.exhausted {
            None
        } else {
            admission.last.or(start)
        };
        debug!(
            "sweep admitted {} pairs (deferred: {}, wrapped: {})",
            admission.admitted, admission.deferred, admission.exhausted
        );
        admission.admitted
    }

    /// Latest committed score for a pair whose property and profile still
    /// exist.
    #[must_use]
    pub fn get_score(&self, property: PropertyId, profile: ProfileId) -> Option<Score> {
        let known = {
            let catalog = self.state.catalog();
            catalog.properties.contains_key(&property) && catalog.profiles.contains_key(&profile)
        };
        if !known {
            return None;
        }
        self.scheduler
            .store()
            .get(ScorePair::new(property, profile))
    }

    /// Scored listings of `profile` that pass both the profile's own filters
    /// and `filter`, ordered by score with ties broken by property id.
    ///
    /// # Errors
    /// Returns [`EngineError::UnknownProfile`] when the profile does not
    /// exist.
    pub fn list_scores(
        &self,
        profile: ProfileId,
        filter: &PropertyFilter,
        order: SortOrder,
    ) -> Result<Vec<RankedProperty>, EngineError> {
        let scores = self.scheduler.store().scores_for_profile(profile);
        let catalog = self.state.catalog();
        let stored = catalog
            .profiles
            .get(&profile)
            .ok_or(EngineError::UnknownProfile { id: profile })?;
        let combined = stored.filters.and(filter);
        let mut ranked: Vec<RankedProperty> = scores
            .into_iter()
            .filter_map(|score| {
                let property = catalog.properties.get(&score.pair.property)?;
                combined.matches(property).then(|| RankedProperty {
                    property: property.clone(),
                    score,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            order
                .compare(a.score.total, b.score.total)
                .then_with(|| a.property.id.cmp(&b.property.id))
        });
        Ok(ranked)
    }

    /// Subscribe to commit notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScoreCommitted> {
        self.scheduler.subscribe()
    }

    /// Pairs recorded in the failure ledger.
    #[must_use]
    pub fn failed_pairs(&self) -> Vec<FailureRecord> {
        self.scheduler.failed_pairs()
    }

    /// Pipeline position of a pair.
    #[must_use]
    pub fn pair_state(&self, property: PropertyId, profile: ProfileId) -> PairState {
        self.scheduler
            .pair_state(ScorePair::new(property, profile))
    }

    /// Run one scheduling cycle.
    #[must_use]
    pub async fn run_cycle(&self) -> CycleReport {
        self.scheduler.run_cycle().await
    }

    /// Recompute until nothing is pending, in flight or backing off.
    #[must_use]
    pub async fn run_until_idle(&self) -> CycleReport {
        self.scheduler.run_until_idle().await
    }

    /// Run the scheduler in the background until `shutdown` turns true.
    #[must_use]
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<CycleReport> {
        self.scheduler.spawn(shutdown)
    }

    /// Persist the score store.
    ///
    /// # Errors
    /// Returns [`EngineError::SnapshotWrite`] when the file cannot be
    /// written.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), EngineError> {
        self.scheduler.store().write_snapshot(path)?;
        info!(
            "wrote {} scores to {}",
            self.scheduler.store().len(),
            path.display()
        );
        Ok(())
    }
}
