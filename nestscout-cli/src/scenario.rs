//! Scenario files and the ranked output printed for them.
//!
//! A scenario lists every entity the engine should know about. Loading one
//! replays it as a sequence of engine events in dependency order: categories
//! before the POIs and rules that read them, listings before the signals and
//! affinities that refer to them.

use std::io::BufReader;

use camino::Utf8Path;
use nestscout_core::{
    Poi, PoiCategory, ProfileId, Property, PropertyFilter, PropertyId, RuleContribution,
    SearchProfile, SignalKind,
};
use nestscout_scheduler::{CycleReport, Engine, EngineError, EngineEvent, FailureRecord, SortOrder};
use serde::{Deserialize, Serialize};

use crate::CliError;
use crate::fs::open_utf8_file;

/// An external prediction known when the scenario starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    /// Listing the prediction describes.
    pub property: PropertyId,
    /// Prediction kind.
    pub signal: SignalKind,
    /// Predicted value in `[0, 1]`.
    pub value: f64,
}

/// A listing saved under a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affinity {
    /// Saved listing.
    pub property: PropertyId,
    /// Profile it was saved under.
    pub profile: ProfileId,
}

/// Every entity fed to the engine by the `score` command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    /// Indexable POI categories.
    pub categories: Vec<PoiCategory>,
    /// Points of interest.
    pub pois: Vec<Poi>,
    /// Listings.
    pub properties: Vec<Property>,
    /// Search profiles with their rules.
    pub profiles: Vec<SearchProfile>,
    /// Predictions available up front.
    pub signals: Vec<SignalReading>,
    /// Saved listings; only consulted by affinity-only fan-out.
    pub affinities: Vec<Affinity>,
}

impl Scenario {
    /// Loads a JSON-encoded scenario from disk.
    pub(crate) fn load(path: &Utf8Path) -> Result<Self, CliError> {
        let file = open_utf8_file(path).map_err(|source| CliError::OpenScenario {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| CliError::ParseScenario {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Profile identifiers in ascending order.
    #[must_use]
    pub fn profile_ids(&self) -> Vec<ProfileId> {
        let mut ids: Vec<ProfileId> = self.profiles.iter().map(|profile| profile.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Consume the scenario as engine events in dependency order.
    #[must_use]
    pub fn into_events(self) -> Vec<EngineEvent> {
        let Self {
            categories,
            pois,
            properties,
            profiles,
            signals,
            affinities,
        } = self;
        categories
            .into_iter()
            .map(EngineEvent::CategoryRegistered)
            .chain(pois.into_iter().map(EngineEvent::PoiUpserted))
            .chain(properties.into_iter().map(EngineEvent::PropertyUpserted))
            .chain(profiles.into_iter().map(EngineEvent::ProfileUpserted))
            .chain(signals.into_iter().map(|reading| EngineEvent::ExternalSignalReady {
                property: reading.property,
                signal: reading.signal,
                value: reading.value,
            }))
            .chain(affinities.into_iter().map(|affinity| EngineEvent::AffinityChanged {
                property: affinity.property,
                profile: affinity.profile,
                active: true,
            }))
            .collect()
    }
}

/// One listing in a profile's ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Listing.
    pub property: PropertyId,
    /// Total in `[0, 100]`.
    pub score: f64,
    /// Version of the committed computation.
    pub version: u64,
    /// Set when a rule is still waiting for an external signal.
    pub pending: bool,
    /// Per-rule contributions.
    pub breakdown: Vec<RuleContribution>,
}

/// Ranking printed for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRanking {
    /// Profile.
    pub profile: ProfileId,
    /// Best match first.
    pub ranked: Vec<RankedEntry>,
}

/// A pair the engine gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPair {
    /// Listing.
    pub property: PropertyId,
    /// Profile.
    pub profile: ProfileId,
    /// Attempts made.
    pub attempts: u32,
    /// Rendered cause.
    pub error: String,
}

impl From<&FailureRecord> for FailedPair {
    fn from(record: &FailureRecord) -> Self {
        Self {
            property: record.pair.property,
            profile: record.pair.profile,
            attempts: record.attempts,
            error: record.error.to_string(),
        }
    }
}

/// Document printed by the `score` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutput {
    /// Pairs queued by the scenario's events.
    pub queued: usize,
    /// Scores committed while converging.
    pub committed: usize,
    /// Per-profile rankings in profile id order.
    pub profiles: Vec<ProfileRanking>,
    /// Pairs recorded in the failure ledger.
    pub failures: Vec<FailedPair>,
}

impl ScoreOutput {
    /// Read rankings for `profiles` back from a converged engine.
    pub(crate) fn collect(
        engine: &Engine,
        profiles: &[ProfileId],
        queued: usize,
        report: &CycleReport,
        limit: Option<usize>,
    ) -> Result<Self, EngineError> {
        let mut rankings = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let ranked = engine
                .list_scores(*profile, &PropertyFilter::default(), SortOrder::Descending)?
                .into_iter()
                .take(limit.unwrap_or(usize::MAX))
                .map(|entry| RankedEntry {
                    property: entry.property.id,
                    score: entry.score.total,
                    version: entry.score.version,
                    pending: entry.score.breakdown.iter().any(|rule| rule.pending),
                    breakdown: entry.score.breakdown,
                })
                .collect();
            rankings.push(ProfileRanking {
                profile: *profile,
                ranked,
            });
        }
        Ok(Self {
            queued,
            committed: report.committed,
            profiles: rankings,
            failures: engine.failed_pairs().iter().map(FailedPair::from).collect(),
        })
    }
}
