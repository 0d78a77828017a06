//! Test-only helpers shared by unit and behaviour tests.

use std::collections::HashMap;

use geo::Coord;

use crate::distance::haversine_m;
use crate::proximity::{Layer, SiteEntry, SpatialBackend};
use crate::{
    Property, ProximityFacts, RuleConfigError, RuleEvaluator, RuleOutcome, ScoringRule,
    SignalSnapshot,
};

/// Linear-scan `SpatialBackend` used as a reference in tests.
///
/// Every query measures every site; intended only for small datasets.
#[derive(Debug, Default)]
pub struct ScanBackend {
    sites: HashMap<(Layer, u64), SiteEntry>,
}

impl SpatialBackend for ScanBackend {
    fn insert(&mut self, layer: Layer, entry: SiteEntry) {
        self.sites.insert((layer, entry.id), entry);
    }

    fn remove(&mut self, layer: Layer, id: u64) -> Option<SiteEntry> {
        self.sites.remove(&(layer, id))
    }

    fn within(&self, layer: Layer, centre: Coord<f64>, radius_m: f64) -> Vec<(SiteEntry, f64)> {
        self.sites
            .iter()
            .filter(|((site_layer, _), _)| *site_layer == layer)
            .filter_map(|(_, entry)| {
                let distance = haversine_m(centre, entry.location);
                (distance <= radius_m).then_some((*entry, distance))
            })
            .collect()
    }
}

/// Evaluator returning the same value for every rule.
#[derive(Debug, Clone, Copy)]
pub struct FixedEvaluator(
    /// Value returned for every rule.
    pub f64,
);

impl RuleEvaluator for FixedEvaluator {
    fn evaluate(
        &self,
        _rule: &ScoringRule,
        _property: &Property,
        _facts: &dyn ProximityFacts,
        _signals: &SignalSnapshot,
    ) -> Result<RuleOutcome, RuleConfigError> {
        Ok(RuleOutcome::ready(Self::sanitise(self.0)))
    }
}
