//! Materialized distance facts between properties and POIs.
//!
//! The index records one [`ProximityRecord`] per (property, POI) pair whose
//! haversine distance is within the POI category's `max_radius_m`. Upserts
//! and deletes keep the records current incrementally and report which
//! properties saw a material change, so callers can invalidate exactly the
//! scores that depend on them.
//!
//! Evaluation reads facts through [`ProximityFacts`], implemented both by
//! the live index and by the detached [`ProximitySnapshot`] handed to
//! workers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use geo::Coord;
use log::debug;
use thiserror::Error;

use crate::distance::{LocationError, walk_minutes};
use crate::{CategoryId, Poi, PoiCategory, PoiId, Property, PropertyId};

mod backend;

pub use backend::{Layer, RTreeBackend, SiteEntry, SpatialBackend};

/// Distance change, in metres, below which a record update is not material.
pub const DEFAULT_MATERIALITY_M: f64 = 1.0;

/// Distance fact for one (property, POI) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProximityRecord {
    /// Property end of the pair.
    pub property: PropertyId,
    /// POI end of the pair.
    pub poi: PoiId,
    /// Category of the POI.
    pub category: CategoryId,
    /// Haversine distance in metres.
    pub distance_m: f64,
    /// Walking estimate in minutes.
    pub walk_minutes: f64,
}

impl ProximityRecord {
    fn new(property: PropertyId, poi: PoiId, category: CategoryId, distance_m: f64) -> Self {
        Self {
            property,
            poi,
            category,
            distance_m,
            walk_minutes: walk_minutes(distance_m),
        }
    }
}

/// Properties and categories touched by a material index change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invalidation {
    /// Properties whose records appeared, disappeared or moved.
    pub properties: BTreeSet<PropertyId>,
    /// Categories of the records involved.
    pub categories: BTreeSet<CategoryId>,
}

impl Invalidation {
    /// Report whether no score depends on the change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: Self) {
        self.properties.extend(other.properties);
        self.categories.extend(other.categories);
    }

    fn touch(&mut self, property: PropertyId, category: CategoryId) {
        self.properties.insert(property);
        self.categories.insert(category);
    }
}

/// Errors raised by index mutations.
#[derive(Debug, Error, PartialEq)]
pub enum ProximityError {
    /// A POI named a category that has not been registered.
    #[error("POI {poi} references unregistered category {category}")]
    UnknownCategory {
        /// Offending POI.
        poi: PoiId,
        /// Missing category.
        category: CategoryId,
    },
    /// A category was re-registered with a different radius.
    #[error("category {category} is already indexed at {existing_m} m, cannot change to {requested_m} m")]
    CategoryConflict {
        /// Category being re-registered.
        category: CategoryId,
        /// Radius currently indexed.
        existing_m: f64,
        /// Radius requested.
        requested_m: f64,
    },
    /// An entity carried an unusable coordinate.
    #[error(transparent)]
    InvalidLocation(#[from] LocationError),
}

/// Read access to proximity facts.
pub trait ProximityFacts {
    /// Report whether `category` is registered with the index.
    fn knows_category(&self, category: CategoryId) -> bool;

    /// Closest POI of `category` to `property`, ties broken by lowest POI id.
    fn nearest(&self, property: PropertyId, category: CategoryId) -> Option<ProximityRecord>;

    /// POIs of `category` within `radius_m`, ordered by distance then POI id.
    fn within(
        &self,
        property: PropertyId,
        category: CategoryId,
        radius_m: f64,
    ) -> Vec<ProximityRecord>;
}

fn by_distance(a: &ProximityRecord, b: &ProximityRecord) -> std::cmp::Ordering {
    a.distance_m
        .total_cmp(&b.distance_m)
        .then_with(|| a.poi.cmp(&b.poi))
}

fn nearest_in<'a, I>(records: I, category: CategoryId) -> Option<ProximityRecord>
where
    I: Iterator<Item = &'a ProximityRecord>,
{
    records
        .filter(|r| r.category == category)
        .min_by(|a, b| by_distance(a, b))
        .copied()
}

fn within_in<'a, I>(records: I, category: CategoryId, radius_m: f64) -> Vec<ProximityRecord>
where
    I: Iterator<Item = &'a ProximityRecord>,
{
    let mut found: Vec<_> = records
        .filter(|r| r.category == category && r.distance_m <= radius_m)
        .copied()
        .collect();
    found.sort_by(by_distance);
    found
}

/// Every fact about one property, detached from the live index.
///
/// # Examples
/// ```
/// use nestscout_core::{CategoryId, PoiId, PropertyId, ProximityFacts, ProximitySnapshot};
///
/// let snapshot = ProximitySnapshot::new(PropertyId(1), [CategoryId(1)])
///     .with_record(PoiId(7), CategoryId(1), 250.0)
///     .with_record(PoiId(3), CategoryId(1), 250.0);
/// let nearest = snapshot.nearest(PropertyId(1), CategoryId(1));
/// assert_eq!(nearest.map(|r| r.poi), Some(PoiId(3)));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProximitySnapshot {
    /// Property the facts describe.
    pub property: PropertyId,
    /// Categories registered when the snapshot was taken.
    pub categories: BTreeSet<CategoryId>,
    /// Records for `property`, in no particular order.
    pub records: Vec<ProximityRecord>,
}

impl ProximitySnapshot {
    /// Construct an empty snapshot aware of `categories`.
    #[must_use]
    pub fn new<I>(property: PropertyId, categories: I) -> Self
    where
        I: IntoIterator<Item = CategoryId>,
    {
        Self {
            property,
            categories: categories.into_iter().collect(),
            records: Vec::new(),
        }
    }

    /// Add a record while returning `self` for chaining.
    #[must_use]
    pub fn with_record(mut self, poi: PoiId, category: CategoryId, distance_m: f64) -> Self {
        self.records
            .push(ProximityRecord::new(self.property, poi, category, distance_m));
        self
    }

    fn records_for(&self, property: PropertyId) -> impl Iterator<Item = &ProximityRecord> {
        let matches = self.property == property;
        self.records.iter().filter(move |_| matches)
    }
}

impl ProximityFacts for ProximitySnapshot {
    fn knows_category(&self, category: CategoryId) -> bool {
        self.categories.contains(&category)
    }

    fn nearest(&self, property: PropertyId, category: CategoryId) -> Option<ProximityRecord> {
        nearest_in(self.records_for(property), category)
    }

    fn within(
        &self,
        property: PropertyId,
        category: CategoryId,
        radius_m: f64,
    ) -> Vec<ProximityRecord> {
        within_in(self.records_for(property), category, radius_m)
    }
}

/// Incrementally maintained proximity index.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use nestscout_core::distance::offset_m;
/// use nestscout_core::{
///     CategoryId, Poi, PoiCategory, PoiId, Property, PropertyId, ProximityFacts, ProximityIndex,
/// };
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let home = Coord { x: 2.35, y: 48.85 };
/// let mut index = ProximityIndex::new();
/// index.register_category(PoiCategory::new(CategoryId(1), "school", 1_500.0)?)?;
/// index.upsert_property(&Property::new(PropertyId(1), home))?;
/// let change = index.upsert_poi(&Poi::new(PoiId(1), CategoryId(1), offset_m(home, 300.0, 0.0)))?;
///
/// assert!(change.properties.contains(&PropertyId(1)));
/// let nearest = index.nearest(PropertyId(1), CategoryId(1)).ok_or("missing record")?;
/// assert!((nearest.distance_m - 300.0).abs() < 1.0);
/// # Ok(())
/// # }
/// ```
pub struct ProximityIndex<B = RTreeBackend> {
    backend: B,
    categories: BTreeMap<CategoryId, PoiCategory>,
    largest_radius_m: f64,
    properties: HashMap<PropertyId, Coord<f64>>,
    pois: HashMap<PoiId, Poi>,
    records: BTreeMap<(PropertyId, PoiId), ProximityRecord>,
    by_poi: HashMap<PoiId, BTreeSet<PropertyId>>,
    materiality_m: f64,
}

impl<B> std::fmt::Debug for ProximityIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityIndex")
            .field("categories", &self.categories.len())
            .field("properties", &self.properties.len())
            .field("pois", &self.pois.len())
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl Default for ProximityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximityIndex {
    /// Construct an empty index over the in-memory R\*-tree backend.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(RTreeBackend::new())
    }
}

impl<B: SpatialBackend> ProximityIndex<B> {
    /// Construct an empty index over `backend`.
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            categories: BTreeMap::new(),
            largest_radius_m: 0.0,
            properties: HashMap::new(),
            pois: HashMap::new(),
            records: BTreeMap::new(),
            by_poi: HashMap::new(),
            materiality_m: DEFAULT_MATERIALITY_M,
        }
    }

    /// Set the distance change below which updates are not material.
    #[must_use]
    pub fn with_materiality(mut self, threshold_m: f64) -> Self {
        self.materiality_m = threshold_m.max(0.0);
        self
    }

    /// Look up a registered category.
    #[must_use]
    pub fn category(&self, id: CategoryId) -> Option<&PoiCategory> {
        self.categories.get(&id)
    }

    /// Iterate over registered categories in id order.
    pub fn categories(&self) -> impl Iterator<Item = &PoiCategory> {
        self.categories.values()
    }

    /// Number of stored proximity records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Register a POI category.
    ///
    /// Re-registering with the same radius updates display metadata only.
    ///
    /// # Errors
    /// Returns [`ProximityError::CategoryConflict`] when the radius differs
    /// from the one already indexed.
    pub fn register_category(
        &mut self,
        category: PoiCategory,
    ) -> Result<Invalidation, ProximityError> {
        if let Some(existing) = self.categories.get(&category.id)
            && existing.max_radius_m.total_cmp(&category.max_radius_m).is_ne()
        {
            return Err(ProximityError::CategoryConflict {
                category: category.id,
                existing_m: existing.max_radius_m,
                requested_m: category.max_radius_m,
            });
        }
        self.largest_radius_m = self.largest_radius_m.max(category.max_radius_m);
        self.categories.insert(category.id, category);
        Ok(Invalidation::default())
    }

    /// Insert or move a property and recompute its records.
    ///
    /// # Errors
    /// Returns [`ProximityError::InvalidLocation`] for unusable coordinates;
    /// the index is left unchanged.
    pub fn upsert_property(&mut self, property: &Property) -> Result<Invalidation, ProximityError> {
        property.validate()?;
        let id = property.id;
        if self.properties.get(&id) == Some(&property.location) {
            return Ok(Invalidation::default());
        }
        self.properties.insert(id, property.location);
        self.backend.insert(
            Layer::Properties,
            SiteEntry {
                id: id.get(),
                category: None,
                location: property.location,
            },
        );

        let fresh: BTreeMap<PoiId, ProximityRecord> = self
            .backend
            .within(Layer::Pois, property.location, self.largest_radius_m)
            .into_iter()
            .filter_map(|(entry, distance)| {
                let category = entry.category?;
                let radius = self.categories.get(&category)?.max_radius_m;
                (distance <= radius).then(|| {
                    let poi = PoiId(entry.id);
                    (poi, ProximityRecord::new(id, poi, category, distance))
                })
            })
            .collect();
        let stale = self.take_property_records(id);

        let mut invalidation = Invalidation::default();
        for (poi, old) in &stale {
            if !fresh.contains_key(poi) {
                invalidation.touch(id, old.category);
            }
        }
        for (poi, record) in fresh {
            if self.is_material(stale.get(&poi), &record) {
                invalidation.touch(id, record.category);
            }
            self.insert_record(record);
        }
        if !invalidation.is_empty() {
            debug!(
                "property {id} moved; {} categories affected",
                invalidation.categories.len()
            );
        }
        Ok(invalidation)
    }

    /// Insert, move or re-categorize a POI and recompute its records.
    ///
    /// Changes to name or rating alone produce an empty invalidation.
    ///
    /// # Errors
    /// Returns [`ProximityError::UnknownCategory`] when the POI's category is
    /// not registered, or [`ProximityError::InvalidLocation`] for unusable
    /// coordinates. The index is left unchanged on error.
    pub fn upsert_poi(&mut self, poi: &Poi) -> Result<Invalidation, ProximityError> {
        let radius = self
            .categories
            .get(&poi.category)
            .map(|c| c.max_radius_m)
            .ok_or(ProximityError::UnknownCategory {
                poi: poi.id,
                category: poi.category,
            })?;
        poi.validate()?;
        if let Some(existing) = self.pois.get_mut(&poi.id)
            && existing.same_placement(poi)
        {
            existing.clone_from(poi);
            return Ok(Invalidation::default());
        }
        let previous = self.pois.insert(poi.id, poi.clone());
        self.backend.insert(
            Layer::Pois,
            SiteEntry {
                id: poi.id.get(),
                category: Some(poi.category),
                location: poi.location,
            },
        );

        let fresh: BTreeMap<PropertyId, ProximityRecord> = self
            .backend
            .within(Layer::Properties, poi.location, radius)
            .into_iter()
            .map(|(entry, distance)| {
                let property = PropertyId(entry.id);
                (
                    property,
                    ProximityRecord::new(property, poi.id, poi.category, distance),
                )
            })
            .collect();
        let stale = self.take_poi_records(poi.id);

        let mut invalidation = Invalidation::default();
        for (property, old) in &stale {
            if !fresh.contains_key(property) {
                invalidation.touch(*property, old.category);
            }
        }
        for (property, record) in fresh {
            let old = stale.get(&property);
            if self.is_material(old, &record) {
                invalidation.touch(property, record.category);
                if let Some(old) = old {
                    invalidation.categories.insert(old.category);
                }
            }
            self.insert_record(record);
        }
        if !invalidation.is_empty() {
            debug!(
                "POI {} {}; {} properties affected",
                poi.id,
                if previous.is_some() { "moved" } else { "added" },
                invalidation.properties.len()
            );
        }
        Ok(invalidation)
    }

    /// Remove a property and all of its records.
    pub fn delete_property(&mut self, id: PropertyId) -> Invalidation {
        let mut invalidation = Invalidation::default();
        if self.properties.remove(&id).is_none() {
            return invalidation;
        }
        self.backend.remove(Layer::Properties, id.get());
        invalidation.properties.insert(id);
        for record in self.take_property_records(id).into_values() {
            invalidation.categories.insert(record.category);
        }
        invalidation
    }

    /// Remove a POI and all of its records.
    pub fn delete_poi(&mut self, id: PoiId) -> Invalidation {
        let mut invalidation = Invalidation::default();
        if self.pois.remove(&id).is_none() {
            return invalidation;
        }
        self.backend.remove(Layer::Pois, id.get());
        for (property, record) in self.take_poi_records(id) {
            invalidation.touch(property, record.category);
        }
        if !invalidation.is_empty() {
            debug!(
                "POI {id} deleted; {} properties affected",
                invalidation.properties.len()
            );
        }
        invalidation
    }

    /// Copy every fact about `property` out of the index.
    #[must_use]
    pub fn snapshot(&self, property: PropertyId) -> ProximitySnapshot {
        ProximitySnapshot {
            property,
            categories: self.categories.keys().copied().collect(),
            records: self.property_records(property).copied().collect(),
        }
    }

    fn property_records(&self, property: PropertyId) -> impl Iterator<Item = &ProximityRecord> {
        self.records
            .range((property, PoiId(0))..=(property, PoiId(u64::MAX)))
            .map(|(_, record)| record)
    }

    #[expect(
        clippy::float_arithmetic,
        reason = "materiality compares distance deltas"
    )]
    fn is_material(&self, old: Option<&ProximityRecord>, new: &ProximityRecord) -> bool {
        old.is_none_or(|old| {
            old.category != new.category
                || (old.distance_m - new.distance_m).abs() > self.materiality_m
        })
    }

    fn insert_record(&mut self, record: ProximityRecord) {
        self.by_poi
            .entry(record.poi)
            .or_default()
            .insert(record.property);
        self.records.insert((record.property, record.poi), record);
    }

    fn take_property_records(&mut self, property: PropertyId) -> BTreeMap<PoiId, ProximityRecord> {
        let keys: Vec<_> = self
            .records
            .range((property, PoiId(0))..=(property, PoiId(u64::MAX)))
            .map(|(key, _)| *key)
            .collect();
        let mut taken = BTreeMap::new();
        for key in keys {
            if let Some(record) = self.records.remove(&key) {
                if let Some(owners) = self.by_poi.get_mut(&record.poi) {
                    owners.remove(&property);
                    if owners.is_empty() {
                        self.by_poi.remove(&record.poi);
                    }
                }
                taken.insert(record.poi, record);
            }
        }
        taken
    }

    fn take_poi_records(&mut self, poi: PoiId) -> BTreeMap<PropertyId, ProximityRecord> {
        let owners = self.by_poi.remove(&poi).unwrap_or_default();
        owners
            .into_iter()
            .filter_map(|property| {
                self.records
                    .remove(&(property, poi))
                    .map(|record| (property, record))
            })
            .collect()
    }
}

impl<B: SpatialBackend> ProximityFacts for ProximityIndex<B> {
    fn knows_category(&self, category: CategoryId) -> bool {
        self.categories.contains_key(&category)
    }

    fn nearest(&self, property: PropertyId, category: CategoryId) -> Option<ProximityRecord> {
        nearest_in(self.property_records(property), category)
    }

    fn within(
        &self,
        property: PropertyId,
        category: CategoryId,
        radius_m: f64,
    ) -> Vec<ProximityRecord> {
        within_in(self.property_records(property), category, radius_m)
    }
}
