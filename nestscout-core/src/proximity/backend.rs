//! Range-query backends for the proximity index.
//!
//! The index owns the proximity records; a backend only answers "which
//! sites lie within this many metres of a point". The default backend keeps
//! one R\*-tree per layer, prefilters with a lon/lat window and refines with
//! haversine distance.

use std::collections::HashMap;
use std::fmt;

use geo::Coord;
use rstar::{AABB, RTree, RTreeObject};

use crate::CategoryId;
use crate::distance::{haversine_m, search_windows};

/// Which family of sites a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Property listings.
    Properties,
    /// Points of interest.
    Pois,
}

/// A point stored in a backend layer.
///
/// `id` is the raw property or POI identifier; `category` is set for POIs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteEntry {
    /// Raw entity identifier.
    pub id: u64,
    /// POI category, `None` for properties.
    pub category: Option<CategoryId>,
    /// WGS84 position.
    pub location: Coord<f64>,
}

impl RTreeObject for SiteEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.location.x, self.location.y])
    }
}

/// Geo-capable store answering radius queries.
///
/// Implementations must return every site within `radius_m` (haversine) of
/// `centre`, paired with its distance. Order is unspecified.
pub trait SpatialBackend: Send + Sync {
    /// Insert or move a site. An existing site with the same id is replaced.
    fn insert(&mut self, layer: Layer, entry: SiteEntry);

    /// Remove a site, returning it when present.
    fn remove(&mut self, layer: Layer, id: u64) -> Option<SiteEntry>;

    /// Sites within `radius_m` of `centre` with their distances in metres.
    fn within(&self, layer: Layer, centre: Coord<f64>, radius_m: f64) -> Vec<(SiteEntry, f64)>;
}

/// In-memory backend built on two R\*-trees.
#[derive(Default)]
pub struct RTreeBackend {
    properties: RTree<SiteEntry>,
    pois: RTree<SiteEntry>,
    sites: HashMap<(Layer, u64), SiteEntry>,
}

impl fmt::Debug for RTreeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RTreeBackend")
            .field("properties", &self.properties.size())
            .field("pois", &self.pois.size())
            .finish_non_exhaustive()
    }
}

impl RTreeBackend {
    /// Construct an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn tree(&self, layer: Layer) -> &RTree<SiteEntry> {
        match layer {
            Layer::Properties => &self.properties,
            Layer::Pois => &self.pois,
        }
    }

    const fn tree_mut(&mut self, layer: Layer) -> &mut RTree<SiteEntry> {
        match layer {
            Layer::Properties => &mut self.properties,
            Layer::Pois => &mut self.pois,
        }
    }
}

impl SpatialBackend for RTreeBackend {
    fn insert(&mut self, layer: Layer, entry: SiteEntry) {
        if let Some(previous) = self.sites.insert((layer, entry.id), entry) {
            self.tree_mut(layer).remove(&previous);
        }
        self.tree_mut(layer).insert(entry);
    }

    fn remove(&mut self, layer: Layer, id: u64) -> Option<SiteEntry> {
        let entry = self.sites.remove(&(layer, id))?;
        self.tree_mut(layer).remove(&entry);
        Some(entry)
    }

    fn within(&self, layer: Layer, centre: Coord<f64>, radius_m: f64) -> Vec<(SiteEntry, f64)> {
        let mut found = Vec::new();
        for (min, max) in search_windows(centre, radius_m) {
            let envelope = AABB::from_corners([min.x, min.y], [max.x, max.y]);
            found.extend(
                self.tree(layer)
                    .locate_in_envelope_intersecting(&envelope)
                    .filter_map(|entry| {
                        let distance = haversine_m(centre, entry.location);
                        (distance <= radius_m).then_some((*entry, distance))
                    }),
            );
        }
        found
    }
}
