use geo::Coord;
use thiserror::Error;

use crate::{CategoryId, PoiId, distance::LocationError, distance::validate_location};

/// A business or service location used as a proximity reference.
///
/// Coordinates are WGS84 with `x = longitude` and `y = latitude`.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use nestscout_core::{CategoryId, Poi, PoiId};
///
/// let poi = Poi::new(PoiId(1), CategoryId(3), Coord { x: 1.0, y: 2.0 })
///     .with_name("Lycée Victor Hugo")
///     .with_rating(4.5);
///
/// assert_eq!(poi.category, CategoryId(3));
/// assert_eq!(poi.rating, Some(4.5));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Poi {
    /// Unique identifier.
    pub id: PoiId,
    /// Category the POI belongs to.
    pub category: CategoryId,
    /// Geospatial position.
    pub location: Coord<f64>,
    /// Display name.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
    /// Quality signal such as an aggregated review rating.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rating: Option<f32>,
}

impl Poi {
    /// Construct an unnamed, unrated POI.
    #[must_use]
    pub const fn new(id: PoiId, category: CategoryId, location: Coord<f64>) -> Self {
        Self {
            id,
            category,
            location,
            name: String::new(),
            rating: None,
        }
    }

    /// Attach a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach a quality rating.
    #[must_use]
    pub fn with_rating(mut self, rating: f32) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Check that the POI can be placed in the proximity index.
    ///
    /// # Errors
    /// Returns [`LocationError`] when the coordinate is unusable.
    pub fn validate(&self) -> Result<(), LocationError> {
        validate_location(self.location)
    }

    /// Report whether `other` would produce the same proximity facts.
    ///
    /// Names and ratings do not affect distances, so they are ignored.
    #[must_use]
    pub fn same_placement(&self, other: &Self) -> bool {
        self.category == other.category && self.location == other.location
    }
}

/// Errors returned by [`PoiCategory::new`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CategoryError {
    /// The indexing radius was zero, negative or not finite.
    #[error("category radius must be a positive number of metres, got {radius_m}")]
    InvalidRadius {
        /// Radius as supplied.
        radius_m: f64,
    },
}

/// A stable POI category such as school, metro or café.
///
/// `max_radius_m` bounds the proximity index: POIs of this category further
/// than the radius from a property are never recorded for it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoiCategory {
    /// Unique identifier.
    pub id: CategoryId,
    /// Machine-friendly name.
    pub name: String,
    /// Icon hint for map rendering.
    #[cfg_attr(feature = "serde", serde(default))]
    pub icon: Option<String>,
    /// Hex colour hint for map rendering.
    #[cfg_attr(feature = "serde", serde(default))]
    pub colour: Option<String>,
    /// Largest distance at which a POI of this category is recorded.
    pub max_radius_m: f64,
}

impl PoiCategory {
    /// Validates and constructs a [`PoiCategory`].
    ///
    /// # Errors
    /// Returns [`CategoryError::InvalidRadius`] unless the radius is a
    /// positive, finite number of metres.
    pub fn new(
        id: CategoryId,
        name: impl Into<String>,
        max_radius_m: f64,
    ) -> Result<Self, CategoryError> {
        if !max_radius_m.is_finite() || max_radius_m <= 0.0 {
            return Err(CategoryError::InvalidRadius {
                radius_m: max_radius_m,
            });
        }
        Ok(Self {
            id,
            name: name.into(),
            icon: None,
            colour: None,
            max_radius_m,
        })
    }

    /// Attach display metadata.
    #[must_use]
    pub fn with_display(mut self, icon: impl Into<String>, colour: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self.colour = Some(colour.into());
        self
    }
}
