use std::collections::BTreeMap;

use geo::Coord;

use crate::{PropertyId, distance::LocationError, distance::validate_location};

/// Whether a listing is offered for sale or for rent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Operation {
    /// Listed for sale.
    #[default]
    Sale,
    /// Listed for rent.
    Rent,
}

/// Numeric listing attributes that rules may score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Attribute {
    /// Asking price.
    Price,
    /// Living area in square metres.
    #[cfg_attr(feature = "serde", serde(alias = "area"))]
    AreaM2,
    /// Number of bedrooms.
    Bedrooms,
    /// Number of bathrooms.
    Bathrooms,
}

impl Attribute {
    /// Return the attribute as a lowercase `&str`.
    ///
    /// # Examples
    /// ```
    /// use nestscout_core::Attribute;
    ///
    /// assert_eq!(Attribute::AreaM2.as_str(), "area_m2");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::AreaM2 => "area_m2",
            Self::Bedrooms => "bedrooms",
            Self::Bathrooms => "bathrooms",
        }
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a listing came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Provenance {
    /// Identifier of the import source, if known.
    #[cfg_attr(feature = "serde", serde(default))]
    pub source_id: Option<u64>,
    /// Identifier of the listing inside the import source.
    #[cfg_attr(feature = "serde", serde(default))]
    pub external_id: Option<String>,
}

/// A real-estate listing as delivered by the import layer.
///
/// Only `location` participates in the proximity index; every other field
/// feeds attribute rules and read-side filters.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use nestscout_core::{Attribute, Property, PropertyId};
///
/// let flat = Property::new(PropertyId(1), Coord { x: 2.35, y: 48.85 })
///     .with_price(350_000.0)
///     .with_bedrooms(2);
/// assert_eq!(flat.attribute(Attribute::Bedrooms), Some(2.0));
/// assert_eq!(flat.attribute(Attribute::AreaM2), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Property {
    /// Unique identifier.
    pub id: PropertyId,
    /// Geospatial position (`x = longitude`, `y = latitude`).
    pub location: Coord<f64>,
    /// Asking price in the listing currency.
    #[cfg_attr(feature = "serde", serde(default))]
    pub price: Option<f64>,
    /// Living area in square metres.
    #[cfg_attr(feature = "serde", serde(default))]
    pub area_m2: Option<f64>,
    /// Number of bedrooms.
    #[cfg_attr(feature = "serde", serde(default))]
    pub bedrooms: Option<u32>,
    /// Number of bathrooms.
    #[cfg_attr(feature = "serde", serde(default))]
    pub bathrooms: Option<u32>,
    /// City name used by profile filters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub city: Option<String>,
    /// Sale or rent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub operation: Operation,
    /// Free-form metadata carried through from the source.
    #[cfg_attr(feature = "serde", serde(default))]
    pub metadata: BTreeMap<String, String>,
    /// Import provenance.
    #[cfg_attr(feature = "serde", serde(default))]
    pub provenance: Provenance,
}

impl Property {
    /// Construct a listing with no attributes.
    #[must_use]
    pub fn new(id: PropertyId, location: Coord<f64>) -> Self {
        Self {
            id,
            location,
            price: None,
            area_m2: None,
            bedrooms: None,
            bathrooms: None,
            city: None,
            operation: Operation::default(),
            metadata: BTreeMap::new(),
            provenance: Provenance::default(),
        }
    }

    /// Set the asking price.
    #[must_use]
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the living area.
    #[must_use]
    pub fn with_area(mut self, area_m2: f64) -> Self {
        self.area_m2 = Some(area_m2);
        self
    }

    /// Set the bedroom count.
    #[must_use]
    pub fn with_bedrooms(mut self, bedrooms: u32) -> Self {
        self.bedrooms = Some(bedrooms);
        self
    }

    /// Set the bathroom count.
    #[must_use]
    pub fn with_bathrooms(mut self, bathrooms: u32) -> Self {
        self.bathrooms = Some(bathrooms);
        self
    }

    /// Set the city.
    #[must_use]
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Set the listing operation.
    #[must_use]
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Read a numeric attribute, if the listing carries it.
    #[must_use]
    pub fn attribute(&self, attribute: Attribute) -> Option<f64> {
        match attribute {
            Attribute::Price => self.price,
            Attribute::AreaM2 => self.area_m2,
            Attribute::Bedrooms => self.bedrooms.map(f64::from),
            Attribute::Bathrooms => self.bathrooms.map(f64::from),
        }
    }

    /// Check that the listing can be placed in the proximity index.
    ///
    /// # Errors
    /// Returns [`LocationError`] when the coordinate is unusable.
    pub fn validate(&self) -> Result<(), LocationError> {
        validate_location(self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Attribute::Price, Some(1_000.0))]
    #[case(Attribute::AreaM2, Some(54.5))]
    #[case(Attribute::Bedrooms, Some(3.0))]
    #[case(Attribute::Bathrooms, None)]
    fn reads_attributes(#[case] attribute: Attribute, #[case] expected: Option<f64>) {
        let property = Property::new(PropertyId(1), Coord { x: 0.0, y: 0.0 })
            .with_price(1_000.0)
            .with_area(54.5)
            .with_bedrooms(3);
        assert_eq!(property.attribute(attribute), expected);
    }

    #[rstest]
    fn validate_rejects_bad_coordinates() {
        let property = Property::new(PropertyId(1), Coord { x: 200.0, y: 0.0 });
        assert!(property.validate().is_err());
    }
}
