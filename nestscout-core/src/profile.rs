//! Search profiles: a user's filters plus an ordered list of scoring rules.
//!
//! Filters narrow which listings appear in ranked reads. They never change
//! a score. Rules are the only input to aggregation.

use std::collections::{BTreeSet, HashSet};
use std::time::SystemTime;

use crate::{
    CategoryId, Operation, ProfileId, Property, RuleKind, ScoringRule, SignalKind,
    ValidationError,
};

/// Pre-filter applied to ranked reads.
///
/// Every bound is optional; an empty filter matches every listing. A bound
/// on an attribute the listing lacks rejects the listing.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use nestscout_core::{Property, PropertyFilter, PropertyId};
///
/// let filter = PropertyFilter {
///     max_price: Some(400_000.0),
///     city: Some("Lyon".into()),
///     ..PropertyFilter::default()
/// };
/// let flat = Property::new(PropertyId(1), Coord { x: 4.83, y: 45.76 })
///     .with_price(320_000.0)
///     .with_city("lyon");
/// assert!(filter.matches(&flat));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PropertyFilter {
    /// Inclusive lower price bound.
    pub min_price: Option<f64>,
    /// Inclusive upper price bound.
    pub max_price: Option<f64>,
    /// City name, compared case-insensitively.
    pub city: Option<String>,
    /// Minimum bedroom count.
    pub min_bedrooms: Option<u32>,
    /// Minimum living area in square metres.
    pub min_area_m2: Option<f64>,
    /// Required operation.
    pub operation: Option<Operation>,
}

impl PropertyFilter {
    /// Report whether `property` passes every bound.
    #[must_use]
    pub fn matches(&self, property: &Property) -> bool {
        let above = |bound: Option<f64>, value: Option<f64>| {
            bound.is_none_or(|min| value.is_some_and(|v| v >= min))
        };
        let below = |bound: Option<f64>, value: Option<f64>| {
            bound.is_none_or(|max| value.is_some_and(|v| v <= max))
        };
        let city_ok = self.city.as_ref().is_none_or(|wanted| {
            property
                .city
                .as_ref()
                .is_some_and(|city| city.eq_ignore_ascii_case(wanted))
        });
        above(self.min_price, property.price)
            && below(self.max_price, property.price)
            && above(self.min_area_m2, property.area_m2)
            && self
                .min_bedrooms
                .is_none_or(|min| property.bedrooms.is_some_and(|b| b >= min))
            && self.operation.is_none_or(|op| property.operation == op)
            && city_ok
    }

    /// Combine two filters so that a listing must satisfy both.
    ///
    /// Where both sides set the same bound the stricter one wins. Where both
    /// name a city or operation, `other` wins.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let stricter = |a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64| match (a, b) {
            (Some(x), Some(y)) => Some(pick(x, y)),
            (x, y) => x.or(y),
        };
        Self {
            min_price: stricter(self.min_price, other.min_price, f64::max),
            max_price: stricter(self.max_price, other.max_price, f64::min),
            city: other.city.clone().or_else(|| self.city.clone()),
            min_bedrooms: self.min_bedrooms.max(other.min_bedrooms),
            min_area_m2: stricter(self.min_area_m2, other.min_area_m2, f64::max),
            operation: other.operation.or(self.operation),
        }
    }
}

/// Reject rule lists that reuse an identifier.
///
/// # Errors
/// Returns [`ValidationError::DuplicateRuleId`] naming the first repeat.
pub fn check_rule_ids(rules: &[ScoringRule]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(rules.len());
    for rule in rules {
        if !seen.insert(rule.id()) {
            return Err(ValidationError::DuplicateRuleId { id: rule.id() });
        }
    }
    Ok(())
}

/// A user's named set of filters and scoring rules.
///
/// # Examples
/// ```
/// use nestscout_core::{CategoryId, ProfileId, RuleId, RuleKind, ScoringRule, SearchProfile};
///
/// # fn main() -> Result<(), nestscout_core::ValidationError> {
/// let school = ScoringRule::new(
///     RuleId(1),
///     0.6,
///     RuleKind::PoiProximity { category: CategoryId(1), max_distance_m: 800.0 },
/// )?;
/// let profile = SearchProfile::new(ProfileId(1), 42, "Family").with_rules(vec![school])?;
/// assert!(profile.references_category(CategoryId(1)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchProfile {
    /// Unique identifier.
    pub id: ProfileId,
    /// Identifier of the owning user.
    pub owner_id: u64,
    /// Display name.
    pub name: String,
    /// Ranked-read pre-filter.
    #[cfg_attr(feature = "serde", serde(default))]
    pub filters: PropertyFilter,
    /// Scoring rules in evaluation order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rules: Vec<ScoringRule>,
    /// Creation time.
    #[cfg_attr(feature = "serde", serde(default = "SystemTime::now"))]
    pub created_at: SystemTime,
    /// Time of the last rule or filter change.
    #[cfg_attr(feature = "serde", serde(default = "SystemTime::now"))]
    pub updated_at: SystemTime,
}

impl SearchProfile {
    /// Construct a profile with no rules and an empty filter.
    #[must_use]
    pub fn new(id: ProfileId, owner_id: u64, name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            owner_id,
            name: name.into(),
            filters: PropertyFilter::default(),
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the ranked-read filter.
    #[must_use]
    pub fn with_filters(mut self, filters: PropertyFilter) -> Self {
        self.filters = filters;
        self
    }

    /// Set the rule list while returning `self` for chaining.
    ///
    /// # Errors
    /// Returns [`ValidationError::DuplicateRuleId`] when two rules share an id.
    pub fn with_rules(mut self, rules: Vec<ScoringRule>) -> Result<Self, ValidationError> {
        self.replace_rules(rules)?;
        Ok(self)
    }

    /// Replace the rule list, bumping `updated_at`.
    ///
    /// # Errors
    /// Returns [`ValidationError::DuplicateRuleId`] when two rules share an
    /// id; the existing rules are kept.
    pub fn replace_rules(&mut self, rules: Vec<ScoringRule>) -> Result<(), ValidationError> {
        check_rule_ids(&rules)?;
        self.rules = rules;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// Iterate over rules that participate in aggregation.
    pub fn active_rules(&self) -> impl Iterator<Item = &ScoringRule> {
        self.rules.iter().filter(|rule| rule.is_active())
    }

    /// Categories read by active rules.
    #[must_use]
    pub fn referenced_categories(&self) -> BTreeSet<CategoryId> {
        self.active_rules()
            .flat_map(|rule| rule.kind().category_radii())
            .map(|(category, _)| category)
            .collect()
    }

    /// Report whether any active rule reads `category`.
    #[must_use]
    pub fn references_category(&self, category: CategoryId) -> bool {
        self.active_rules()
            .any(|rule| rule.kind().references_category(category))
    }

    /// Report whether any active rule reads the `signal` prediction.
    #[must_use]
    pub fn uses_signal(&self, signal: SignalKind) -> bool {
        self.active_rules().any(|rule| {
            matches!(rule.kind(), RuleKind::ExternalSignal { signal: s } if *s == signal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attribute, PropertyId, RuleId};
    use geo::Coord;
    use rstest::{fixture, rstest};

    #[fixture]
    fn flat() -> Property {
        Property::new(PropertyId(1), Coord { x: 0.0, y: 0.0 })
            .with_price(250_000.0)
            .with_area(60.0)
            .with_bedrooms(2)
            .with_city("Paris")
    }

    #[rstest]
    #[case(PropertyFilter::default(), true)]
    #[case(PropertyFilter { max_price: Some(200_000.0), ..PropertyFilter::default() }, false)]
    #[case(PropertyFilter { min_price: Some(250_000.0), ..PropertyFilter::default() }, true)]
    #[case(PropertyFilter { city: Some("PARIS".into()), ..PropertyFilter::default() }, true)]
    #[case(PropertyFilter { city: Some("Nantes".into()), ..PropertyFilter::default() }, false)]
    #[case(PropertyFilter { min_bedrooms: Some(3), ..PropertyFilter::default() }, false)]
    #[case(PropertyFilter { operation: Some(Operation::Rent), ..PropertyFilter::default() }, false)]
    fn filter_bounds(flat: Property, #[case] filter: PropertyFilter, #[case] expected: bool) {
        assert_eq!(filter.matches(&flat), expected);
    }

    #[rstest]
    fn filter_rejects_missing_attribute() {
        let bare = Property::new(PropertyId(2), Coord { x: 0.0, y: 0.0 });
        let filter = PropertyFilter {
            min_area_m2: Some(20.0),
            ..PropertyFilter::default()
        };
        assert!(!filter.matches(&bare));
    }

    #[rstest]
    fn combined_filter_keeps_the_stricter_bound() {
        let profile_filter = PropertyFilter {
            max_price: Some(300_000.0),
            ..PropertyFilter::default()
        };
        let call_filter = PropertyFilter {
            max_price: Some(200_000.0),
            min_bedrooms: Some(1),
            ..PropertyFilter::default()
        };
        let combined = profile_filter.and(&call_filter);
        assert_eq!(combined.max_price, Some(200_000.0));
        assert_eq!(combined.min_bedrooms, Some(1));
    }

    #[rstest]
    fn duplicate_rule_ids_are_rejected() {
        let kind = RuleKind::PropertyAttr {
            attribute: Attribute::Bedrooms,
            ideal_min: 2.0,
            ideal_max: 3.0,
            tolerance: 1.0,
        };
        let rules = vec![
            ScoringRule::new(RuleId(1), 0.5, kind.clone()).expect("valid rule"),
            ScoringRule::new(RuleId(1), 0.5, kind).expect("valid rule"),
        ];
        let result = SearchProfile::new(ProfileId(1), 1, "dup").with_rules(rules);
        assert!(matches!(
            result,
            Err(ValidationError::DuplicateRuleId { id: RuleId(1) })
        ));
    }

    #[rstest]
    fn inactive_rules_do_not_reference_categories() {
        let rule = ScoringRule::new(
            RuleId(1),
            0.5,
            RuleKind::PoiProximity {
                category: CategoryId(9),
                max_distance_m: 500.0,
            },
        )
        .expect("valid rule")
        .with_active(false);
        let profile = SearchProfile::new(ProfileId(1), 1, "quiet")
            .with_rules(vec![rule])
            .expect("unique ids");
        assert!(!profile.references_category(CategoryId(9)));
        assert!(profile.referenced_categories().is_empty());
    }
}
