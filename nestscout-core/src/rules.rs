//! Typed scoring rules.
//!
//! Each rule carries a weight and a [`RuleKind`] payload whose shape is
//! checked once, when the rule is built. Evaluation can then trust the
//! parameters without re-validating them.

use thiserror::Error;

use crate::{Attribute, CategoryId, RuleId, SignalKind};

/// Rule type tags as submitted by the profile-management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum RuleType {
    /// Distance to the nearest POI of a category.
    PoiProximity,
    /// Number of POIs of a category within a radius.
    PoiDensity,
    /// Fit of a numeric listing attribute to an ideal range.
    PropertyAttr,
    /// Combined proximity across several categories.
    Walkability,
    /// Externally predicted description sentiment.
    AiSentiment,
    /// Externally predicted price value.
    PriceValue,
}

impl RuleType {
    /// Return the tag as a lowercase `&str`.
    ///
    /// # Examples
    /// ```
    /// use nestscout_core::RuleType;
    ///
    /// assert_eq!(RuleType::PoiDensity.as_str(), "poi_density");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PoiProximity => "poi_proximity",
            Self::PoiDensity => "poi_density",
            Self::PropertyAttr => "property_attr",
            Self::Walkability => "walkability",
            Self::AiSentiment => "ai_sentiment",
            Self::PriceValue => "price_value",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poi_proximity" => Ok(Self::PoiProximity),
            "poi_density" => Ok(Self::PoiDensity),
            "property_attr" => Ok(Self::PropertyAttr),
            "walkability" => Ok(Self::Walkability),
            "ai_sentiment" => Ok(Self::AiSentiment),
            "price_value" => Ok(Self::PriceValue),
            _ => Err(ValidationError::UnknownRuleType {
                rule_type: s.to_owned(),
            }),
        }
    }
}

/// One category inside a walkability rule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WalkTarget {
    /// Category whose nearest POI is measured.
    pub category: CategoryId,
    /// Relative importance; normalized by the sum across targets.
    pub weight: f64,
}

/// Type-specific rule parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// `1 − d / max_distance_m` for the nearest POI, `0` when none is in range.
    PoiProximity {
        /// Category to look up.
        category: CategoryId,
        /// Distance at which the contribution reaches zero.
        max_distance_m: f64,
    },
    /// `min(count / target_count, 1)` over POIs within `radius_m`.
    PoiDensity {
        /// Category to count.
        category: CategoryId,
        /// Counting radius.
        radius_m: f64,
        /// Count at which the contribution saturates.
        target_count: u32,
    },
    /// `1` inside the ideal range, decaying linearly over `tolerance` outside.
    PropertyAttr {
        /// Listing attribute to inspect.
        attribute: Attribute,
        /// Lower bound of the ideal range.
        ideal_min: f64,
        /// Upper bound of the ideal range.
        ideal_max: f64,
        /// Distance outside the range at which the contribution reaches zero.
        tolerance: f64,
    },
    /// Sub-weighted mean of per-category proximity scores.
    Walkability {
        /// Categories and their sub-weights.
        targets: Vec<WalkTarget>,
        /// Distance at which each per-category score reaches zero.
        max_distance_m: f64,
    },
    /// A value published by a prediction collaborator.
    ExternalSignal {
        /// Which prediction to read.
        signal: SignalKind,
    },
}

impl RuleKind {
    /// Return the submission tag for this payload.
    #[must_use]
    pub const fn rule_type(&self) -> RuleType {
        match self {
            Self::PoiProximity { .. } => RuleType::PoiProximity,
            Self::PoiDensity { .. } => RuleType::PoiDensity,
            Self::PropertyAttr { .. } => RuleType::PropertyAttr,
            Self::Walkability { .. } => RuleType::Walkability,
            Self::ExternalSignal {
                signal: SignalKind::AiSentiment,
            } => RuleType::AiSentiment,
            Self::ExternalSignal {
                signal: SignalKind::PriceValue,
            } => RuleType::PriceValue,
        }
    }

    /// Categories this rule reads, paired with the radius it needs indexed.
    #[must_use]
    pub fn category_radii(&self) -> Vec<(CategoryId, f64)> {
        match self {
            Self::PoiProximity {
                category,
                max_distance_m,
            } => vec![(*category, *max_distance_m)],
            Self::PoiDensity {
                category, radius_m, ..
            } => vec![(*category, *radius_m)],
            Self::Walkability {
                targets,
                max_distance_m,
            } => targets
                .iter()
                .map(|target| (target.category, *max_distance_m))
                .collect(),
            Self::PropertyAttr { .. } | Self::ExternalSignal { .. } => Vec::new(),
        }
    }

    /// Report whether the rule reads POIs of `category`.
    #[must_use]
    pub fn references_category(&self, category: CategoryId) -> bool {
        self.category_radii().iter().any(|(c, _)| *c == category)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::PoiProximity { max_distance_m, .. } => ensure_distance(*max_distance_m),
            Self::PoiDensity {
                radius_m,
                target_count,
                ..
            } => {
                ensure_distance(*radius_m)?;
                if *target_count == 0 {
                    return Err(ValidationError::InvalidTargetCount);
                }
                Ok(())
            }
            Self::PropertyAttr {
                ideal_min,
                ideal_max,
                tolerance,
                ..
            } => {
                if !ideal_min.is_finite() || !ideal_max.is_finite() || ideal_min > ideal_max {
                    return Err(ValidationError::InvalidRange {
                        min: *ideal_min,
                        max: *ideal_max,
                    });
                }
                if !tolerance.is_finite() || *tolerance < 0.0 {
                    return Err(ValidationError::InvalidTolerance { value: *tolerance });
                }
                Ok(())
            }
            Self::Walkability {
                targets,
                max_distance_m,
            } => {
                ensure_distance(*max_distance_m)?;
                validate_walk_targets(targets)
            }
            Self::ExternalSignal { .. } => Ok(()),
        }
    }
}

fn ensure_distance(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidDistance { value })
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "sub-weights must have a positive sum"
)]
fn validate_walk_targets(targets: &[WalkTarget]) -> Result<(), ValidationError> {
    if targets.is_empty() {
        return Err(ValidationError::EmptyWalkability);
    }
    let mut total = 0.0_f64;
    for target in targets {
        if !target.weight.is_finite() || target.weight < 0.0 {
            return Err(ValidationError::InvalidSubWeights);
        }
        total += target.weight;
    }
    if total <= 0.0 {
        return Err(ValidationError::InvalidSubWeights);
    }
    Ok(())
}

/// Errors raised when a rule set is submitted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The rule type tag is not one the engine understands.
    #[error("unknown rule type '{rule_type}'")]
    UnknownRuleType {
        /// Tag as submitted.
        rule_type: String,
    },
    /// A category-based rule did not name its category.
    #[error("{rule_type} rules require a POI category")]
    MissingCategory {
        /// Tag of the offending rule.
        rule_type: RuleType,
    },
    /// An attribute rule did not name its attribute or ideal value.
    #[error("{rule_type} rules require the '{parameter}' parameter")]
    MissingParameter {
        /// Tag of the offending rule.
        rule_type: RuleType,
        /// Name of the absent parameter.
        parameter: &'static str,
    },
    /// The parameter payload could not be decoded for the rule type.
    #[cfg(feature = "serde")]
    #[error("malformed parameters for {rule_type} rule: {source}")]
    MalformedParameters {
        /// Tag of the offending rule.
        rule_type: RuleType,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The rule weight fell outside `[0, 1]`.
    #[error("rule weight must be between 0.0 and 1.0, got {weight}")]
    WeightOutOfRange {
        /// Weight as supplied.
        weight: f64,
    },
    /// A distance or radius was not a positive number of metres.
    #[error("distance must be a positive number of metres, got {value}")]
    InvalidDistance {
        /// Distance as supplied.
        value: f64,
    },
    /// A density rule asked for zero POIs.
    #[error("density target count must be at least one")]
    InvalidTargetCount,
    /// An attribute range was empty, inverted or not finite.
    #[error("ideal range [{min}, {max}] is invalid")]
    InvalidRange {
        /// Lower bound as supplied.
        min: f64,
        /// Upper bound as supplied.
        max: f64,
    },
    /// An attribute tolerance was negative or not finite.
    #[error("tolerance must be a non-negative number, got {value}")]
    InvalidTolerance {
        /// Tolerance as supplied.
        value: f64,
    },
    /// A walkability rule listed no categories.
    #[error("walkability rules require at least one category")]
    EmptyWalkability,
    /// Walkability sub-weights were negative, not finite, or summed to zero.
    #[error("walkability sub-weights must be non-negative with a positive sum")]
    InvalidSubWeights,
    /// Two rules in one profile share an identifier.
    #[error("rule id {id} appears more than once")]
    DuplicateRuleId {
        /// Repeated identifier.
        id: RuleId,
    },
    /// The rule references a category the engine has not registered.
    #[error("rule {rule} references unknown category {category}")]
    UnknownCategory {
        /// Offending rule.
        rule: RuleId,
        /// Missing category.
        category: CategoryId,
    },
    /// The rule needs POIs further away than the category indexes.
    #[error(
        "rule {rule} needs {requested_m} m for category {category}, which indexes up to {indexed_m} m"
    )]
    RadiusExceedsIndex {
        /// Offending rule.
        rule: RuleId,
        /// Category whose radius is too small.
        category: CategoryId,
        /// Radius the rule asked for.
        requested_m: f64,
        /// Radius the index maintains.
        indexed_m: f64,
    },
}

/// A validated, weighted scoring rule.
///
/// # Examples
/// ```
/// use nestscout_core::{CategoryId, RuleId, RuleKind, ScoringRule};
///
/// # fn main() -> Result<(), nestscout_core::ValidationError> {
/// let rule = ScoringRule::new(
///     RuleId(1),
///     0.3,
///     RuleKind::PoiProximity { category: CategoryId(1), max_distance_m: 1_000.0 },
/// )?;
/// assert!(rule.is_active());
/// assert!(ScoringRule::new(RuleId(2), 1.5, rule.kind().clone()).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "crate::RuleSpec", into = "crate::RuleSpec")
)]
pub struct ScoringRule {
    id: RuleId,
    weight: f64,
    active: bool,
    kind: RuleKind,
}

impl ScoringRule {
    /// Validates and constructs an active [`ScoringRule`].
    ///
    /// # Errors
    /// Returns [`ValidationError`] when the weight is outside `[0, 1]` or the
    /// payload parameters are malformed.
    pub fn new(id: RuleId, weight: f64, kind: RuleKind) -> Result<Self, ValidationError> {
        if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
            return Err(ValidationError::WeightOutOfRange { weight });
        }
        kind.validate()?;
        Ok(Self {
            id,
            weight,
            active: true,
            kind,
        })
    }

    /// Return a copy with the active flag set to `active`.
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Rule identifier.
    #[must_use]
    pub const fn id(&self) -> RuleId {
        self.id
    }

    /// Weight in `[0, 1]`.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Whether the aggregator should include the rule.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Type-specific parameters.
    #[must_use]
    pub const fn kind(&self) -> &RuleKind {
        &self.kind
    }
}
