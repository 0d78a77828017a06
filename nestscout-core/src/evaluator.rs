//! Evaluate one scoring rule for one property.
//!
//! Evaluation is pure: the same rule, property, proximity facts and signal
//! snapshot always produce the same [`RuleOutcome`]. Rule parameters were
//! validated when the rule was built, so the only failure left is a rule
//! that names a category the index does not know.

use thiserror::Error;

use crate::{
    Attribute, CategoryId, Property, ProximityFacts, RuleId, RuleKind, ScoringRule,
    SignalSnapshot, WalkTarget,
};

/// Result of evaluating a single rule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuleOutcome {
    /// Normalized value in `[0, 1]`.
    pub value: f64,
    /// Set when an external signal has not been published yet.
    pub pending: bool,
}

impl RuleOutcome {
    /// An outcome backed by available data.
    #[must_use]
    pub const fn ready(value: f64) -> Self {
        Self {
            value,
            pending: false,
        }
    }

    /// A zero outcome waiting on an external signal.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            value: 0.0,
            pending: true,
        }
    }
}

/// Errors raised while evaluating a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleConfigError {
    /// The rule reads a category the proximity index has never registered.
    #[error("rule {rule} reads unknown category {category}")]
    UnknownCategory {
        /// Offending rule.
        rule: RuleId,
        /// Missing category.
        category: CategoryId,
    },
}

/// Turn one rule into a normalized value.
///
/// Implementations must be thread-safe so workers can share one evaluator.
/// Returned values must be finite and lie in `0.0..=1.0`; use
/// [`RuleEvaluator::sanitise`] to apply these guards.
///
/// # Examples
///
/// ```rust
/// use geo::Coord;
/// use nestscout_core::{
///     Attribute, Property, PropertyId, ProximitySnapshot, RuleEvaluator, RuleId, RuleKind,
///     ScoringRule, SignalSnapshot, StandardEvaluator,
/// };
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rule = ScoringRule::new(
///     RuleId(1),
///     1.0,
///     RuleKind::PropertyAttr {
///         attribute: Attribute::Bedrooms,
///         ideal_min: 3.0,
///         ideal_max: 4.0,
///         tolerance: 2.0,
///     },
/// )?;
/// let flat = Property::new(PropertyId(1), Coord { x: 0.0, y: 0.0 }).with_bedrooms(2);
/// let facts = ProximitySnapshot::new(PropertyId(1), []);
/// let outcome = StandardEvaluator.evaluate(&rule, &flat, &facts, &SignalSnapshot::new())?;
/// assert_eq!(outcome.value, 0.5);
/// # Ok(())
/// # }
/// ```
pub trait RuleEvaluator: Send + Sync {
    /// Evaluate `rule` for `property`.
    ///
    /// # Errors
    /// Returns [`RuleConfigError`] when the rule cannot be evaluated against
    /// the current category set.
    fn evaluate(
        &self,
        rule: &ScoringRule,
        property: &Property,
        facts: &dyn ProximityFacts,
        signals: &SignalSnapshot,
    ) -> Result<RuleOutcome, RuleConfigError>;

    /// Clamp and validate a raw value.
    ///
    /// Returns `0.0` for non-finite values and clamps to `0.0..=1.0`.
    fn sanitise(value: f64) -> f64
    where
        Self: Sized,
    {
        if !value.is_finite() {
            return 0.0;
        }
        value.clamp(0.0, 1.0)
    }
}

/// Evaluator implementing the built-in rule formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEvaluator;

impl RuleEvaluator for StandardEvaluator {
    fn evaluate(
        &self,
        rule: &ScoringRule,
        property: &Property,
        facts: &dyn ProximityFacts,
        signals: &SignalSnapshot,
    ) -> Result<RuleOutcome, RuleConfigError> {
        let known = |category: CategoryId| {
            if facts.knows_category(category) {
                Ok(())
            } else {
                Err(RuleConfigError::UnknownCategory {
                    rule: rule.id(),
                    category,
                })
            }
        };
        let value = match rule.kind() {
            RuleKind::PoiProximity {
                category,
                max_distance_m,
            } => {
                known(*category)?;
                proximity_value(facts, property, *category, *max_distance_m)
            }
            RuleKind::PoiDensity {
                category,
                radius_m,
                target_count,
            } => {
                known(*category)?;
                let count = facts.within(property.id, *category, *radius_m).len();
                density_value(count, *target_count)
            }
            RuleKind::PropertyAttr {
                attribute,
                ideal_min,
                ideal_max,
                tolerance,
            } => attribute_value(property, *attribute, *ideal_min, *ideal_max, *tolerance),
            RuleKind::Walkability {
                targets,
                max_distance_m,
            } => {
                for target in targets {
                    known(target.category)?;
                }
                walkability_value(facts, property, targets, *max_distance_m)
            }
            RuleKind::ExternalSignal { signal } => {
                return Ok(signals.get(*signal).map_or_else(RuleOutcome::pending, |raw| {
                    RuleOutcome::ready(Self::sanitise(raw))
                }));
            }
        };
        Ok(RuleOutcome::ready(Self::sanitise(value)))
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "proximity decays linearly with distance"
)]
fn proximity_value(
    facts: &dyn ProximityFacts,
    property: &Property,
    category: CategoryId,
    max_distance_m: f64,
) -> f64 {
    facts
        .nearest(property.id, category)
        .filter(|record| record.distance_m <= max_distance_m)
        .map_or(0.0, |record| 1.0 - record.distance_m / max_distance_m)
}

#[expect(
    clippy::float_arithmetic,
    reason = "density saturates at the target count"
)]
fn density_value(count: usize, target_count: u32) -> f64 {
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    (f64::from(count) / f64::from(target_count.max(1))).min(1.0)
}

#[expect(
    clippy::float_arithmetic,
    reason = "attribute fit decays linearly outside the ideal range"
)]
fn attribute_value(
    property: &Property,
    attribute: Attribute,
    ideal_min: f64,
    ideal_max: f64,
    tolerance: f64,
) -> f64 {
    let Some(actual) = property.attribute(attribute).filter(|v| v.is_finite()) else {
        return 0.0;
    };
    let gap = if actual < ideal_min {
        ideal_min - actual
    } else if actual > ideal_max {
        actual - ideal_max
    } else {
        return 1.0;
    };
    if tolerance <= 0.0 {
        return 0.0;
    }
    (1.0 - gap / tolerance).max(0.0)
}

#[expect(
    clippy::float_arithmetic,
    reason = "walkability is a weighted mean of proximity values"
)]
fn walkability_value(
    facts: &dyn ProximityFacts,
    property: &Property,
    targets: &[WalkTarget],
    max_distance_m: f64,
) -> f64 {
    let (weighted, total) = targets.iter().fold((0.0, 0.0), |(sum, weights), target| {
        let value = proximity_value(facts, property, target.category, max_distance_m);
        (sum + value * target.weight, weights + target.weight)
    });
    if total > 0.0 { weighted / total } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PoiId, PropertyId, ProximitySnapshot, SignalKind};
    use geo::Coord;
    use rstest::{fixture, rstest};

    const SCHOOL: CategoryId = CategoryId(1);
    const PARK: CategoryId = CategoryId(2);

    #[fixture]
    fn property() -> Property {
        Property::new(PropertyId(1), Coord { x: 0.0, y: 0.0 })
            .with_price(300_000.0)
            .with_bedrooms(3)
    }

    #[fixture]
    fn facts() -> ProximitySnapshot {
        ProximitySnapshot::new(PropertyId(1), [SCHOOL, PARK])
            .with_record(PoiId(1), SCHOOL, 400.0)
            .with_record(PoiId(2), SCHOOL, 900.0)
            .with_record(PoiId(3), SCHOOL, 1_200.0)
    }

    fn evaluate(kind: RuleKind, property: &Property, facts: &ProximitySnapshot) -> RuleOutcome {
        let rule = ScoringRule::new(RuleId(1), 1.0, kind).expect("valid rule");
        StandardEvaluator
            .evaluate(&rule, property, facts, &SignalSnapshot::new())
            .expect("known categories")
    }

    #[rstest]
    #[case(1_000.0, 0.6)]
    #[case(400.0, 0.0)]
    #[case(300.0, 0.0)]
    #[expect(clippy::float_arithmetic, reason = "tolerance comparison")]
    fn proximity_decays_with_distance(
        property: Property,
        facts: ProximitySnapshot,
        #[case] max_distance_m: f64,
        #[case] expected: f64,
    ) {
        let outcome = evaluate(
            RuleKind::PoiProximity {
                category: SCHOOL,
                max_distance_m,
            },
            &property,
            &facts,
        );
        assert!((outcome.value - expected).abs() < 1e-9, "got {}", outcome.value);
    }

    #[rstest]
    fn proximity_without_pois_is_zero(property: Property, facts: ProximitySnapshot) {
        let outcome = evaluate(
            RuleKind::PoiProximity {
                category: PARK,
                max_distance_m: 1_000.0,
            },
            &property,
            &facts,
        );
        assert_eq!(outcome, RuleOutcome::ready(0.0));
    }

    #[rstest]
    #[case(1_000.0, 5, 0.4)]
    #[case(1_000.0, 2, 1.0)]
    #[case(100.0, 5, 0.0)]
    fn density_counts_within_radius(
        property: Property,
        facts: ProximitySnapshot,
        #[case] radius_m: f64,
        #[case] target_count: u32,
        #[case] expected: f64,
    ) {
        let outcome = evaluate(
            RuleKind::PoiDensity {
                category: SCHOOL,
                radius_m,
                target_count,
            },
            &property,
            &facts,
        );
        assert_eq!(outcome.value, expected);
    }

    #[rstest]
    #[case(3.0, 4.0, 0.0, 1.0)]
    #[case(1.0, 1.0, 0.0, 0.0)]
    #[case(4.0, 5.0, 2.0, 0.5)]
    #[case(5.0, 6.0, 1.0, 0.0)]
    fn attribute_fit(
        property: Property,
        facts: ProximitySnapshot,
        #[case] ideal_min: f64,
        #[case] ideal_max: f64,
        #[case] tolerance: f64,
        #[case] expected: f64,
    ) {
        let outcome = evaluate(
            RuleKind::PropertyAttr {
                attribute: Attribute::Bedrooms,
                ideal_min,
                ideal_max,
                tolerance,
            },
            &property,
            &facts,
        );
        assert_eq!(outcome.value, expected);
    }

    #[rstest]
    fn missing_attribute_scores_zero(property: Property, facts: ProximitySnapshot) {
        let outcome = evaluate(
            RuleKind::PropertyAttr {
                attribute: Attribute::AreaM2,
                ideal_min: 40.0,
                ideal_max: 80.0,
                tolerance: 20.0,
            },
            &property,
            &facts,
        );
        assert_eq!(outcome.value, 0.0);
    }

    #[rstest]
    #[expect(clippy::float_arithmetic, reason = "tolerance comparison")]
    fn walkability_is_a_weighted_mean(property: Property, facts: ProximitySnapshot) {
        let outcome = evaluate(
            RuleKind::Walkability {
                targets: vec![
                    WalkTarget {
                        category: SCHOOL,
                        weight: 3.0,
                    },
                    WalkTarget {
                        category: PARK,
                        weight: 1.0,
                    },
                ],
                max_distance_m: 1_000.0,
            },
            &property,
            &facts,
        );
        // School scores 0.6, park has no POI.
        assert!((outcome.value - 0.45).abs() < 1e-9, "got {}", outcome.value);
    }

    #[rstest]
    fn unknown_category_is_a_config_error(property: Property, facts: ProximitySnapshot) {
        let rule = ScoringRule::new(
            RuleId(7),
            0.5,
            RuleKind::PoiDensity {
                category: CategoryId(42),
                radius_m: 500.0,
                target_count: 3,
            },
        )
        .expect("valid rule");
        let result = StandardEvaluator.evaluate(&rule, &property, &facts, &SignalSnapshot::new());
        assert_eq!(
            result,
            Err(RuleConfigError::UnknownCategory {
                rule: RuleId(7),
                category: CategoryId(42),
            })
        );
    }

    #[rstest]
    #[case(None, RuleOutcome::pending())]
    #[case(Some(0.8), RuleOutcome::ready(0.8))]
    #[case(Some(1.7), RuleOutcome::ready(1.0))]
    #[case(Some(f64::NAN), RuleOutcome::ready(0.0))]
    fn external_signals_are_sanitised(
        property: Property,
        facts: ProximitySnapshot,
        #[case] published: Option<f64>,
        #[case] expected: RuleOutcome,
    ) {
        let mut signals = SignalSnapshot::new();
        if let Some(value) = published {
            signals.insert(SignalKind::AiSentiment, value);
        }
        let rule = ScoringRule::new(
            RuleId(1),
            0.5,
            RuleKind::ExternalSignal {
                signal: SignalKind::AiSentiment,
            },
        )
        .expect("valid rule");
        let outcome = StandardEvaluator
            .evaluate(&rule, &property, &facts, &signals)
            .expect("no categories involved");
        assert_eq!(outcome, expected);
    }
}
