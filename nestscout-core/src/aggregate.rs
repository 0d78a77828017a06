//! Combine rule outcomes into a 0–100 score with a per-rule breakdown.

use crate::{
    Property, ProximityFacts, RuleConfigError, RuleEvaluator, RuleId, RuleType, SearchProfile,
    SignalSnapshot, StandardEvaluator,
};

/// Upper bound of a composite score.
pub const MAX_SCORE: f64 = 100.0;

/// One rule's share of a composite score.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuleContribution {
    /// Rule identifier.
    pub rule: RuleId,
    /// Rule type tag.
    pub rule_type: RuleType,
    /// Evaluated value in `[0, 1]`.
    pub raw_value: f64,
    /// Rule weight.
    pub weight: f64,
    /// `raw_value × weight`.
    pub contribution: f64,
    /// Set when the value waits on an external signal.
    pub pending: bool,
}

/// Composite score plus breakdown for one (property, profile) pair.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoreCard {
    /// Total in `[0, 100]`, rounded to two decimals.
    pub total: f64,
    /// Contributions in profile rule order.
    pub breakdown: Vec<RuleContribution>,
}

impl ScoreCard {
    /// A zero score with no breakdown.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            total: 0.0,
            breakdown: Vec::new(),
        }
    }

    /// Report whether any contribution waits on an external signal.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.breakdown.iter().any(|c| c.pending)
    }
}

/// Weighted, normalized aggregation over a profile's active rules.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use nestscout_core::{
///     Aggregator, Attribute, ProfileId, Property, PropertyId, ProximitySnapshot, RuleId,
///     RuleKind, ScoringRule, SearchProfile, SignalSnapshot,
/// };
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rule = ScoringRule::new(
///     RuleId(1),
///     0.5,
///     RuleKind::PropertyAttr {
///         attribute: Attribute::Bedrooms,
///         ideal_min: 2.0,
///         ideal_max: 3.0,
///         tolerance: 0.0,
///     },
/// )?;
/// let profile = SearchProfile::new(ProfileId(1), 1, "couple").with_rules(vec![rule])?;
/// let flat = Property::new(PropertyId(1), Coord { x: 0.0, y: 0.0 }).with_bedrooms(2);
/// let facts = ProximitySnapshot::new(PropertyId(1), []);
///
/// let card = Aggregator::new().compute(&flat, &profile, &facts, &SignalSnapshot::new())?;
/// assert_eq!(card.total, 100.0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Aggregator<E = StandardEvaluator> {
    evaluator: E,
}

impl Aggregator {
    /// Aggregate with the built-in formulas.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            evaluator: StandardEvaluator,
        }
    }
}

impl<E: RuleEvaluator> Aggregator<E> {
    /// Aggregate with a custom evaluator.
    pub const fn with_evaluator(evaluator: E) -> Self {
        Self { evaluator }
    }

    /// Score `property` against every active rule of `profile`.
    ///
    /// When the active weights sum to zero the result is
    /// [`ScoreCard::empty`].
    ///
    /// # Errors
    /// Propagates the first [`RuleConfigError`] raised by a rule.
    #[expect(
        clippy::float_arithmetic,
        reason = "aggregation is a weighted mean scaled to 0–100"
    )]
    pub fn compute(
        &self,
        property: &Property,
        profile: &SearchProfile,
        facts: &dyn ProximityFacts,
        signals: &SignalSnapshot,
    ) -> Result<ScoreCard, RuleConfigError> {
        let mut weighted = 0.0_f64;
        let mut weights = 0.0_f64;
        let mut breakdown = Vec::with_capacity(profile.rules.len());
        for rule in profile.active_rules() {
            let outcome = self.evaluator.evaluate(rule, property, facts, signals)?;
            let contribution = outcome.value * rule.weight();
            weighted += contribution;
            weights += rule.weight();
            breakdown.push(RuleContribution {
                rule: rule.id(),
                rule_type: rule.kind().rule_type(),
                raw_value: outcome.value,
                weight: rule.weight(),
                contribution,
                pending: outcome.pending,
            });
        }
        if weights <= 0.0 {
            return Ok(ScoreCard::empty());
        }
        let total = (MAX_SCORE * weighted / weights).clamp(0.0, MAX_SCORE);
        Ok(ScoreCard {
            total: round_cents(total),
            breakdown,
        })
    }
}

#[expect(clippy::float_arithmetic, reason = "rounding to two decimals")]
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
