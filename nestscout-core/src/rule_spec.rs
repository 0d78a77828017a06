//! Raw rule submissions and their conversion into typed rules.
//!
//! The profile-management API submits rules as a type tag, an optional
//! category, an optional distance and a free-form parameter object. This
//! module decodes those submissions into [`ScoringRule`] values, applying
//! the defaults the API has always used.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Attribute, CategoryId, RuleId, RuleKind, RuleType, ScoringRule, SignalKind, ValidationError,
    WalkTarget,
};

/// Distance used when a proximity, density or walkability rule omits one.
pub const DEFAULT_MAX_DISTANCE_M: f64 = 1_000.0;

/// Count at which a density rule saturates when none is given.
pub const DEFAULT_TARGET_COUNT: u32 = 5;

/// A rule exactly as submitted by a client.
///
/// # Examples
/// ```
/// use nestscout_core::{RuleKind, RuleSpec, ScoringRule};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let spec: RuleSpec = serde_json::from_str(
///     r#"{"id": 3, "rule_type": "poi_density", "poi_category_id": 2, "weight": 0.5}"#,
/// )?;
/// let rule = ScoringRule::try_from(spec)?;
/// assert!(matches!(
///     rule.kind(),
///     RuleKind::PoiDensity { target_count: 5, radius_m, .. } if *radius_m == 1_000.0
/// ));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule identifier.
    pub id: RuleId,
    /// Type tag such as `poi_proximity`.
    pub rule_type: String,
    /// Category for proximity and density rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poi_category_id: Option<CategoryId>,
    /// Distance bound for proximity, density and walkability rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_m: Option<f64>,
    /// Weight in `[0, 1]`.
    pub weight: f64,
    /// Type-specific parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Whether the rule participates in aggregation.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct DensityParams {
    #[serde(default)]
    target_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AttrParams {
    #[serde(default)]
    attribute: Option<Attribute>,
    #[serde(default)]
    ideal: Option<f64>,
    #[serde(default)]
    ideal_min: Option<f64>,
    #[serde(default)]
    ideal_max: Option<f64>,
    #[serde(default)]
    tolerance: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WalkEntry {
    Plain(CategoryId),
    Weighted { category: CategoryId, weight: f64 },
}

impl From<WalkEntry> for WalkTarget {
    fn from(entry: WalkEntry) -> Self {
        match entry {
            WalkEntry::Plain(category) => Self {
                category,
                weight: 1.0,
            },
            WalkEntry::Weighted { category, weight } => Self { category, weight },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WalkParams {
    #[serde(default)]
    categories: Vec<WalkEntry>,
}

fn decode<T>(rule_type: RuleType, parameters: Option<Value>) -> Result<T, ValidationError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match parameters {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|source| ValidationError::MalformedParameters { rule_type, source }),
    }
}

fn attr_kind(params: AttrParams) -> Result<RuleKind, ValidationError> {
    let rule_type = RuleType::PropertyAttr;
    let attribute = params.attribute.ok_or(ValidationError::MissingParameter {
        rule_type,
        parameter: "attribute",
    })?;
    let (ideal_min, ideal_max) = match (params.ideal, params.ideal_min, params.ideal_max) {
        (Some(ideal), None, None) => (ideal, ideal),
        (None, Some(min), Some(max)) => (min, max),
        (None, Some(min), None) => (min, f64::MAX),
        (None, None, Some(max)) => (f64::MIN, max),
        (Some(_), _, _) => {
            return Err(ValidationError::MissingParameter {
                rule_type,
                parameter: "ideal or ideal_min/ideal_max, not both",
            });
        }
        (None, None, None) => {
            return Err(ValidationError::MissingParameter {
                rule_type,
                parameter: "ideal",
            });
        }
    };
    Ok(RuleKind::PropertyAttr {
        attribute,
        ideal_min,
        ideal_max,
        tolerance: params.tolerance.unwrap_or(0.0),
    })
}

impl TryFrom<RuleSpec> for ScoringRule {
    type Error = ValidationError;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        let rule_type: RuleType = spec.rule_type.parse()?;
        let distance = spec.max_distance_m.unwrap_or(DEFAULT_MAX_DISTANCE_M);
        let category = spec
            .poi_category_id
            .ok_or(ValidationError::MissingCategory { rule_type });
        let kind = match rule_type {
            RuleType::PoiProximity => RuleKind::PoiProximity {
                category: category?,
                max_distance_m: distance,
            },
            RuleType::PoiDensity => {
                let params: DensityParams = decode(rule_type, spec.parameters)?;
                RuleKind::PoiDensity {
                    category: category?,
                    radius_m: distance,
                    target_count: params.target_count.unwrap_or(DEFAULT_TARGET_COUNT),
                }
            }
            RuleType::PropertyAttr => attr_kind(decode(rule_type, spec.parameters)?)?,
            RuleType::Walkability => {
                let params: WalkParams = decode(rule_type, spec.parameters)?;
                RuleKind::Walkability {
                    targets: params.categories.into_iter().map(WalkTarget::from).collect(),
                    max_distance_m: distance,
                }
            }
            RuleType::AiSentiment => RuleKind::ExternalSignal {
                signal: SignalKind::AiSentiment,
            },
            RuleType::PriceValue => RuleKind::ExternalSignal {
                signal: SignalKind::PriceValue,
            },
        };
        Ok(Self::new(spec.id, spec.weight, kind)?.with_active(spec.active))
    }
}

impl From<ScoringRule> for RuleSpec {
    fn from(rule: ScoringRule) -> Self {
        let rule_type = rule.kind().rule_type().as_str().to_owned();
        let (poi_category_id, max_distance_m, parameters) = match rule.kind() {
            RuleKind::PoiProximity {
                category,
                max_distance_m,
            } => (Some(*category), Some(*max_distance_m), None),
            RuleKind::PoiDensity {
                category,
                radius_m,
                target_count,
            } => (
                Some(*category),
                Some(*radius_m),
                Some(serde_json::json!({ "target_count": target_count })),
            ),
            RuleKind::PropertyAttr {
                attribute,
                ideal_min,
                ideal_max,
                tolerance,
            } => (
                None,
                None,
                Some(serde_json::json!({
                    "attribute": attribute.as_str(),
                    "ideal_min": ideal_min,
                    "ideal_max": ideal_max,
                    "tolerance": tolerance,
                })),
            ),
            RuleKind::Walkability {
                targets,
                max_distance_m,
            } => {
                let categories: Vec<Value> = targets
                    .iter()
                    .map(|t| serde_json::json!({ "category": t.category, "weight": t.weight }))
                    .collect();
                (
                    None,
                    Some(*max_distance_m),
                    Some(serde_json::json!({ "categories": categories })),
                )
            }
            RuleKind::ExternalSignal { .. } => (None, None, None),
        };
        Self {
            id: rule.id(),
            rule_type,
            poi_category_id,
            max_distance_m,
            weight: rule.weight(),
            parameters,
            active: rule.is_active(),
        }
    }
}
