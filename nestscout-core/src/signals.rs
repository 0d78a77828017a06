//! Precomputed values supplied by prediction collaborators.
//!
//! The engine never runs the models itself. A collaborator publishes one
//! value per (property, signal kind) and the evaluator reads it from a
//! [`SignalSnapshot`].
//!
//! # Examples
//! ```
//! use nestscout_core::SignalKind;
//!
//! assert_eq!(SignalKind::AiSentiment.as_str(), "ai_sentiment");
//! assert_eq!(SignalKind::PriceValue.to_string(), "price_value");
//! ```

use std::collections::BTreeMap;

/// Kinds of external prediction the engine can score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum SignalKind {
    /// Sentiment extracted from the listing description.
    AiSentiment,
    /// Predicted value-for-money of the asking price.
    PriceValue,
}

impl SignalKind {
    /// Return the signal as a lowercase `&str`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AiSentiment => "ai_sentiment",
            Self::PriceValue => "price_value",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ai_sentiment" => Ok(Self::AiSentiment),
            "price_value" => Ok(Self::PriceValue),
            _ => Err(format!("unknown signal '{s}'")),
        }
    }
}

/// Signal values known for one property at a point in time.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalSnapshot {
    values: BTreeMap<SignalKind, f64>,
}

impl SignalSnapshot {
    /// Construct an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value for `kind`, if the collaborator produced one.
    #[must_use]
    pub fn get(&self, kind: SignalKind) -> Option<f64> {
        self.values.get(&kind).copied()
    }

    /// Record or replace a value.
    pub fn insert(&mut self, kind: SignalKind, value: f64) {
        self.values.insert(kind, value);
    }

    /// Record a value while returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, kind: SignalKind, value: f64) -> Self {
        self.insert(kind, value);
        self
    }

    /// Report whether no values are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
