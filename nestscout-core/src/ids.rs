//! Strongly typed identifiers for engine entities.
//!
//! Every entity the engine tracks is keyed by a `u64` supplied by the
//! collaborator that owns it. Wrapping the raw value keeps property, POI,
//! category, profile and rule identifiers from being mixed up at call sites.

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[cfg_attr(
            feature = "serde",
            derive(serde::Serialize, serde::Deserialize),
            serde(transparent)
        )]
        pub struct $name(
            /// Raw identifier assigned by the owning collaborator.
            pub u64,
        );

        impl $name {
            /// Return the raw numeric identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a real-estate listing.
    PropertyId
);
entity_id!(
    /// Identifier of a point of interest.
    PoiId
);
entity_id!(
    /// Identifier of a POI category such as `school` or `metro`.
    CategoryId
);
entity_id!(
    /// Identifier of a user-owned search profile.
    ProfileId
);
entity_id!(
    /// Identifier of a scoring rule within a profile.
    RuleId
);

/// A (property, profile) combination with its own materialized score.
///
/// # Examples
/// ```
/// use nestscout_core::{ProfileId, PropertyId, ScorePair};
///
/// let pair = ScorePair::new(PropertyId(7), ProfileId(2));
/// assert_eq!(pair.to_string(), "property 7 / profile 2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScorePair {
    /// Scored listing.
    pub property: PropertyId,
    /// Profile whose rules produce the score.
    pub profile: ProfileId,
}

impl ScorePair {
    /// Build a pair from its parts.
    #[must_use]
    pub const fn new(property: PropertyId, profile: ProfileId) -> Self {
        Self { property, profile }
    }
}

impl std::fmt::Display for ScorePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "property {} / profile {}", self.property, self.profile)
    }
}
