//! Property-based tests for evaluation, aggregation and the proximity index.
//!
//! # Invariants tested
//!
//! - **Rule range:** every rule value is finite and lies in `[0, 1]`.
//! - **Score range:** every composite total lies in `[0, 100]`.
//! - **Zero weights:** a profile whose active weights sum to zero scores `0`.
//! - **Order independence:** incremental upserts in any order produce the
//!   same records as any other order.
//! - **Determinism:** computing a pair twice, or over the same facts listed
//!   in another order, yields an identical score card; nearest-POI ties
//!   resolve to the lowest POI id.
#![expect(
    clippy::expect_used,
    clippy::float_arithmetic,
    reason = "tests fail fast on setup errors and derive float bounds"
)]

use geo::Coord;
use nestscout_core::distance::offset_m;
use nestscout_core::{
    Aggregator, Attribute, CategoryId, Poi, PoiCategory, PoiId, ProfileId, Property, PropertyId,
    ProximityFacts, ProximityIndex, ProximitySnapshot, RuleEvaluator, RuleId, RuleKind,
    ScoringRule, SearchProfile, SignalKind, SignalSnapshot, StandardEvaluator, WalkTarget,
};
use proptest::prelude::*;

const ORIGIN: Coord<f64> = Coord { x: -0.1276, y: 51.5072 };

fn snapshot_with(distances: &[f64]) -> ProximitySnapshot {
    distances
        .iter()
        .zip(1_u64..)
        .fold(
            ProximitySnapshot::new(PropertyId(1), [CategoryId(1)]),
            |snapshot, (distance, id)| snapshot.with_record(PoiId(id), CategoryId(1), *distance),
        )
}

fn property() -> Property {
    Property::new(PropertyId(1), ORIGIN)
}

fn build_index<'a>(ordered: impl Iterator<Item = &'a Poi>, property_first: bool) -> ProximityIndex {
    let mut index = ProximityIndex::new();
    let category = PoiCategory::new(CategoryId(1), "grocer", 1_000.0).expect("valid radius");
    index.register_category(category).expect("register");
    if property_first {
        index.upsert_property(&property()).expect("property");
    }
    for poi in ordered {
        index.upsert_poi(poi).expect("poi");
    }
    if !property_first {
        index.upsert_property(&property()).expect("property");
    }
    index
}

/// POIs in two categories on a coarse distance grid, so ties are common.
fn placements() -> impl Strategy<Value = Vec<(PoiId, CategoryId, f64)>> {
    prop::collection::vec((1_u64..=2, 0_u32..5), 0..10).prop_map(|cells| {
        cells
            .into_iter()
            .zip(1_u64..)
            .map(|((category, step), id)| {
                (PoiId(id), CategoryId(category), f64::from(step) * 250.0)
            })
            .collect()
    })
}

fn snapshot_of<'a>(
    placed: impl Iterator<Item = &'a (PoiId, CategoryId, f64)>,
) -> ProximitySnapshot {
    placed.fold(
        ProximitySnapshot::new(PropertyId(1), [CategoryId(1), CategoryId(2)]),
        |snapshot, (poi, category, distance)| snapshot.with_record(*poi, *category, *distance),
    )
}

fn mixed_profile(
    weights: (f64, f64, f64, f64),
    sub_weights: (f64, f64),
    max_distance_m: f64,
) -> SearchProfile {
    let (proximity, walk, attribute, signal) = weights;
    let kinds = [
        (
            proximity,
            RuleKind::PoiProximity {
                category: CategoryId(1),
                max_distance_m,
            },
        ),
        (
            walk,
            RuleKind::Walkability {
                targets: vec![
                    WalkTarget {
                        category: CategoryId(1),
                        weight: sub_weights.0,
                    },
                    WalkTarget {
                        category: CategoryId(2),
                        weight: sub_weights.1,
                    },
                ],
                max_distance_m,
            },
        ),
        (
            attribute,
            RuleKind::PropertyAttr {
                attribute: Attribute::Bedrooms,
                ideal_min: 2.0,
                ideal_max: 3.0,
                tolerance: 2.0,
            },
        ),
        (
            signal,
            RuleKind::ExternalSignal {
                signal: SignalKind::AiSentiment,
            },
        ),
    ];
    let rules = kinds
        .into_iter()
        .zip(1_u64..)
        .map(|((weight, kind), id)| {
            ScoringRule::new(RuleId(id), weight, kind).expect("valid rule")
        })
        .collect();
    SearchProfile::new(ProfileId(1), 1, "mixed")
        .with_rules(rules)
        .expect("unique ids")
}

fn weighted_rules() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.0_f64..=1.0, 1.0_f64..5_000.0), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: proximity and density values stay within `[0, 1]`.
    #[test]
    fn proximity_rules_stay_in_range(
        distances in prop::collection::vec(0.0_f64..10_000.0, 0..6),
        max_distance_m in 1.0_f64..5_000.0,
        target_count in 1_u32..10,
    ) {
        let facts = snapshot_with(&distances);
        let kinds = [
            RuleKind::PoiProximity { category: CategoryId(1), max_distance_m },
            RuleKind::PoiDensity { category: CategoryId(1), radius_m: max_distance_m, target_count },
        ];
        for kind in kinds {
            let rule = ScoringRule::new(RuleId(1), 1.0, kind).expect("valid rule");
            let outcome = StandardEvaluator
                .evaluate(&rule, &property(), &facts, &SignalSnapshot::new())
                .expect("known category");
            prop_assert!(outcome.value.is_finite());
            prop_assert!((0.0..=1.0).contains(&outcome.value), "value {}", outcome.value);
        }
    }

    /// Property: attribute fit stays within `[0, 1]` for any listing value.
    #[test]
    fn attribute_rules_stay_in_range(
        actual in prop::num::f64::ANY,
        ideal_min in -1.0e6_f64..1.0e6,
        span in 0.0_f64..1.0e6,
        tolerance in 0.0_f64..1.0e6,
    ) {
        let rule = ScoringRule::new(
            RuleId(1),
            1.0,
            RuleKind::PropertyAttr {
                attribute: Attribute::Price,
                ideal_min,
                ideal_max: ideal_min + span,
                tolerance,
            },
        )
        .expect("valid rule");
        let listing = property().with_price(actual);
        let outcome = StandardEvaluator
            .evaluate(&rule, &listing, &snapshot_with(&[]), &SignalSnapshot::new())
            .expect("no categories involved");
        prop_assert!((0.0..=1.0).contains(&outcome.value), "value {}", outcome.value);
    }

    /// Property: composite totals stay within `[0, 100]`.
    #[test]
    fn totals_stay_in_range(rules in weighted_rules(), distance in 0.0_f64..6_000.0) {
        let scoring: Vec<_> = rules
            .iter()
            .zip(1_u64..)
            .map(|((weight, max_distance_m), id)| {
                ScoringRule::new(
                    RuleId(id),
                    *weight,
                    RuleKind::PoiProximity { category: CategoryId(1), max_distance_m: *max_distance_m },
                )
                .expect("valid rule")
            })
            .collect();
        let profile = SearchProfile::new(ProfileId(1), 1, "random")
            .with_rules(scoring)
            .expect("unique ids");
        let card = Aggregator::new()
            .compute(&property(), &profile, &snapshot_with(&[distance]), &SignalSnapshot::new())
            .expect("known category");
        prop_assert!((0.0..=100.0).contains(&card.total), "total {}", card.total);
        let all_zero = rules.iter().all(|(weight, _)| *weight == 0.0);
        if all_zero {
            prop_assert_eq!(card.total, 0.0);
            prop_assert!(card.breakdown.is_empty());
        }
    }

    /// Property: the index reaches the same state whatever the upsert order.
    #[test]
    fn upsert_order_does_not_matter(
        offsets in prop::collection::vec((-1_500.0_f64..1_500.0, -1_500.0_f64..1_500.0), 1..10),
    ) {
        let pois: Vec<_> = offsets
            .iter()
            .zip(1_u64..)
            .map(|((east, north), id)| Poi::new(PoiId(id), CategoryId(1), offset_m(ORIGIN, *east, *north)))
            .collect();

        let forward = build_index(pois.iter(), true);
        let backward = build_index(pois.iter().rev(), false);

        prop_assert_eq!(forward.record_count(), backward.record_count());
        let left = forward.within(PropertyId(1), CategoryId(1), 1_000.0);
        let right = backward.within(PropertyId(1), CategoryId(1), 1_000.0);
        prop_assert_eq!(left.len(), right.len());
        for (a, b) in left.iter().zip(&right) {
            prop_assert_eq!(a.poi, b.poi);
            prop_assert!((a.distance_m - b.distance_m).abs() < 1e-6);
        }
    }

    /// Property: equal inputs produce identical cards, whatever the record
    /// order, and nearest-POI ties go to the lowest id.
    #[test]
    fn compute_is_deterministic(
        placed in placements(),
        weights in (0.0_f64..=1.0, 0.0_f64..=1.0, 0.0_f64..=1.0, 0.0_f64..=1.0),
        sub_weights in (0.1_f64..=1.0, 0.1_f64..=1.0),
        max_distance_m in 100.0_f64..2_000.0,
        sentiment in prop::option::of(0.0_f64..=1.0),
        bedrooms in 0_u32..6,
    ) {
        let profile = mixed_profile(weights, sub_weights, max_distance_m);
        let listing = property().with_bedrooms(bedrooms);
        let signals = sentiment.map_or_else(SignalSnapshot::new, |value| {
            SignalSnapshot::new().with(SignalKind::AiSentiment, value)
        });
        let forward = snapshot_of(placed.iter());
        let backward = snapshot_of(placed.iter().rev());
        let aggregator = Aggregator::new();

        let first = aggregator
            .compute(&listing, &profile, &forward, &signals)
            .expect("known categories");
        let second = aggregator
            .compute(&listing, &profile, &forward, &signals)
            .expect("known categories");
        let reordered = aggregator
            .compute(&listing, &profile, &backward, &signals)
            .expect("known categories");
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, &reordered);

        for category in [CategoryId(1), CategoryId(2)] {
            let expected = placed
                .iter()
                .filter(|(_, placed_in, _)| *placed_in == category)
                .min_by(|a, b| a.2.total_cmp(&b.2).then_with(|| a.0.cmp(&b.0)))
                .map(|(poi, _, _)| *poi);
            let left = forward.nearest(PropertyId(1), category).map(|record| record.poi);
            let right = backward.nearest(PropertyId(1), category).map(|record| record.poi);
            prop_assert_eq!(left, expected);
            prop_assert_eq!(right, expected);
        }
    }
}
