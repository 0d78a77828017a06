#![expect(
    clippy::expect_used,
    reason = "tests should fail fast when setup breaks"
)]

//! End-to-end engine behaviour: fan-out, reads, sweeps and persistence.

use std::sync::Arc;

use geo::Coord;
use nestscout_core::distance::offset_m;
use nestscout_core::test_support::FixedEvaluator;
use nestscout_core::{
    Aggregator, Attribute, CategoryId, Poi, PoiCategory, PoiId, ProfileId, Property,
    PropertyFilter, PropertyId, RuleId, RuleKind, ScoringRule, SearchProfile, SignalKind,
    ValidationError,
};
use nestscout_scheduler::{
    Engine, EngineConfig, EngineError, EngineEvent, FanOutPolicy, ScoreStore, SortOrder,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

const CAFE: CategoryId = CategoryId(5);
const COUPLE: ProfileId = ProfileId(1);
const HOME: Coord<f64> = Coord { x: 4.8357, y: 45.764 };

fn rule(id: u64, weight: f64, kind: RuleKind) -> ScoringRule {
    ScoringRule::new(RuleId(id), weight, kind).expect("valid rule")
}

fn two_bedrooms(id: u64, weight: f64) -> ScoringRule {
    rule(
        id,
        weight,
        RuleKind::PropertyAttr {
            attribute: Attribute::Bedrooms,
            ideal_min: 2.0,
            ideal_max: 2.0,
            tolerance: 0.0,
        },
    )
}

fn couple(rules: Vec<ScoringRule>) -> SearchProfile {
    SearchProfile::new(COUPLE, 11, "couple")
        .with_rules(rules)
        .expect("unique rule ids")
}

fn flat(id: u64, bedrooms: u32, price: f64) -> Property {
    Property::new(PropertyId(id), offset_m(HOME, 0.0, 150.0 * f64::from(bedrooms)))
        .with_bedrooms(bedrooms)
        .with_price(price)
}

#[fixture]
fn engine() -> Engine {
    let engine = Engine::new(EngineConfig::default()).expect("default config is valid");
    let cafe = PoiCategory::new(CAFE, "cafe", 1_000.0).expect("valid radius");
    engine
        .apply(EngineEvent::CategoryRegistered(cafe))
        .expect("fresh category");
    engine
}

fn seed(engine: &Engine, profile: SearchProfile, flats: impl IntoIterator<Item = Property>) {
    for listing in flats {
        engine
            .apply(EngineEvent::PropertyUpserted(listing))
            .expect("valid listing");
    }
    engine
        .apply(EngineEvent::ProfileUpserted(profile))
        .expect("valid profile");
}

#[rstest]
#[tokio::test]
async fn signals_complete_pending_rules(engine: Engine) {
    let sentiment = rule(
        2,
        0.5,
        RuleKind::ExternalSignal {
            signal: SignalKind::AiSentiment,
        },
    );
    seed(
        &engine,
        couple(vec![two_bedrooms(1, 0.5), sentiment]),
        [flat(1, 2, 250_000.0)],
    );
    let first = engine.run_until_idle().await;
    assert_eq!(first.committed, 1);
    let waiting = engine
        .get_score(PropertyId(1), COUPLE)
        .expect("score committed");
    assert_eq!(waiting.total, 50.0);
    assert!(waiting.breakdown.iter().any(|entry| entry.pending));

    let queued = engine
        .apply(EngineEvent::ExternalSignalReady {
            property: PropertyId(1),
            signal: SignalKind::AiSentiment,
            value: 0.6,
        })
        .expect("known property");
    assert_eq!(queued, 1);
    let second = engine.run_until_idle().await;
    assert_eq!(second.committed, 1);
    let ready = engine
        .get_score(PropertyId(1), COUPLE)
        .expect("score committed");
    assert_eq!(ready.total, 80.0);
    assert!(ready.version > waiting.version);
    assert!(ready.breakdown.iter().all(|entry| !entry.pending));
}

#[rstest]
fn signals_ignore_profiles_that_do_not_read_them(engine: Engine) {
    seed(&engine, couple(vec![two_bedrooms(1, 1.0)]), [flat(1, 2, 1.0)]);
    let queued = engine
        .apply(EngineEvent::ExternalSignalReady {
            property: PropertyId(1),
            signal: SignalKind::PriceValue,
            value: 0.9,
        })
        .expect("known property");
    assert_eq!(queued, 0);

    let unknown = engine.apply(EngineEvent::ExternalSignalReady {
        property: PropertyId(404),
        signal: SignalKind::PriceValue,
        value: 0.9,
    });
    assert!(matches!(
        unknown,
        Err(EngineError::UnknownProperty { id: PropertyId(404) })
    ));
}

#[rstest]
#[tokio::test]
async fn deleting_a_listing_drops_its_scores(engine: Engine) {
    seed(
        &engine,
        couple(vec![two_bedrooms(1, 1.0)]),
        [flat(1, 2, 1.0), flat(2, 3, 1.0)],
    );
    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 2);

    let queued = engine
        .apply(EngineEvent::PropertyDeleted(PropertyId(1)))
        .expect("deletion is infallible");
    assert_eq!(queued, 0);
    assert!(engine.get_score(PropertyId(1), COUPLE).is_none());
    assert_eq!(engine.store().len(), 1);
    let ranked = engine
        .list_scores(COUPLE, &PropertyFilter::default(), SortOrder::Descending)
        .expect("known profile");
    let ids: Vec<PropertyId> = ranked.iter().map(|entry| entry.property.id).collect();
    assert_eq!(ids, vec![PropertyId(2)]);
}

#[rstest]
#[tokio::test]
async fn list_filters_combine_with_profile_filters(engine: Engine) {
    let profile = couple(vec![two_bedrooms(1, 1.0)]).with_filters(PropertyFilter {
        min_bedrooms: Some(2),
        ..PropertyFilter::default()
    });
    seed(
        &engine,
        profile,
        [
            flat(1, 1, 150_000.0),
            flat(2, 2, 400_000.0),
            flat(3, 2, 200_000.0),
            flat(4, 3, 210_000.0),
        ],
    );
    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 4);

    let budget = PropertyFilter {
        max_price: Some(300_000.0),
        ..PropertyFilter::default()
    };
    let ascending = engine
        .list_scores(COUPLE, &budget, SortOrder::Ascending)
        .expect("known profile");
    let order: Vec<(PropertyId, f64)> = ascending
        .iter()
        .map(|entry| (entry.property.id, entry.score.total))
        .collect();
    assert_eq!(order, vec![(PropertyId(4), 0.0), (PropertyId(3), 100.0)]);

    let missing = engine.list_scores(ProfileId(9), &budget, SortOrder::Descending);
    assert!(matches!(
        missing,
        Err(EngineError::UnknownProfile { id: ProfileId(9) })
    ));
}

#[rstest]
#[tokio::test]
async fn sweeps_walk_every_pair_in_batches() {
    let config = EngineConfig::default().with_sweep_batch(2);
    let engine = Engine::new(config).expect("valid config");
    seed(
        &engine,
        couple(vec![two_bedrooms(1, 1.0)]),
        [flat(1, 2, 1.0), flat(2, 2, 1.0), flat(3, 2, 1.0)],
    );
    let settled = engine.run_until_idle().await;
    assert_eq!(settled.committed, 3);

    let batches: Vec<usize> = (0..4)
        .map(|_| engine.apply(EngineEvent::SweepTick).expect("sweeps never fail"))
        .collect();
    assert_eq!(batches, vec![2, 1, 0, 0]);

    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 3);
    let after: Vec<usize> = (0..2)
        .map(|_| engine.apply(EngineEvent::SweepTick).expect("sweeps never fail"))
        .collect();
    assert_eq!(after, vec![2, 1]);

    let drained = engine.run_until_idle().await;
    assert_eq!(drained.committed, 3);
    let next_pass = engine
        .apply(EngineEvent::SweepTick)
        .expect("sweeps never fail");
    assert_eq!(next_pass, 2);
}

#[rstest]
#[tokio::test]
async fn affinity_only_engines_score_saved_listings() {
    let config = EngineConfig::default().with_fan_out(FanOutPolicy::AffinityOnly);
    let engine = Engine::new(config).expect("valid config");
    let queued_by_profile = {
        engine
            .apply(EngineEvent::PropertyUpserted(flat(1, 2, 1.0)))
            .expect("valid listing");
        engine
            .apply(EngineEvent::ProfileUpserted(couple(vec![two_bedrooms(1, 1.0)])))
            .expect("valid profile")
    };
    assert_eq!(queued_by_profile, 0);

    let saved = engine
        .apply(EngineEvent::AffinityChanged {
            property: PropertyId(1),
            profile: COUPLE,
            active: true,
        })
        .expect("affinity changes never fail");
    assert_eq!(saved, 1);
    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 1);
    assert!(engine.get_score(PropertyId(1), COUPLE).is_some());

    let unsaved = engine
        .apply(EngineEvent::AffinityChanged {
            property: PropertyId(1),
            profile: COUPLE,
            active: false,
        })
        .expect("affinity changes never fail");
    assert_eq!(unsaved, 0);
    assert!(engine.get_score(PropertyId(1), COUPLE).is_none());
}

#[rstest]
#[tokio::test]
async fn unchanged_listings_queue_nothing(engine: Engine) {
    seed(&engine, couple(vec![two_bedrooms(1, 1.0)]), [flat(1, 2, 1.0)]);
    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 1);

    let same = engine
        .apply(EngineEvent::PropertyUpserted(flat(1, 2, 1.0)))
        .expect("valid listing");
    assert_eq!(same, 0);
    let repriced = engine
        .apply(EngineEvent::PropertyUpserted(flat(1, 2, 2.0)))
        .expect("valid listing");
    assert_eq!(repriced, 1);

    let renamed = engine
        .apply(EngineEvent::ProfileUpserted(
            SearchProfile::new(COUPLE, 11, "renamed")
                .with_rules(vec![two_bedrooms(1, 1.0)])
                .expect("unique rule ids"),
        ))
        .expect("valid profile");
    assert_eq!(renamed, 0);
}

#[rstest]
fn radii_beyond_the_index_are_rejected(engine: Engine) {
    let far_cafe = rule(
        1,
        1.0,
        RuleKind::PoiProximity {
            category: CAFE,
            max_distance_m: 1_500.0,
        },
    );
    let result = engine.apply(EngineEvent::ProfileUpserted(couple(vec![far_cafe])));
    assert!(matches!(
        result,
        Err(EngineError::Validation(ValidationError::RadiusExceedsIndex {
            category: CAFE,
            ..
        }))
    ));
    let listed = engine.list_scores(COUPLE, &PropertyFilter::default(), SortOrder::Descending);
    assert!(matches!(listed, Err(EngineError::UnknownProfile { .. })));
}

#[rstest]
#[tokio::test]
async fn poi_moves_only_touch_nearby_listings(engine: Engine) {
    let cafe = rule(
        1,
        1.0,
        RuleKind::PoiProximity {
            category: CAFE,
            max_distance_m: 500.0,
        },
    );
    let near = Property::new(PropertyId(1), HOME).with_bedrooms(2);
    let far = Property::new(PropertyId(2), offset_m(HOME, 5_000.0, 0.0)).with_bedrooms(2);
    seed(&engine, couple(vec![cafe]), [near, far]);
    let settled = engine.run_until_idle().await;
    assert_eq!(settled.committed, 2);

    let opened = engine
        .apply(EngineEvent::PoiUpserted(Poi::new(
            PoiId(1),
            CAFE,
            offset_m(HOME, 250.0, 0.0),
        )))
        .expect("valid poi");
    assert_eq!(opened, 1);
    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 1);
    let score = engine
        .get_score(PropertyId(1), COUPLE)
        .expect("score committed");
    assert_eq!(score.total, 50.0);

    let renamed = engine
        .apply(EngineEvent::PoiUpserted(
            Poi::new(PoiId(1), CAFE, offset_m(HOME, 250.0, 0.0)).with_name("Café du Parc"),
        ))
        .expect("valid poi");
    assert_eq!(renamed, 0);
}

#[rstest]
#[tokio::test]
async fn restored_scores_resume_with_newer_versions(engine: Engine) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("scores.bin");
    seed(&engine, couple(vec![two_bedrooms(1, 1.0)]), [flat(1, 2, 1.0)]);
    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 1);
    let before = engine
        .get_score(PropertyId(1), COUPLE)
        .expect("score committed");
    engine.write_snapshot(&path).expect("write snapshot");

    let restored = Engine::restore(EngineConfig::default(), &path).expect("load snapshot");
    assert_eq!(restored.store().len(), 1);
    assert!(restored.get_score(PropertyId(1), COUPLE).is_none());

    seed(&restored, couple(vec![two_bedrooms(1, 1.0)]), [flat(1, 2, 1.0)]);
    let visible = restored
        .get_score(PropertyId(1), COUPLE)
        .expect("restored score visible");
    assert_eq!(visible.version, before.version);

    let rescored = restored.run_until_idle().await;
    assert_eq!(rescored.committed, 1);
    let after = restored
        .get_score(PropertyId(1), COUPLE)
        .expect("score committed");
    assert!(after.version > before.version);
}

#[rstest]
#[tokio::test]
async fn custom_evaluators_plug_into_the_engine() {
    let engine = Engine::with_parts(
        EngineConfig::default(),
        Arc::new(ScoreStore::new()),
        Aggregator::with_evaluator(FixedEvaluator(0.25)),
    )
    .expect("valid config");
    engine
        .apply(EngineEvent::PropertyUpserted(flat(1, 5, 1.0)))
        .expect("valid listing");
    engine
        .apply(EngineEvent::ProfileUpserted(couple(vec![two_bedrooms(1, 1.0)])))
        .expect("valid profile");
    let report = engine.run_until_idle().await;
    assert_eq!(report.committed, 1);
    let total = engine.get_score(PropertyId(1), COUPLE).map(|s| s.total);
    assert_eq!(total, Some(25.0));
}

#[rstest]
#[tokio::test]
async fn commits_are_broadcast_to_subscribers(engine: Engine) {
    let mut commits = engine.subscribe();
    seed(&engine, couple(vec![two_bedrooms(1, 1.0)]), [flat(1, 2, 1.0)]);
    engine.run_until_idle().await;

    let event = commits.try_recv().expect("one commit published");
    assert_eq!(event.property, PropertyId(1));
    assert_eq!(event.profile, COUPLE);
    assert_eq!(event.score, 100.0);
    let stored = engine
        .get_score(PropertyId(1), COUPLE)
        .expect("score committed");
    assert_eq!(event.version, stored.version);
    assert!(commits.try_recv().is_err());
}
