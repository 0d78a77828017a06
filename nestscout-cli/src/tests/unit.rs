//! Focused unit tests covering score CLI configuration.

use std::time::Duration;

use camino::Utf8PathBuf;
use nestscout_scheduler::{ConfigError, FanOutPolicy};
use rstest::rstest;

use super::helpers::{ScenarioDir, write_utf8};
use super::*;
use crate::score::{ScoreArgs, ScoreConfig, config_from_layers_for_test};

fn args_for(scenario: &str) -> ScoreArgs {
    ScoreArgs {
        scenario: Some(Utf8PathBuf::from(scenario)),
        ..ScoreArgs::default()
    }
}

#[rstest]
fn converting_without_scenario_errors() {
    let err = ScoreConfig::try_from(ScoreArgs::default()).expect_err("missing scenario");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_SCENARIO);
            assert_eq!(env, ENV_SCENARIO);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn defaults_leave_engine_tuning_untouched() {
    let config = ScoreConfig::try_from(args_for("scenario.json")).expect("config should build");
    assert_eq!(config.engine, nestscout_scheduler::EngineConfig::default());
    assert_eq!(config.log_level, "info");
    assert_eq!(config.limit, None);
}

#[rstest]
fn overrides_reach_the_engine_config() {
    let args = ScoreArgs {
        workers: Some(2),
        queue_capacity: Some(50),
        timeout_ms: Some(250),
        max_attempts: Some(5),
        fan_out: Some(String::from("affinity_only")),
        log_level: Some(String::from("debug")),
        limit: Some(3),
        ..args_for("scenario.json")
    };
    let config = ScoreConfig::try_from(args).expect("config should build");
    assert_eq!(config.engine.workers, 2);
    assert_eq!(config.engine.queue_capacity, 50);
    assert_eq!(config.engine.query_timeout, Duration::from_millis(250));
    assert_eq!(config.engine.signal_timeout, Duration::from_millis(250));
    assert_eq!(config.engine.retry.max_attempts, 5);
    assert_eq!(config.engine.fan_out, FanOutPolicy::AffinityOnly);
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.limit, Some(3));
}

#[rstest]
#[case("all", FanOutPolicy::AllProfiles)]
#[case("ALL_PROFILES", FanOutPolicy::AllProfiles)]
#[case(" affinity ", FanOutPolicy::AffinityOnly)]
fn fan_out_accepts_short_names(#[case] value: &str, #[case] expected: FanOutPolicy) {
    let args = ScoreArgs {
        fan_out: Some(value.to_owned()),
        ..args_for("scenario.json")
    };
    let config = ScoreConfig::try_from(args).expect("config should build");
    assert_eq!(config.engine.fan_out, expected);
}

#[rstest]
fn unknown_fan_out_is_rejected() {
    let args = ScoreArgs {
        fan_out: Some(String::from("everyone")),
        ..args_for("scenario.json")
    };
    let err = ScoreConfig::try_from(args).expect_err("unknown policy");
    match err {
        CliError::InvalidOption { field, value, .. } => {
            assert_eq!(field, ARG_FAN_OUT);
            assert_eq!(value, "everyone");
        }
        other => panic!("expected InvalidOption, found {other:?}"),
    }
}

#[rstest]
#[case::no_workers(ScoreArgs { workers: Some(0), ..args_for("s.json") }, "workers")]
#[case::no_timeout(ScoreArgs { timeout_ms: Some(0), ..args_for("s.json") }, "query_timeout")]
#[case::no_attempts(ScoreArgs { max_attempts: Some(0), ..args_for("s.json") }, "retry.max_attempts")]
fn unusable_engine_values_are_rejected(#[case] args: ScoreArgs, #[case] expected: &str) {
    let err = ScoreConfig::try_from(args).expect_err("invalid engine config");
    match err {
        CliError::EngineConfig(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, expected);
        }
        other => panic!("expected EngineConfig, found {other:?}"),
    }
}

#[rstest]
fn validate_sources_reports_missing_scenario() {
    let dir = ScenarioDir::new();
    let err = dir.config().validate_sources().expect_err("expected failure");
    match err {
        CliError::MissingSourceFile { field, path } => {
            assert_eq!(field, ARG_SCENARIO);
            assert_eq!(path, dir.scenario_path());
        }
        other => panic!("expected MissingSourceFile, found {other:?}"),
    }
}

#[rstest]
fn validate_sources_rejects_directories() {
    let dir = ScenarioDir::new();
    std::fs::create_dir(dir.scenario_path().as_std_path()).expect("scenario directory");
    let err = dir.config().validate_sources().expect_err("expected failure");
    match err {
        CliError::SourcePathNotFile { field, .. } => assert_eq!(field, ARG_SCENARIO),
        other => panic!("expected SourcePathNotFile, found {other:?}"),
    }
}

#[rstest]
fn validate_sources_checks_the_restore_snapshot() {
    let dir = ScenarioDir::new();
    write_utf8(&dir.scenario_path(), b"{}");
    let config = ScoreConfig {
        restore: Some(dir.root().join("missing.bin")),
        ..dir.config()
    };
    let err = config.validate_sources().expect_err("expected failure");
    match err {
        CliError::MissingSourceFile { field, .. } => assert_eq!(field, ARG_RESTORE),
        other => panic!("expected MissingSourceFile, found {other:?}"),
    }
}

#[rstest]
fn merge_layers_maps_configuration_errors() {
    use ortho_config::MergeComposer;
    use serde_json::json;

    let mut composer = MergeComposer::new();
    composer.push_cli(json!({ "scenario": 42 }));

    let err = config_from_layers_for_test(composer.layers())
        .expect_err("invalid config layer should map to CliError::Configuration");
    match err {
        CliError::Configuration(_) => {}
        other => panic!("expected CliError::Configuration, found {other:?}"),
    }
}

#[rstest]
fn merge_layers_honours_precedence() {
    use ortho_config::MergeComposer;
    use serde_json::json;

    let mut composer = MergeComposer::new();
    composer.push_file(
        json!({
            "scenario": "from-file.json",
            "workers": 8,
            "limit": 5,
            "fan_out": "affinity_only",
        }),
        None,
    );
    composer.push_environment(json!({
        "scenario": "from-env.json",
        "workers": 6,
    }));
    composer.push_cli(json!({ "workers": 2 }));

    let config =
        config_from_layers_for_test(composer.layers()).expect("merged config should build");
    assert_eq!(config.scenario, Utf8PathBuf::from("from-env.json"));
    assert_eq!(config.engine.workers, 2);
    assert_eq!(config.limit, Some(5));
    assert_eq!(config.engine.fan_out, FanOutPolicy::AffinityOnly);
}
