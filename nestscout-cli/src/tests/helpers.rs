//! Scenario fixtures and filesystem helpers shared by the CLI tests.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::score::ScoreConfig;
use nestscout_scheduler::EngineConfig;

/// Two profiles over three flats around a school.
///
/// The school sits 400 m north of flats 1 and 3; flat 2 is 3 km away.
/// The family profile weighs the school at 0.3 and an exact three-bedroom
/// match at 0.7, so flat 1 scores 88, flat 3 scores 18 and flat 2 scores 0.
/// The investor profile reads the price-value signal, which only flat 1 has.
pub(super) const FAMILY_SCENARIO: &str = r#"{
  "categories": [
    { "id": 1, "name": "school", "max_radius_m": 1500.0 }
  ],
  "pois": [
    { "id": 10, "category": 1, "location": { "x": 2.3522, "y": 48.8601973 }, "name": "Lycée Charlemagne" }
  ],
  "properties": [
    { "id": 1, "location": { "x": 2.3522, "y": 48.8566 }, "bedrooms": 3, "price": 420000.0 },
    { "id": 2, "location": { "x": 2.3522, "y": 48.8836 }, "bedrooms": 1, "price": 250000.0 },
    { "id": 3, "location": { "x": 2.3522, "y": 48.8566 }, "bedrooms": 2, "price": 310000.0 }
  ],
  "profiles": [
    {
      "id": 1,
      "owner_id": 7,
      "name": "family",
      "rules": [
        { "id": 1, "rule_type": "poi_proximity", "poi_category_id": 1, "max_distance_m": 1000.0, "weight": 0.3 },
        { "id": 2, "rule_type": "property_attr", "weight": 0.7, "parameters": { "attribute": "bedrooms", "ideal": 3 } }
      ]
    },
    {
      "id": 2,
      "owner_id": 8,
      "name": "investor",
      "rules": [
        { "id": 1, "rule_type": "price_value", "weight": 1.0 }
      ]
    }
  ],
  "signals": [
    { "property": 1, "signal": "price_value", "value": 0.75 }
  ]
}"#;

/// Temporary directory holding a scenario file.
pub(super) struct ScenarioDir {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

impl ScenarioDir {
    pub(super) fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 workspace");
        Self { _tmp: tmp, root }
    }

    pub(super) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(super) fn scenario_path(&self) -> Utf8PathBuf {
        self.root.join("scenario.json")
    }

    /// Write `contents` as the scenario and return its path.
    pub(super) fn write_scenario(&self, contents: &str) -> Utf8PathBuf {
        let path = self.scenario_path();
        write_utf8(&path, contents.as_bytes());
        path
    }

    /// Resolved configuration scoring the scenario with default tuning.
    pub(super) fn config(&self) -> ScoreConfig {
        ScoreConfig {
            scenario: self.scenario_path(),
            restore: None,
            snapshot_out: None,
            limit: None,
            engine: EngineConfig::default(),
            log_level: String::from("info"),
        }
    }
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    std::fs::write(path.as_std_path(), contents).expect("write fixture file");
}
