//! Scenario settings, scripted events and snapshots.
//!
//! Scenarios are JSON documents. Angles are written in degrees and
//! converted to radians when the engine interprets them.
//!
//! ```text
//! {
//!   "bounds":  { "min_x": -30, "max_x": 30, "min_y": -30, "max_y": 30 },
//!   "cameras": [ { "name": "C1", "x": 0, "y": 0, "heading": 90,
//!                  "viewing_angle": 60, "range": 20, "comm": "step" } ],
//!   "objects": [ { "features": [0.111], "x": 5, "y": 5, "heading": 45,
//!                  "speed": 0.3 } ],
//!   "events":  [ { "timestep": 10,
//!                  "action": { "type": "fail_camera", "name": "C1", "duration": 5 } } ]
//! }
//! ```

use camnet_core::WorldBounds;
use camnet_env::{Features, SimError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

fn default_node() -> String {
    "active".to_string()
}

fn default_comm() -> String {
    "broadcast".to_string()
}

fn default_std() -> f64 {
    1.0
}

/// A camera as written in a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub name: String,
    pub x: f64,
    pub y: f64,

    /// Degrees, 0 = north, clockwise
    pub heading: f64,

    /// Degrees
    pub viewing_angle: f64,

    pub range: f64,

    /// Decision node name
    #[serde(default = "default_node")]
    pub ai_algorithm: String,

    /// Communication policy name
    #[serde(default = "default_comm")]
    pub comm: String,

    /// Maximum tracked targets (0 = unlimited)
    #[serde(default)]
    pub limit: usize,

    /// Strategy selector name, if the camera learns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandit: Option<String>,
}

/// A target as written in a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSettings {
    /// Identity; generated by the engine when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,

    pub x: f64,
    pub y: f64,

    /// Degrees, 0 = north, clockwise
    pub heading: f64,

    pub speed: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<[f64; 2]>,

    #[serde(default)]
    pub mean: f64,

    #[serde(default = "default_std")]
    pub std: f64,

    /// Movement name; `waypoints` if waypoints are given, else `straight`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<String>,
}

impl TargetSettings {
    /// Movement name this target resolves to.
    pub fn movement_name(&self) -> &str {
        match &self.movement {
            Some(name) if !name.is_empty() => name,
            _ if !self.waypoints.is_empty() => "waypoints",
            _ => "straight",
        }
    }
}

/// Initial neighbour links per camera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionGraphSettings {
    /// Links never learn or decay
    #[serde(default)]
    pub is_static: bool,

    /// Camera name -> linked camera names
    #[serde(default)]
    pub links: BTreeMap<String, Vec<String>>,
}

/// Geometry changes for a camera; `None` or `-1` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraChange {
    pub name: String,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub angle: Option<f64>,
    #[serde(default)]
    pub range: Option<f64>,
}

/// What a scripted event does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAction {
    AddCamera(CameraSettings),
    AddObject(TargetSettings),
    RemoveCamera { name: String },
    RemoveObject { features: Features },
    /// Takes a camera offline; `-1` = until the end of the run
    FailCamera { name: String, duration: i64 },
    ChangeCamera(CameraChange),
    /// Takes the global registry offline for some ticks
    RegistryOffline { duration: u32 },
}

/// An action scheduled for a timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEvent {
    pub timestep: u64,
    pub action: EventAction,
}

/// Everything needed to set up a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSettings {
    #[serde(default)]
    pub name: String,

    /// World bounds; `[-30, 30]` on both axes when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<WorldBounds>,

    #[serde(default)]
    pub cameras: Vec<CameraSettings>,

    #[serde(default)]
    pub objects: Vec<TargetSettings>,

    /// Extra cameras placed at random
    #[serde(default)]
    pub random_cameras: usize,

    /// Extra targets placed at random
    #[serde(default)]
    pub random_objects: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_graph: Option<VisionGraphSettings>,

    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

impl ScenarioSettings {
    /// A scenario of only randomly placed cameras and targets.
    pub fn random(name: &str, cameras: usize, objects: usize) -> Self {
        Self {
            name: name.to_string(),
            random_cameras: cameras,
            random_objects: objects,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json).map_err(SimError::serialization)
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        serde_json::to_string_pretty(self).map_err(SimError::serialization)
    }

    /// Writes the scenario as JSON.
    pub fn save(&self, path: &Path) -> Result<(), SimError> {
        fs::write(path, self.to_json()?).map_err(SimError::serialization)
    }

    /// Events due at `timestep`, in file order.
    pub fn events_at(&self, timestep: u64) -> impl Iterator<Item = &ScenarioEvent> {
        self.events.iter().filter(move |e| e.timestep == timestep)
    }
}

/// Produces the scenario a run starts from.
pub trait ScenarioLoader {
    fn load(&self) -> Result<ScenarioSettings, SimError>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Loads a scenario from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonScenarioLoader {
    path: PathBuf,
}

impl JsonScenarioLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScenarioLoader for JsonScenarioLoader {
    fn load(&self) -> Result<ScenarioSettings, SimError> {
        let json = fs::read_to_string(&self.path)
            .map_err(|e| SimError::configuration(format!("cannot read {}: {}", self.path.display(), e)))?;
        let mut settings = ScenarioSettings::from_json(&json)?;
        if settings.name.is_empty() {
            settings.name = self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(settings)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Serves an in-memory scenario.
#[derive(Debug, Clone)]
pub struct StaticScenarioLoader(pub ScenarioSettings);

impl ScenarioLoader for StaticScenarioLoader {
    fn load(&self) -> Result<ScenarioSettings, SimError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("built-in scenario `{}`", self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "cameras": [
            { "name": "C1", "x": 0, "y": 0, "heading": 90, "viewing_angle": 60, "range": 20, "comm": "step" },
            { "name": "C2", "x": 10, "y": 0, "heading": 270, "viewing_angle": 360, "range": 15,
              "ai_algorithm": "passive", "bandit": "epsilon_greedy" }
        ],
        "objects": [
            { "features": [0.111], "x": 5, "y": 5, "heading": 45, "speed": 0.3 },
            { "x": 1, "y": 1, "heading": 0, "speed": 0.5, "waypoints": [[0, 0], [5, 5]] }
        ],
        "vision_graph": { "is_static": true, "links": { "C1": ["C2"] } },
        "events": [
            { "timestep": 3, "action": { "type": "fail_camera", "name": "C1", "duration": -1 } },
            { "timestep": 5, "action": { "type": "change_camera", "name": "C2", "range": 25, "x": -1 } },
            { "timestep": 5, "action": { "type": "remove_object", "features": [0.111] } }
        ]
    }"#;

    #[test]
    fn test_parse_scenario() {
        let settings = ScenarioSettings::from_json(SCENARIO).unwrap();
        assert_eq!(settings.cameras.len(), 2);
        assert_eq!(settings.cameras[0].ai_algorithm, "active");
        assert_eq!(settings.cameras[0].comm, "step");
        assert_eq!(settings.cameras[1].bandit.as_deref(), Some("epsilon_greedy"));
        assert!(settings.bounds.is_none());

        assert_eq!(settings.objects[0].features, Some(Features::scalar(0.111)));
        assert_eq!(settings.objects[0].movement_name(), "straight");
        assert_eq!(settings.objects[1].movement_name(), "waypoints");
        assert_eq!(settings.objects[1].std, 1.0);

        assert!(settings.vision_graph.as_ref().unwrap().is_static);
        assert_eq!(settings.events_at(5).count(), 2);
        assert_eq!(
            settings.events[0].action,
            EventAction::FailCamera {
                name: "C1".to_string(),
                duration: -1
            }
        );
        match &settings.events[1].action {
            EventAction::ChangeCamera(change) => {
                assert_eq!(change.range, Some(25.0));
                assert_eq!(change.x, Some(-1.0));
                assert_eq!(change.heading, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let settings = ScenarioSettings::from_json(SCENARIO).unwrap();
        let again = ScenarioSettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(settings, again);
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = ScenarioSettings::from_json("{ \"cameras\": 3 }").unwrap_err();
        assert!(matches!(err, SimError::Serialization(_)));
    }

    #[test]
    fn test_file_loader_names_scenario() {
        let dir = std::env::temp_dir().join(format!("camnet_scenarios_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("crossing.json");
        fs::write(&path, SCENARIO).unwrap();

        let loader = JsonScenarioLoader::new(&path);
        let settings = loader.load().unwrap();
        assert_eq!(settings.name, "crossing");
        assert!(loader.describe().ends_with("crossing.json"));

        let missing = JsonScenarioLoader::new(dir.join("missing.json"));
        assert!(matches!(missing.load(), Err(SimError::Configuration(_))));
    }

    #[test]
    fn test_random_scenario() {
        let settings = ScenarioSettings::random("swarm", 6, 4);
        let loaded = StaticScenarioLoader(settings).load().unwrap();
        assert_eq!(loaded.random_cameras, 6);
        assert_eq!(loaded.random_objects, 4);
        assert!(loaded.cameras.is_empty());
    }
}
