//! JSON frame export for rendering.
//!
//! Exports per-tick camera and target state as JSON for an external viewer.

use camnet_core::OnlineState;
use camnet_env::SimError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Tick the frame was taken at
    pub time_step: u64,

    pub cameras: Vec<CameraFrame>,

    pub targets: Vec<TargetFrame>,

    /// Network utility this tick
    pub utility: f64,

    /// Summed FOV overlap of online camera pairs
    pub overlap: f64,

    /// Notable events (failures, swaps)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

/// Camera state for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraFrame {
    pub name: String,
    pub x: f64,
    pub y: f64,

    /// Radians
    pub heading: f64,

    /// Radians
    pub view_angle: f64,

    pub range: f64,
    pub state: OnlineState,

    /// `<node>/<policy>`, e.g. `active/step`
    pub strategy: String,

    pub visible: Vec<Vec<f64>>,
    pub tracked: Vec<Vec<f64>>,
}

/// Target position for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFrame {
    pub features: Vec<f64>,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,

    /// Ticks covered by the frames
    pub ticks: u64,

    pub frames: Vec<SimFrame>,

    /// Statistics summary line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            ticks: 0,
            frames: Vec::new(),
            summary: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.ticks = frame.time_step + 1;
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, summary: String) {
        self.summary = Some(summary);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &Path) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self).map_err(SimError::serialization)?;
        let mut file = File::create(path).map_err(SimError::serialization)?;
        file.write_all(json.as_bytes()).map_err(SimError::serialization)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(time_step: u64) -> SimFrame {
        SimFrame {
            time_step,
            cameras: vec![CameraFrame {
                name: "C1".to_string(),
                x: 0.0,
                y: 0.0,
                heading: 0.0,
                view_angle: 1.0,
                range: 10.0,
                state: OnlineState::OfflineFor(3),
                strategy: "active/broadcast".to_string(),
                visible: vec![vec![0.111]],
                tracked: Vec::new(),
            }],
            targets: vec![TargetFrame {
                features: vec![0.111],
                x: 1.0,
                y: 2.0,
                heading: 0.5,
            }],
            utility: 0.4,
            overlap: 0.0,
            events: Vec::new(),
        }
    }

    #[test]
    fn test_export_tracks_ticks() {
        let mut export = SimExport::new("crossing", 42);
        export.add_frame(frame(0));
        export.add_frame(frame(9));
        export.finalize("steps=10".to_string());
        assert_eq!(export.ticks, 10);
        assert_eq!(export.frames.len(), 2);
        assert_eq!(export.summary.as_deref(), Some("steps=10"));
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("camnet_export_{}.json", std::process::id()));
        let mut export = SimExport::new("crossing", 1);
        export.add_frame(frame(0));
        export.write_to_file(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        let back: SimExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frames[0].cameras[0].state, OnlineState::OfflineFor(3));
        assert!(!json.contains("\"events\""));
    }
}
