//! Scenario runner - loads a scenario, ticks the engine and audits the result.

use crate::config::SimConfig;
use crate::exporter::SimExport;
use crate::scenarios::ScenarioLoader;
use crate::statistics::{with_suffix, RunStatistics};
use crate::world::SimulationEngine;

use camnet_env::SimError;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Scenario that was run
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Whether every audit passed
    pub passed: bool,

    /// Total ticks executed
    pub ticks: u64,

    /// Network utility of the last tick
    pub final_utility: f64,

    /// Network utility summed over all ticks
    pub total_utility: f64,

    /// Cameras at the end (online or not)
    pub cameras: usize,

    /// Targets at the end
    pub objects: usize,

    /// Consistency violations, one entry per failed audit
    pub violations: Vec<String>,

    /// Statistics summary line
    pub summary: String,
}

impl RunResult {
    pub fn failure_reason(&self) -> Option<&str> {
        self.violations.first().map(String::as_str)
    }
}

/// Runs scenarios under one configuration.
pub struct ScenarioRunner {
    config: SimConfig,

    /// Ticks per run
    ticks: u64,

    /// Run the consistency audit after every tick
    audit: bool,

    /// Frame export target
    export: Option<PathBuf>,

    /// Ticks between exported frames
    export_interval: u64,
}

impl ScenarioRunner {
    pub fn new(config: SimConfig, ticks: u64) -> Self {
        Self {
            config,
            ticks,
            audit: true,
            export: None,
            export_interval: 1,
        }
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    /// Writes every `interval`-th frame to `path` as JSON.
    pub fn with_export(mut self, path: impl Into<PathBuf>, interval: u64) -> Self {
        self.export = Some(path.into());
        self.export_interval = interval.max(1);
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs one scenario with the configured seed.
    ///
    /// Configuration errors abort before the first tick. Consistency
    /// violations are recorded and the run continues.
    pub fn run(&self, loader: &dyn ScenarioLoader) -> Result<RunResult, SimError> {
        self.run_with(loader, self.config.clone())
    }

    /// Runs one scenario once per seed, starting from the configured one.
    ///
    /// CSV output gets a `_<seed>` suffix when more than one seed runs.
    pub fn run_seeds(&self, loader: &dyn ScenarioLoader, seeds: usize) -> Result<Vec<RunResult>, SimError> {
        let mut results = Vec::with_capacity(seeds);
        for offset in 0..seeds {
            let mut config = self.config.clone();
            config.seed = self.config.seed.wrapping_add(offset as u64);
            if seeds > 1 {
                config.output = config
                    .output
                    .as_ref()
                    .map(|prefix| with_suffix(prefix, &format!("_{}", config.seed)));
            }
            results.push(self.run_with(loader, config)?);
        }
        Ok(results)
    }

    fn run_with(&self, loader: &dyn ScenarioLoader, config: SimConfig) -> Result<RunResult, SimError> {
        let settings = loader.load()?;
        info!("Starting scenario {} (seed={})", loader.describe(), config.seed);

        let seed = config.seed;
        let stats = match &config.output {
            Some(prefix) => RunStatistics::with_csv(seed, prefix)?,
            None => RunStatistics::in_memory(seed),
        };
        let mut engine = SimulationEngine::new(config, Box::new(stats))?;
        engine.interpret(&settings)?;

        let mut export = self.export.as_ref().map(|_| SimExport::new(engine.scenario(), seed));
        let mut violations = Vec::new();
        let mut total_utility = 0.0;

        for tick in 0..self.ticks {
            engine.tick()?;
            total_utility += engine.last_utility();

            if self.audit {
                if let Err(e) = engine.check_consistency() {
                    warn!("tick {}: {}", tick, e);
                    violations.push(format!("tick {}: {}", tick, e));
                }
            }
            if let Some(export) = export.as_mut() {
                if tick % self.export_interval == 0 {
                    export.add_frame(engine.frame());
                }
            }
            if tick % 100 == 0 {
                debug!(
                    "  t={} | cameras={} | targets={} | utility={:.3}",
                    tick,
                    engine.cameras().len(),
                    engine.objects().len(),
                    engine.last_utility()
                );
            }
        }

        if let Err(e) = engine.close() {
            warn!("closing run: {}", e);
        }
        let summary = engine.stat_summary();

        if let (Some(export), Some(path)) = (export.as_mut(), self.export.as_ref()) {
            export.finalize(summary.clone());
            export.write_to_file(path)?;
            info!("Exported {} frames to {}", export.frames.len(), path.display());
        }

        Ok(RunResult {
            scenario: engine.scenario().to_string(),
            seed,
            passed: violations.is_empty(),
            ticks: engine.statistics().time_step(),
            final_utility: engine.last_utility(),
            total_utility,
            cameras: engine.cameras().len(),
            objects: engine.objects().len(),
            violations,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{CameraSettings, ScenarioSettings, StaticScenarioLoader, TargetSettings};
    use camnet_env::Features;

    fn crossing() -> ScenarioSettings {
        ScenarioSettings {
            name: "crossing".to_string(),
            cameras: vec![
                CameraSettings {
                    name: "C1".to_string(),
                    x: -5.0,
                    y: 0.0,
                    heading: 0.0,
                    viewing_angle: 360.0,
                    range: 10.0,
                    ai_algorithm: "active".to_string(),
                    comm: "broadcast".to_string(),
                    limit: 0,
                    bandit: None,
                },
                CameraSettings {
                    name: "C2".to_string(),
                    x: 5.0,
                    y: 0.0,
                    heading: 0.0,
                    viewing_angle: 360.0,
                    range: 10.0,
                    ai_algorithm: "active".to_string(),
                    comm: "broadcast".to_string(),
                    limit: 0,
                    bandit: None,
                },
            ],
            objects: vec![TargetSettings {
                features: Some(Features::scalar(0.111)),
                x: -5.0,
                y: 1.0,
                heading: 0.0,
                speed: 0.0,
                waypoints: Vec::new(),
                mean: 0.0,
                std: 1.0,
                movement: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_run_reports_ticks_and_utility() {
        let runner = ScenarioRunner::new(SimConfig::default(), 5);
        let result = runner.run(&StaticScenarioLoader(crossing())).unwrap();

        assert_eq!(result.scenario, "crossing");
        assert_eq!(result.ticks, 5);
        assert!(result.passed, "{:?}", result.violations);
        assert!(result.failure_reason().is_none());
        assert!(result.final_utility > 0.0);
        assert!(result.total_utility >= result.final_utility);
        assert_eq!(result.cameras, 2);
        assert_eq!(result.objects, 1);
        assert!(result.summary.contains("steps=5"));
    }

    #[test]
    fn test_same_seed_same_result() {
        let config = SimConfig::default().with_seed(9).with_failure_rate(0.3);
        let runner = ScenarioRunner::new(config, 30).with_audit(false);
        let loader = StaticScenarioLoader(ScenarioSettings::random("r", 6, 4));

        let a = runner.run(&loader).unwrap();
        let b = runner.run(&loader).unwrap();
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.total_utility, b.total_utility);
    }

    #[test]
    fn test_seeds_advance() {
        let runner = ScenarioRunner::new(SimConfig::default().with_seed(100), 2);
        let results = runner
            .run_seeds(&StaticScenarioLoader(ScenarioSettings::random("r", 3, 2)), 3)
            .unwrap();
        let seeds: Vec<u64> = results.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102]);
    }

    #[test]
    fn test_bad_scenario_fails_before_ticking() {
        let mut settings = crossing();
        settings.cameras[0].ai_algorithm = "clairvoyant".to_string();
        let runner = ScenarioRunner::new(SimConfig::default(), 5);
        let err = runner.run(&StaticScenarioLoader(settings)).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn test_export_every_other_tick() {
        let path = std::env::temp_dir().join(format!("camnet_runner_{}.json", std::process::id()));
        let runner = ScenarioRunner::new(SimConfig::default(), 5).with_export(&path, 2);
        runner.run(&StaticScenarioLoader(crossing())).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        let export: SimExport = serde_json::from_str(&json).unwrap();
        let steps: Vec<u64> = export.frames.iter().map(|f| f.time_step).collect();
        assert_eq!(steps, vec![0, 2, 4]);
        assert!(export.summary.is_some());
    }
}
