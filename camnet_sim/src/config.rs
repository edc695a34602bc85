//! Simulation configuration and parameter files.

use camnet_core::{AuctionParams, DecisionNode, FailsafeConfig};
use camnet_env::SimError;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Per-tick probability of a random camera failure (None = no failures)
    pub failure_rate: Option<f64>,

    /// Probability that a failing camera also loses its state
    pub reset_probability: f64,

    /// Longest random outage in ticks
    pub max_offline_ticks: u32,

    /// Inter-camera message delay in ticks (0 = immediate)
    pub message_delay: u32,

    /// Advertise unowned targets through the central registry
    pub global_registration: bool,

    /// Movement strategy forced onto every target
    pub movement: Option<String>,

    /// Exploration rate of the epsilon-greedy selector
    pub epsilon: f64,

    /// Utility weight in the selector reward (overhead gets 1 - alpha)
    pub alpha: f64,

    /// Fail-safe broadcast settings for threshold policies
    pub failsafe: FailsafeConfig,

    /// Auction defaults for every decision node
    pub auction: AuctionParams,

    /// Resource pool per camera
    pub camera_resources: f64,

    /// Prefix for statistics and selector CSV files (None = in memory only)
    pub output: Option<PathBuf>,

    /// `key = value` overrides applied to every new decision node
    pub param_file: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            failure_rate: None,
            reset_probability: 0.5,
            max_offline_ticks: 10,
            message_delay: 0,
            global_registration: false,
            movement: None,
            epsilon: 0.1,
            alpha: 0.5,
            failsafe: FailsafeConfig::default(),
            auction: AuctionParams::default(),
            camera_resources: 1.0,
            output: None,
            param_file: None,
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = Some(rate);
        self
    }

    pub fn with_reset_probability(mut self, probability: f64) -> Self {
        self.reset_probability = probability;
        self
    }

    pub fn with_message_delay(mut self, delay: u32) -> Self {
        self.message_delay = delay;
        self
    }

    pub fn with_global_registration(mut self, enabled: bool) -> Self {
        self.global_registration = enabled;
        self
    }

    pub fn with_movement(mut self, movement: impl Into<String>) -> Self {
        self.movement = Some(movement.into());
        self
    }

    pub fn with_bandit(mut self, epsilon: f64, alpha: f64) -> Self {
        self.epsilon = epsilon;
        self.alpha = alpha;
        self
    }

    pub fn with_failsafe(mut self, failsafe: FailsafeConfig) -> Self {
        self.failsafe = failsafe;
        self
    }

    pub fn with_output(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.output = Some(prefix.into());
        self
    }

    pub fn with_param_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.param_file = Some(path.into());
        self
    }

    /// Rejects values no run can start with.
    pub fn validate(&self) -> Result<(), SimError> {
        if let Some(rate) = self.failure_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(SimError::configuration(format!("failure rate {} not in [0, 1]", rate)));
            }
        }
        if !(0.0..=1.0).contains(&self.reset_probability) {
            return Err(SimError::configuration(format!(
                "reset probability {} not in [0, 1]",
                self.reset_probability
            )));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(SimError::configuration(format!("epsilon {} not in [0, 1]", self.epsilon)));
        }
        if self.max_offline_ticks == 0 {
            return Err(SimError::configuration("max offline ticks must be positive"));
        }
        Ok(())
    }
}

/// A malformed parameter file.
#[derive(Debug, Error, PartialEq)]
pub enum ParamFileError {
    #[error("line {line}: expected `key = value`, got `{text}`")]
    MalformedLine { line: usize, text: String },

    #[error("parameter `{key}` = `{value}` was rejected by the decision node")]
    Rejected { key: String, value: String },

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

impl From<ParamFileError> for SimError {
    fn from(err: ParamFileError) -> Self {
        SimError::configuration(err.to_string())
    }
}

/// Parsed `key = value` overrides for decision nodes.
///
/// ```text
/// # auction tuning
/// auction_duration = 3
/// failsafe = true
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamFile {
    entries: Vec<(String, String)>,
}

impl ParamFile {
    /// Parses parameter text. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, ParamFileError> {
        let mut entries = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let malformed = || ParamFileError::MalformedLine {
                line: i + 1,
                text: raw.trim().to_string(),
            };
            let (key, value) = line.split_once('=').ok_or_else(malformed)?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(malformed());
            }
            entries.push((key.to_string(), value.to_string()));
        }
        Ok(Self { entries })
    }

    /// Reads and parses a parameter file.
    pub fn load(path: &Path) -> Result<Self, ParamFileError> {
        let text = fs::read_to_string(path).map_err(|e| ParamFileError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Applies every entry in order; the first rejected one aborts.
    pub fn apply(&self, node: &mut dyn DecisionNode) -> Result<(), ParamFileError> {
        for (key, value) in &self.entries {
            if !node.set_param(key, value) {
                return Err(ParamFileError::Rejected {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}
