//! CamNet Simulator - deterministic runs of a self-organising camera network
//!
//! The engine owns every camera and target and advances them in discrete
//! ticks. All randomness comes from one seed split into independent streams,
//! so a scenario and a seed always reproduce the same run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SimulationEngine                        │
//! │  ┌─────────────┐ ┌────────────────┐ ┌──────────────────┐    │
//! │  │RandomStreams│ │StrategyRegistry│ │GlobalRegistration│    │
//! │  └─────────────┘ └────────────────┘ └──────────────────┘    │
//! │       │                                                     │
//! │  ┌────▼────┐   Switchboard   ┌─────────┐                    │
//! │  │ Camera  │◄───────────────►│ Camera  │     ...            │
//! │  │  C1     │   (messages)    │  C2     │                    │
//! │  └─────────┘                 └─────────┘                    │
//! │       ▲                           ▲                         │
//! │  ┌────┴───────────────────────────┴────┐                    │
//! │  │        TraceableObjects (targets)   │                    │
//! │  └─────────────────────────────────────┘                    │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            ▼
//!                 RunStatistics (memory / CSV)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use camnet_sim::{ScenarioRunner, SimConfig, StaticScenarioLoader, ScenarioSettings};
//!
//! let config = SimConfig::default().with_seed(42).with_failure_rate(0.05);
//! let runner = ScenarioRunner::new(config, 1000);
//! let result = runner.run(&StaticScenarioLoader(ScenarioSettings::random("demo", 6, 4)))?;
//! println!("{}", result.summary);
//! ```

pub mod bandit;
pub mod config;
pub mod exporter;
pub mod registration;
pub mod registry;
pub mod runner;
pub mod scenarios;
pub mod statistics;
pub mod streams;
pub mod world;

pub use bandit::EpsilonGreedy;
pub use config::{ParamFile, ParamFileError, SimConfig};
pub use exporter::{CameraFrame, SimExport, SimFrame, TargetFrame};
pub use registration::GlobalRegistration;
pub use registry::{SelectorParams, StrategyRegistry, COMM_BY_INDEX, STRATEGY_TABLE};
pub use runner::{RunResult, ScenarioRunner};
pub use scenarios::{
    CameraChange, CameraSettings, EventAction, JsonScenarioLoader, ScenarioEvent, ScenarioLoader, ScenarioSettings,
    StaticScenarioLoader, TargetSettings, VisionGraphSettings,
};
pub use statistics::{AgentRow, NetworkRow, RunStatistics};
pub use streams::RandomStreams;
pub use world::SimulationEngine;
