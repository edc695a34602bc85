//! Statistics recorder with optional CSV output.
//!
//! Two series are kept per run:
//!
//! ```text
//! <prefix>_network.csv   one row per tick (network totals)
//! <prefix>_agents.csv    one row per tick and camera
//! ```

use camnet_env::{SimError, Statistics};
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Network totals for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkRow {
    pub time_step: u64,
    pub visible: bool,
    pub utility: f64,
    pub communication: f64,
    pub handovers: f64,
    pub overlap: f64,
}

/// One camera's values for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentRow {
    pub time_step: u64,
    pub agent: String,
    pub utility: f64,
    pub communication: f64,
    pub confidence: f64,
    pub proportion: f64,
    pub reward_utility: Option<f64>,
    pub reward_overhead: Option<f64>,
    pub strategy: Option<usize>,
}

struct CsvSink {
    network: Writer<File>,
    agents: Writer<File>,
}

impl CsvSink {
    fn create(prefix: &Path) -> Result<Self, SimError> {
        if let Some(dir) = prefix.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(SimError::statistics)?;
        }
        let network = Writer::from_path(with_suffix(prefix, "_network.csv")).map_err(SimError::statistics)?;
        let agents = Writer::from_path(with_suffix(prefix, "_agents.csv")).map_err(SimError::statistics)?;
        Ok(Self { network, agents })
    }

    fn write(&mut self, network: &NetworkRow, agents: &[AgentRow]) -> Result<(), SimError> {
        self.network.serialize(network).map_err(SimError::statistics)?;
        for row in agents {
            self.agents.serialize(row).map_err(SimError::statistics)?;
        }
        self.network.flush().map_err(SimError::statistics)?;
        self.agents.flush().map_err(SimError::statistics)?;
        Ok(())
    }
}

/// Appends `suffix` to the file name of `prefix`.
pub(crate) fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    prefix.with_file_name(name)
}

/// Running sums over committed ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Totals {
    utility: f64,
    communication: f64,
    handovers: f64,
    overlap: f64,
    visible_steps: u64,
}

impl Totals {
    fn add(&mut self, row: &NetworkRow) {
        self.utility += row.utility;
        self.communication += row.communication;
        self.handovers += row.handovers;
        self.overlap += row.overlap;
        if row.visible {
            self.visible_steps += 1;
        }
    }
}

/// Records per-tick metrics in memory or as CSV.
///
/// Rows stay in memory only when there is no CSV sink. Totals are kept
/// either way.
pub struct RunStatistics {
    seed: u64,
    time_step: u64,
    current: NetworkRow,
    agents: BTreeMap<String, AgentRow>,
    totals: Totals,
    network_history: Vec<NetworkRow>,
    agent_history: Vec<AgentRow>,
    sink: Option<CsvSink>,
}

impl RunStatistics {
    /// Keeps everything in memory.
    pub fn in_memory(seed: u64) -> Self {
        Self {
            seed,
            time_step: 0,
            current: NetworkRow::default(),
            agents: BTreeMap::new(),
            totals: Totals::default(),
            network_history: Vec::new(),
            agent_history: Vec::new(),
            sink: None,
        }
    }

    /// Writes `<prefix>_network.csv` and `<prefix>_agents.csv` instead of
    /// keeping rows in memory.
    pub fn with_csv(seed: u64, prefix: &Path) -> Result<Self, SimError> {
        let mut stats = Self::in_memory(seed);
        stats.sink = Some(CsvSink::create(prefix)?);
        Ok(stats)
    }

    /// Committed network rows; empty when writing CSV.
    pub fn network_history(&self) -> &[NetworkRow] {
        &self.network_history
    }

    pub fn agent_history(&self) -> &[AgentRow] {
        &self.agent_history
    }

    /// Sum of network utility over all committed ticks.
    pub fn total_utility(&self) -> f64 {
        self.totals.utility
    }

    /// Sum of messages over all committed ticks.
    pub fn total_communication(&self) -> f64 {
        self.totals.communication
    }

    fn agent(&mut self, name: &str) -> &mut AgentRow {
        let time_step = self.time_step;
        self.agents.entry(name.to_string()).or_insert_with(|| AgentRow {
            time_step,
            agent: name.to_string(),
            ..Default::default()
        })
    }
}

impl Statistics for RunStatistics {
    fn add_visible(&mut self) {
        self.current.visible = true;
    }

    fn add_utility(&mut self, value: f64, agent: &str) {
        self.current.utility += value;
        self.agent(agent).utility += value;
    }

    fn add_communication(&mut self, value: f64, agent: &str) {
        self.current.communication += value;
        self.agent(agent).communication += value;
    }

    fn add_handover(&mut self, value: f64) {
        self.current.handovers += value;
    }

    fn add_overlap(&mut self, value: f64) {
        self.current.overlap += value;
    }

    fn add_confidence(&mut self, value: f64, agent: &str) {
        self.agent(agent).confidence += value;
    }

    fn add_proportion(&mut self, value: f64, agent: &str) {
        self.agent(agent).proportion = value;
    }

    fn set_reward(&mut self, utility: f64, overhead: f64, agent: &str) {
        let row = self.agent(agent);
        row.reward_utility = Some(utility);
        row.reward_overhead = Some(overhead);
    }

    fn set_strat(&mut self, strategy: usize, agent: &str) {
        self.agent(agent).strategy = Some(strategy);
    }

    fn next_time_step(&mut self) -> Result<(), SimError> {
        let mut row = std::mem::take(&mut self.current);
        row.time_step = self.time_step;
        let agents: Vec<AgentRow> = std::mem::take(&mut self.agents).into_values().collect();

        self.time_step += 1;
        self.totals.add(&row);
        match self.sink.as_mut() {
            Some(sink) => sink.write(&row, &agents),
            None => {
                self.network_history.push(row);
                self.agent_history.extend(agents);
                Ok(())
            }
        }
    }

    fn time_step(&self) -> u64 {
        self.time_step
    }

    fn summary(&self) -> String {
        format!(
            "seed={} steps={} utility={:.3} communication={} handovers={} visible_steps={} overlap={:.3}",
            self.seed,
            self.time_step,
            self.total_utility(),
            self.total_communication(),
            self.totals.handovers,
            self.totals.visible_steps,
            self.totals.overlap,
        )
    }

    fn close(&mut self) -> Result<(), SimError> {
        if let Some(mut sink) = self.sink.take() {
            debug!("closing statistics after {} steps", self.time_step);
            sink.network.flush().map_err(SimError::statistics)?;
            sink.agents.flush().map_err(SimError::statistics)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn temp_prefix(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("camnet_stats_{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_rows_commit_per_step() {
        let mut stats = RunStatistics::in_memory(1);
        stats.add_visible();
        stats.add_utility(0.5, "C1");
        stats.add_utility(0.25, "C2");
        stats.add_communication(3.0, "C1");
        stats.set_strat(2, "C1");
        stats.next_time_step().unwrap();

        stats.add_utility(1.0, "C1");
        stats.next_time_step().unwrap();

        assert_eq!(stats.time_step(), 2);
        let network = stats.network_history();
        assert_eq!(network[0].utility, 0.75);
        assert!(network[0].visible);
        assert!(!network[1].visible);
        assert_eq!(network[1].time_step, 1);

        let agents = stats.agent_history();
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0].agent, "C1");
        assert_eq!(agents[0].strategy, Some(2));
        assert_eq!(agents[0].communication, 3.0);
        assert_eq!(agents[2].time_step, 1);
        assert_eq!(stats.total_utility(), 1.75);
    }

    #[test]
    fn test_summary_mentions_totals() {
        let mut stats = RunStatistics::in_memory(42);
        stats.add_handover(1.0);
        stats.add_overlap(2.5);
        stats.next_time_step().unwrap();
        let summary = stats.summary();
        assert!(summary.contains("seed=42"));
        assert!(summary.contains("steps=1"));
        assert!(summary.contains("handovers=1"));
        assert!(summary.contains("overlap=2.500"));
    }

    #[test]
    fn test_csv_output() {
        let prefix = temp_prefix("run");
        let mut stats = RunStatistics::with_csv(7, &prefix).unwrap();
        stats.add_utility(0.5, "C1");
        stats.set_reward(0.5, 2.0, "C1");
        stats.next_time_step().unwrap();
        stats.close().unwrap();

        let network = std::fs::read_to_string(with_suffix(&prefix, "_network.csv")).unwrap();
        let mut lines = network.lines();
        assert_eq!(
            lines.next(),
            Some("time_step,visible,utility,communication,handovers,overlap")
        );
        assert_eq!(lines.next(), Some("0,false,0.5,0.0,0.0,0.0"));

        let agents = std::fs::read_to_string(with_suffix(&prefix, "_agents.csv")).unwrap();
        assert_eq!(agents.lines().count(), 2);
        assert!(agents.lines().nth(1).unwrap().starts_with("0,C1,0.5,"));
    }

    #[test]
    fn test_csv_run_keeps_only_totals() {
        let prefix = temp_prefix("long");
        let mut stats = RunStatistics::with_csv(3, &prefix).unwrap();
        for _ in 0..50 {
            stats.add_visible();
            stats.add_utility(0.5, "C1");
            stats.add_communication(2.0, "C1");
            stats.add_handover(1.0);
            stats.next_time_step().unwrap();
        }
        stats.close().unwrap();

        assert!(stats.network_history().is_empty());
        assert!(stats.agent_history().is_empty());
        assert_relative_eq!(stats.total_utility(), 25.0);
        assert_eq!(stats.total_communication(), 100.0);
        let summary = stats.summary();
        assert!(summary.contains("steps=50"));
        assert!(summary.contains("handovers=50"));
        assert!(summary.contains("visible_steps=50"));

        let network = std::fs::read_to_string(with_suffix(&prefix, "_network.csv")).unwrap();
        assert_eq!(network.lines().count(), 51);
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("out/run"), "_network.csv"),
            PathBuf::from("out/run_network.csv")
        );
    }
}
