//! Name-to-factory registries for nodes, policies, movements and selectors.
//!
//! Scenario files name their strategies; the registry turns a name into a
//! fresh instance or a [`SimError::Configuration`] if nothing is registered
//! under it.

use crate::bandit::EpsilonGreedy;
use camnet_core::{
    AuctionNode, AuctionState, Broadcast, Brownian, CommunicationPolicy, DecisionNode, Fix, MovementParams,
    MovementStrategy, NodeKind, Smooth, Step, StrategySelector, Straight, Waypoints,
};
use camnet_env::SimError;
use nalgebra::Point2;
use std::collections::BTreeMap;

type NodeFactory = Box<dyn Fn(Box<dyn CommunicationPolicy>, AuctionState) -> Box<dyn DecisionNode> + Send + Sync>;
type CommFactory = Box<dyn Fn() -> Box<dyn CommunicationPolicy> + Send + Sync>;
type MovementFactory = Box<dyn Fn(&MovementParams) -> Result<Box<dyn MovementStrategy>, SimError> + Send + Sync>;
type SelectorFactory = Box<dyn Fn(&SelectorParams) -> Box<dyn StrategySelector> + Send + Sync>;

/// Policies by scenario index.
pub const COMM_BY_INDEX: [&str; 4] = ["broadcast", "smooth", "step", "fix"];

/// Strategy index table used by selectors.
///
/// ```text
///   0 active/broadcast    3 passive/broadcast
///   1 active/smooth       4 passive/smooth
///   2 active/step         5 passive/step
/// ```
pub const STRATEGY_TABLE: [(NodeKind, &str); 6] = [
    (NodeKind::Active, "broadcast"),
    (NodeKind::Active, "smooth"),
    (NodeKind::Active, "step"),
    (NodeKind::Passive, "broadcast"),
    (NodeKind::Passive, "smooth"),
    (NodeKind::Passive, "step"),
];

/// Node kind and policy name for a strategy index.
pub fn strategy(index: usize) -> Option<(NodeKind, &'static str)> {
    STRATEGY_TABLE.get(index).copied()
}

/// Strategy index of a node kind and policy, if the pair is in the table.
pub fn strategy_index(kind: NodeKind, comm: &str) -> Option<usize> {
    STRATEGY_TABLE.iter().position(|(k, c)| *k == kind && *c == comm)
}

/// Parameters handed to selector factories.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorParams {
    pub arms: usize,
    pub epsilon: f64,
    pub alpha: f64,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            arms: STRATEGY_TABLE.len(),
            epsilon: 0.1,
            alpha: 0.5,
        }
    }
}

pub struct StrategyRegistry {
    nodes: BTreeMap<String, NodeFactory>,
    comms: BTreeMap<String, CommFactory>,
    movements: BTreeMap<String, MovementFactory>,
    selectors: BTreeMap<String, SelectorFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            nodes: BTreeMap::new(),
            comms: BTreeMap::new(),
            movements: BTreeMap::new(),
            selectors: BTreeMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register_node("active", |comm, state| {
            Box::new(AuctionNode::with_state(NodeKind::Active, comm, state))
        });
        self.register_node("passive", |comm, state| {
            Box::new(AuctionNode::with_state(NodeKind::Passive, comm, state))
        });

        self.register_comm("broadcast", || Box::new(Broadcast));
        self.register_comm("smooth", || Box::new(Smooth::new()));
        self.register_comm("step", || Box::new(Step));
        self.register_comm("fix", || Box::new(Fix::new()));

        self.register_movement("straight", |p| {
            Ok(Box::new(Straight::new(point(p.position), p.heading, p.speed)))
        });
        self.register_movement("waypoints", |p| {
            let waypoints = p.waypoints.iter().copied().map(point).collect();
            Ok(Box::new(Waypoints::new(point(p.position), p.speed, waypoints)?))
        });
        self.register_movement("brownian", |p| {
            Ok(Box::new(Brownian::new(point(p.position), p.heading, p.speed, p.mean, p.std)?))
        });

        self.register_selector("epsilon_greedy", |p| Box::new(EpsilonGreedy::new(p.arms, p.epsilon, p.alpha)));
    }

    pub fn register_node<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Box<dyn CommunicationPolicy>, AuctionState) -> Box<dyn DecisionNode> + Send + Sync + 'static,
    {
        self.nodes.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn register_comm<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn CommunicationPolicy> + Send + Sync + 'static,
    {
        self.comms.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn register_movement<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&MovementParams) -> Result<Box<dyn MovementStrategy>, SimError> + Send + Sync + 'static,
    {
        self.movements.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn register_selector<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&SelectorParams) -> Box<dyn StrategySelector> + Send + Sync + 'static,
    {
        self.selectors.insert(name.to_lowercase(), Box::new(factory));
    }

    /// Builds a decision node around `comm`, adopting `state`.
    pub fn create_node(
        &self,
        name: &str,
        comm: Box<dyn CommunicationPolicy>,
        state: AuctionState,
    ) -> Result<Box<dyn DecisionNode>, SimError> {
        self.nodes
            .get(&name.to_lowercase())
            .map(|factory| factory(comm, state))
            .ok_or_else(|| unknown("decision node", name, self.nodes.keys()))
    }

    pub fn create_comm(&self, name: &str) -> Result<Box<dyn CommunicationPolicy>, SimError> {
        self.comms
            .get(&name.to_lowercase())
            .map(|factory| factory())
            .ok_or_else(|| unknown("communication policy", name, self.comms.keys()))
    }

    /// Builds the policy at a scenario index (see [`COMM_BY_INDEX`]).
    pub fn create_comm_by_index(&self, index: usize) -> Result<Box<dyn CommunicationPolicy>, SimError> {
        let name = COMM_BY_INDEX
            .get(index)
            .ok_or_else(|| SimError::configuration(format!("communication index {} out of range", index)))?;
        self.create_comm(name)
    }

    pub fn create_movement(&self, name: &str, params: &MovementParams) -> Result<Box<dyn MovementStrategy>, SimError> {
        let factory = self
            .movements
            .get(&name.to_lowercase())
            .ok_or_else(|| unknown("movement", name, self.movements.keys()))?;
        factory(params)
    }

    pub fn create_selector(&self, name: &str, params: &SelectorParams) -> Result<Box<dyn StrategySelector>, SimError> {
        self.selectors
            .get(&name.to_lowercase())
            .map(|factory| factory(params))
            .ok_or_else(|| unknown("strategy selector", name, self.selectors.keys()))
    }

    /// Builds the node and policy for a strategy index around `state`.
    pub fn create_strategy(&self, index: usize, state: AuctionState) -> Result<Box<dyn DecisionNode>, SimError> {
        let (kind, comm) =
            strategy(index).ok_or_else(|| SimError::configuration(format!("strategy index {} out of range", index)))?;
        self.create_node(kind.name(), self.create_comm(comm)?, state)
    }

    pub fn list_nodes(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn list_comms(&self) -> Vec<String> {
        self.comms.keys().cloned().collect()
    }

    pub fn list_movements(&self) -> Vec<String> {
        self.movements.keys().cloned().collect()
    }

    pub fn list_selectors(&self) -> Vec<String> {
        self.selectors.keys().cloned().collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn point(p: [f64; 2]) -> Point2<f64> {
    Point2::new(p[0], p[1])
}

fn unknown<'a>(what: &str, name: &str, known: impl Iterator<Item = &'a String>) -> SimError {
    let known: Vec<&str> = known.map(String::as_str).collect();
    SimError::configuration(format!("unknown {} `{}` (known: {})", what, name, known.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MovementParams {
        MovementParams {
            position: [1.0, 2.0],
            heading: 0.0,
            speed: 0.5,
            waypoints: Vec::new(),
            mean: 0.0,
            std: 1.0,
        }
    }

    #[test]
    fn test_strategy_table_round_trips() {
        for index in 0..STRATEGY_TABLE.len() {
            let (kind, comm) = strategy(index).unwrap();
            assert_eq!(strategy_index(kind, comm), Some(index));
        }
        assert_eq!(strategy_index(NodeKind::Active, "smooth"), Some(1));
        assert_eq!(strategy_index(NodeKind::Passive, "step"), Some(5));
        assert_eq!(strategy_index(NodeKind::Active, "fix"), None);
        assert!(strategy(6).is_none());
    }

    #[test]
    fn test_builtin_names() {
        let registry = StrategyRegistry::new();
        assert_eq!(registry.list_nodes(), vec!["active", "passive"]);
        assert_eq!(registry.list_comms(), vec!["broadcast", "fix", "smooth", "step"]);
        assert_eq!(registry.list_movements(), vec!["brownian", "straight", "waypoints"]);
        assert_eq!(registry.list_selectors(), vec!["epsilon_greedy"]);
    }

    #[test]
    fn test_create_is_case_insensitive() {
        let registry = StrategyRegistry::new();
        assert_eq!(registry.create_comm("Step").unwrap().name(), "step");
        assert_eq!(registry.create_comm_by_index(1).unwrap().name(), "smooth");
        assert!(registry.create_comm_by_index(4).is_err());
    }

    #[test]
    fn test_unknown_names_are_configuration_errors() {
        let registry = StrategyRegistry::new();
        let err = registry.create_movement("teleport", &params()).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
        assert!(err.to_string().contains("teleport"));
        assert!(registry.create_comm("gossip").is_err());
        assert!(registry.create_selector("ucb", &SelectorParams::default()).is_err());
    }

    #[test]
    fn test_movement_factories() {
        let registry = StrategyRegistry::new();
        let straight = registry.create_movement("straight", &params()).unwrap();
        assert_eq!(straight.name(), "straight");
        assert_eq!(straight.position(), Point2::new(1.0, 2.0));

        // no waypoints given
        assert!(registry.create_movement("waypoints", &params()).is_err());

        let mut with_points = params();
        with_points.waypoints = vec![[0.0, 0.0], [5.0, 0.0]];
        assert_eq!(registry.create_movement("waypoints", &with_points).unwrap().name(), "waypoints");
    }

    #[test]
    fn test_create_strategy_keeps_state() {
        let registry = StrategyRegistry::new();
        let mut state = AuctionState::default();
        state.take_ownership(camnet_env::Features::scalar(0.5), 0.7);

        let node = registry.create_strategy(4, state).unwrap();
        assert_eq!(node.kind(), NodeKind::Passive);
        assert_eq!(node.comm().name(), "smooth");
        assert_eq!(node.owned_objects().len(), 1);
    }
}
