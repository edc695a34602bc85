//! Vision graph: how likely a neighbour is to be useful for a target.

use camnet_env::Features;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Link strength assumed for pairs the graph knows nothing about.
pub const DEFAULT_LINK_STRENGTH: f64 = 0.1;

/// Weighted relation `(agent, target) → probability`.
///
/// Per-target entries override per-agent links. Per-agent links are what
/// scenario files seed the graph with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionGraph {
    links: BTreeMap<String, f64>,
    #[serde(skip)]
    per_target: BTreeMap<(String, Features), f64>,
}

impl VisionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the link strength to `agent` for every target.
    pub fn set_link(&mut self, agent: impl Into<String>, strength: f64) {
        self.links.insert(agent.into(), strength.clamp(0.0, 1.0));
    }

    /// Sets the strength for one (agent, target) pair.
    pub fn set(&mut self, agent: impl Into<String>, target: &Features, strength: f64) {
        self.per_target
            .insert((agent.into(), target.clone()), strength.clamp(0.0, 1.0));
    }

    /// Explicit strength for the pair, if any.
    pub fn get(&self, agent: &str, target: &Features) -> Option<f64> {
        self.per_target
            .get(&(agent.to_string(), target.clone()))
            .or_else(|| self.links.get(agent))
            .copied()
    }

    /// Strength for the pair, falling back to [`DEFAULT_LINK_STRENGTH`].
    pub fn strength(&self, agent: &str, target: &Features) -> f64 {
        self.get(agent, target).unwrap_or(DEFAULT_LINK_STRENGTH)
    }

    /// Raises the pair's strength by `amount` (capped at 1).
    pub fn strengthen(&mut self, agent: &str, target: &Features, amount: f64) {
        let current = self.get(agent, target).unwrap_or(0.0);
        self.set(agent, target, current + amount);
    }

    /// Multiplies every per-target entry by `factor` (pheromone decay).
    pub fn evaporate(&mut self, factor: f64) {
        for v in self.per_target.values_mut() {
            *v *= factor;
        }
    }

    /// Drops everything known about `agent`.
    pub fn forget_agent(&mut self, agent: &str) {
        self.links.remove(agent);
        self.per_target.retain(|(a, _), _| a != agent);
    }

    /// Drops everything known about `target`.
    pub fn forget_target(&mut self, target: &Features) {
        self.per_target.retain(|(_, t), _| t != target);
    }

    /// Agents with a per-agent link.
    pub fn linked_agents(&self) -> impl Iterator<Item = (&str, f64)> {
        self.links.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.per_target.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_precedence() {
        let t = Features::scalar(0.111);
        let mut vg = VisionGraph::new();
        assert_eq!(vg.get("C1", &t), None);
        assert_eq!(vg.strength("C1", &t), DEFAULT_LINK_STRENGTH);

        vg.set_link("C1", 1.0);
        assert_eq!(vg.strength("C1", &t), 1.0);

        vg.set("C1", &t, 0.4);
        assert_eq!(vg.strength("C1", &t), 0.4);
        assert_eq!(vg.strength("C1", &Features::scalar(0.222)), 1.0);
    }

    #[test]
    fn test_strengthen_and_evaporate() {
        let t = Features::scalar(1.0);
        let mut vg = VisionGraph::new();
        vg.strengthen("C2", &t, 0.7);
        vg.strengthen("C2", &t, 0.7);
        assert_eq!(vg.strength("C2", &t), 1.0);

        vg.evaporate(0.5);
        assert_eq!(vg.strength("C2", &t), 0.5);
    }

    #[test]
    fn test_forget() {
        let t = Features::scalar(1.0);
        let mut vg = VisionGraph::new();
        vg.set_link("C1", 0.9);
        vg.set("C1", &t, 0.9);
        vg.set("C2", &t, 0.9);

        vg.forget_agent("C1");
        assert_eq!(vg.get("C1", &t), None);
        vg.forget_target(&t);
        assert_eq!(vg.get("C2", &t), None);
        assert!(vg.is_empty());
    }
}
