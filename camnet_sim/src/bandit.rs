//! Epsilon-greedy strategy selector.

use camnet_core::StrategySelector;
use camnet_env::{RandomSource, RandomUse};
use std::collections::VecDeque;

/// Rewarded steps kept for [`StrategySelector::results`].
pub const DEFAULT_HISTORY: usize = 10_000;

/// Column names of one history row.
const COLUMNS: [&str; 5] = ["reward", "action", "utility", "overhead", "owned"];

/// Picks the best-rewarded strategy, exploring with probability `epsilon`.
///
/// Reward for the last action is `alpha * utility - (1 - alpha) * overhead`,
/// averaged per arm. All draws come from the learning stream. Only the
/// most recent rewarded steps are kept for export.
#[derive(Debug, Clone)]
pub struct EpsilonGreedy {
    epsilon: f64,
    alpha: f64,
    values: Vec<f64>,
    counts: Vec<u32>,
    last_action: Option<usize>,
    history: VecDeque<[f64; 5]>,
    history_limit: usize,
}

impl EpsilonGreedy {
    pub fn new(arms: usize, epsilon: f64, alpha: f64) -> Self {
        let arms = arms.max(1);
        Self {
            epsilon,
            alpha,
            values: vec![0.0; arms],
            counts: vec![0; arms],
            last_action: None,
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY,
        }
    }

    /// Keeps at most `limit` rewarded steps (0 keeps none).
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        while self.history.len() > limit {
            self.history.pop_front();
        }
        self
    }

    /// Mean reward per arm.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn last_action(&self) -> Option<usize> {
        self.last_action
    }

    fn greedy(&self) -> usize {
        let mut best = 0;
        for (arm, value) in self.values.iter().enumerate() {
            if *value > self.values[best] {
                best = arm;
            }
        }
        best
    }
}

impl StrategySelector for EpsilonGreedy {
    fn name(&self) -> &'static str {
        "epsilon_greedy"
    }

    fn select_action(&mut self, rng: &mut dyn RandomSource) -> usize {
        let explore = rng.next_f64(RandomUse::Learning) < self.epsilon;
        let action = if explore {
            rng.next_below(self.values.len(), RandomUse::Learning)
        } else {
            self.greedy()
        };
        self.last_action = Some(action);
        action
    }

    fn set_current_reward(&mut self, utility: f64, overhead: f64, extra: Option<f64>) {
        let Some(action) = self.last_action else {
            return;
        };
        let reward = self.alpha * utility - (1.0 - self.alpha) * overhead;
        self.counts[action] += 1;
        self.values[action] += (reward - self.values[action]) / self.counts[action] as f64;

        if self.history_limit == 0 {
            return;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history
            .push_back([reward, action as f64, utility, overhead, extra.unwrap_or(0.0)]);
    }

    fn results(&self) -> Vec<(String, Vec<f64>)> {
        COLUMNS
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), self.history.iter().map(|row| row[i]).collect()))
            .collect()
    }

    fn clone_box(&self) -> Box<dyn StrategySelector> {
        Box::new(self.clone())
    }
}
