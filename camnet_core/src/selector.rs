//! Strategy-selector contract (reward-learning "bandit solver").

use camnet_env::RandomSource;
use std::fmt;

/// Learns which strategy index pays off and proposes the next one.
pub trait StrategySelector: fmt::Debug {
    /// Registry identifier.
    fn name(&self) -> &'static str;

    /// Chooses the strategy index to run next.
    fn select_action(&mut self, rng: &mut dyn RandomSource) -> usize;

    /// Feeds back the outcome of the last chosen action.
    ///
    /// `extra` carries the number of owned targets when available.
    fn set_current_reward(&mut self, utility: f64, overhead: f64, extra: Option<f64>);

    /// Named metric series, one value per reward call.
    fn results(&self) -> Vec<(String, Vec<f64>)>;

    fn clone_box(&self) -> Box<dyn StrategySelector>;
}

impl Clone for Box<dyn StrategySelector> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
