//! Statistics collaborator contract.

use crate::error::SimError;

/// Sink for per-tick simulation metrics.
///
/// Recording calls are infallible and buffer into the current timestep;
/// only committing a timestep and closing touch the output and may fail.
/// Callers log those failures and carry on.
pub trait Statistics {
    /// Notes that at least one agent saw at least one target this tick.
    fn add_visible(&mut self);

    /// Records an agent's utility for this tick.
    fn add_utility(&mut self, value: f64, agent: &str);

    /// Records messages sent by an agent this tick.
    fn add_communication(&mut self, value: f64, agent: &str);

    /// Records a completed handover.
    fn add_handover(&mut self, value: f64);

    /// Records the network-wide FOV overlap area.
    fn add_overlap(&mut self, value: f64);

    /// Records an agent's summed tracking confidence.
    fn add_confidence(&mut self, value: f64, agent: &str);

    /// Records the proportion of visible targets an agent does not track.
    fn add_proportion(&mut self, value: f64, agent: &str);

    /// Records the reward fed to an agent's strategy selector.
    fn set_reward(&mut self, utility: f64, overhead: f64, agent: &str);

    /// Records the strategy index an agent switched to.
    fn set_strat(&mut self, strategy: usize, agent: &str);

    /// Commits the current timestep and starts the next one.
    fn next_time_step(&mut self) -> Result<(), SimError>;

    /// Current timestep (number of committed steps).
    fn time_step(&self) -> u64;

    /// One-line summary of the run so far.
    fn summary(&self) -> String;

    /// Flushes and closes any output.
    fn close(&mut self) -> Result<(), SimError>;
}
