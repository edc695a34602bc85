//! Error types for the camera network simulator.

use crate::types::Features;
use thiserror::Error;

/// Result of the consistency audit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyViolation {
    /// No online agent tracks or searches the target
    #[error("target {0} is neither tracked nor searched")]
    Untracked(Features),

    /// More than one online agent claims ownership
    #[error("target {target} is tracked by several agents: {owners:?}")]
    MultipleOwners {
        target: Features,
        owners: Vec<String>,
    },

    /// An agent both tracks and searches the target
    #[error("target {target} is tracked by {agent} but still searched there")]
    OwnedWhileSearched { target: Features, agent: String },
}

/// Errors that can occur while configuring or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid scenario or parameter (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Detected by the consistency audit
    #[error("Consistency violation: {0}")]
    Consistency(#[from] ConsistencyViolation),

    /// Statistics output failed
    #[error("Statistics I/O error: {0}")]
    StatisticsIo(String),

    /// Scenario or export (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SimError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a statistics I/O error.
    pub fn statistics(err: impl std::fmt::Display) -> Self {
        Self::StatisticsIo(err.to_string())
    }

    /// Creates a serialization error.
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Returns true if this error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::configuration("camera C1 outside bounds");
        assert_eq!(err.to_string(), "Configuration error: camera C1 outside bounds");
        assert!(err.is_fatal());

        let err = SimError::statistics("disk full");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_consistency_conversion() {
        let err: SimError = ConsistencyViolation::Untracked(Features::scalar(0.111)).into();
        assert!(matches!(err, SimError::Consistency(ConsistencyViolation::Untracked(_))));
        assert!(err.to_string().contains("neither tracked nor searched"));

        let err = ConsistencyViolation::OwnedWhileSearched {
            target: Features::scalar(0.111),
            agent: "C1".to_string(),
        };
        assert!(err.to_string().contains("tracked by C1 but still searched"));
    }
}
