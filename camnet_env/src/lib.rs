//! Camera Network Environment Layer
//!
//! Shared vocabulary and collaborator contracts for the camera network
//! simulator. Agent-side engines in `camnet_core` depend only on these
//! traits, so they run unchanged under the deterministic harness in
//! `camnet_sim` or against test doubles.
//!
//! # Core Concept
//!
//! Every interaction an agent has with the outside world goes through a
//! contract defined here:
//! - Randomness (`RandomSource`, one stream per `RandomUse`)
//! - Messaging (`Transport`, synchronous and addressed by name)
//! - Metrics (`Statistics`)
//!
//! Deriving all randomness from one master seed makes every run
//! reproducible from its seed number.

mod context;
mod error;
mod network;
mod statistics;
mod types;

pub use context::RandomSource;
pub use error::{ConsistencyViolation, SimError};
pub use network::Transport;
pub use statistics::Statistics;
pub use types::{Features, Message, MessageKind, RandomUse};
