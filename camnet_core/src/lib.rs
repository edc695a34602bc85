//! CamNet Core - Cooperative Target Tracking by Camera Agents
//!
//! Agent-side engines of the camera network:
//! 1. **Visibility**: distance and angle based confidence per camera
//! 2. **Dissemination**: broadcast and threshold-gated multicast policies
//! 3. **Ownership**: auction-based handover of targets between cameras
//! 4. **Coverage**: field-of-view overlap between camera pairs

pub mod camera;
pub mod comm_policy;
pub mod decision;
pub mod geometry;
pub mod selector;
pub mod target;
pub mod vision_graph;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use camera::{CameraAgent, CameraGeometry, Courier, OnlineState, Switchboard, OFFLINE_NAME};
pub use comm_policy::{
    Broadcast, CommunicationPolicy, FailsafeConfig, FailsafeCountdown, Fix, Smooth, Step, ThresholdLaw,
};
pub use decision::{AuctionNode, AuctionParams, AuctionState, DecisionNode, NodeKind};
pub use geometry::{fov_overlap, WorldBounds};
pub use selector::StrategySelector;
pub use target::{Brownian, MovementParams, MovementStrategy, Straight, TraceableObject, Waypoints};
pub use vision_graph::VisionGraph;
