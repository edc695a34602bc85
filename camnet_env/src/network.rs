//! Message transport contract for agents.

use crate::types::{Features, Message, MessageKind};

/// Outbound messaging interface handed to decision nodes and policies.
///
/// Delivery is synchronous and addressed by agent name. There is no wire
/// format: a message is handed directly to the recipient within the tick
/// or parked in the sender's delay queue.
///
/// # Implementations
///
/// - **Simulation**: the camera's outbound port, routing through the engine
/// - **Tests**: recorders that capture sent messages
pub trait Transport {
    /// Name of the sending agent.
    fn local_name(&self) -> &str;

    /// Current neighbour names, in a stable order.
    fn neighbours(&self) -> Vec<String>;

    /// Sends `kind` about `payload` to `to`.
    ///
    /// Returns the recipient's synchronous reply, or an
    /// `ErrorBadDestinationAddress` message when `to` is not a reachable
    /// neighbour. Delayed messages return `None`.
    fn send(&mut self, to: &str, kind: MessageKind, payload: Option<&Features>) -> Option<Message>;

    /// Sends a fully formed message (bids, handovers carrying a value).
    fn send_message(&mut self, message: Message) -> Option<Message>;

    /// True if accepted messages are queued rather than delivered at once.
    fn is_delayed(&self) -> bool {
        false
    }
}
