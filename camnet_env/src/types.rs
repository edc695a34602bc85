//! Common types shared by agents, policies and the simulation harness.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identity key of a target.
///
/// Targets are referred to by value everywhere outside the engine, so two
/// feature vectors are the same target iff they are element-wise equal.
/// Ordering is total (`f64::total_cmp`) which lets feature vectors key
/// ordered maps and keeps iteration order reproducible across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(Vec<f64>);

impl Features {
    /// Creates a feature vector from its components.
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Creates a single-component feature vector.
    pub fn scalar(value: f64) -> Self {
        Self(vec![value])
    }

    /// Returns the components.
    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

impl PartialEq for Features {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Features {}

impl PartialOrd for Features {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Features {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl std::hash::Hash for Features {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            v.to_bits().hash(state);
        }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.3}", v)?;
        }
        write!(f, "]")
    }
}

/// Purpose of a random draw.
///
/// Each purpose is backed by its own stream so that consuming draws for one
/// concern never shifts the sequence seen by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RandomUse {
    /// Placement, movement and everything else not listed below
    Universal,
    /// Multicast threshold draws
    Communication,
    /// Camera failure injection
    Error,
    /// Strategy selection
    Learning,
}

impl RandomUse {
    /// All purposes, in stream-number order.
    pub const ALL: [RandomUse; 4] = [
        RandomUse::Universal,
        RandomUse::Communication,
        RandomUse::Error,
        RandomUse::Learning,
    ];

    /// Stream number of this purpose.
    pub fn stream_id(self) -> u64 {
        match self {
            RandomUse::Universal => 0,
            RandomUse::Communication => 1,
            RandomUse::Error => 2,
            RandomUse::Learning => 3,
        }
    }
}

/// Kind of an inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Ask the recipient to look for a target
    StartSearch,
    /// Retract an earlier StartSearch
    StopSearch,
    /// Hand ownership of a target to the recipient
    StartTracking,
    /// Reply to a StartSearch carrying the bidder's confidence
    Bid,
    /// Returned to the sender instead of delivering to an unreachable recipient
    ErrorBadDestinationAddress,
}

/// A message exchanged between agents.
///
/// Value object: once sent it is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sender name ("" = injected by the engine)
    pub from: String,

    /// Recipient name
    pub to: String,

    /// Message kind
    pub kind: MessageKind,

    /// Target this message is about
    pub payload: Option<Features>,

    /// Bid value or handover price
    pub value: Option<f64>,
}

impl Message {
    /// Creates a message without a value.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
        payload: Option<Features>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            payload,
            value: None,
        }
    }

    /// Attaches a value (bid or price).
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Builds the routing error returned to `from` when `to` is unreachable.
    pub fn bad_destination(from: impl Into<String>, to: impl Into<String>, payload: Option<Features>) -> Self {
        Self::new(from, to, MessageKind::ErrorBadDestinationAddress, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_features_equality_is_elementwise() {
        let a = Features::new(vec![0.111, 2.0]);
        let b = Features::new(vec![0.111, 2.0]);
        let c = Features::new(vec![0.111, 2.5]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Features::scalar(1.0), Features::new(vec![1.0, 0.0]));
    }

    #[test]
    fn test_features_key_ordered_maps() {
        let mut map = BTreeMap::new();
        map.insert(Features::scalar(0.333), "c");
        map.insert(Features::scalar(0.111), "a");
        map.insert(Features::scalar(0.222), "b");

        let order: Vec<_> = map.values().copied().collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(map.get(&Features::scalar(0.222)), Some(&"b"));
    }

    #[test]
    fn test_stream_ids_unique() {
        let mut ids: Vec<u64> = RandomUse::ALL.iter().map(|u| u.stream_id()).collect();
        ids.dedup();
        assert_eq!(ids.len(), RandomUse::ALL.len());
    }

    #[test]
    fn test_bad_destination_message() {
        let msg = Message::bad_destination("C1", "C9", Some(Features::scalar(1.0)));
        assert_eq!(msg.kind, MessageKind::ErrorBadDestinationAddress);
        assert_eq!(msg.from, "C1");
        assert_eq!(msg.to, "C9");
        assert!(msg.value.is_none());
    }
}
