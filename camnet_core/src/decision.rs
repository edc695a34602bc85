//! Decision nodes: per-agent auction and ownership state.
//!
//! A node owns the targets its camera tracks and the searches it was asked
//! to run. Ownership moves between cameras through a short auction:
//!
//! 1. The owner advertises a target (StartSearch via its policy).
//! 2. Neighbours that can see the target reply with a Bid.
//! 3. After `auction_duration` ticks the owner hands the target to the best
//!    bidder (StartTracking) if the bid beats its own confidence, then
//!    retracts the search (StopSearch).
//!
//! Active nodes auction every owned target continuously; passive nodes only
//! once their confidence drops below a threshold.

use crate::comm_policy::{CommunicationPolicy, Dissemination, FailsafeConfig, FailsafeCountdown, OutreachLedger};
use crate::selector::StrategySelector;
use crate::vision_graph::VisionGraph;
use camnet_env::{Features, Message, MessageKind, RandomSource, Transport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Flavour of the reference auction node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Active,
    Passive,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Active => "active",
            NodeKind::Passive => "passive",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tunable auction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionParams {
    /// Ticks an auction stays open
    pub auction_duration: u32,

    /// Passive nodes auction below this confidence
    pub passive_threshold: f64,

    /// Per-tick decay of learned vision graph entries
    pub evaporation: f64,

    /// Strength added to a link after a handover
    pub handover_increment: f64,

    /// Ticks after which a stale search is dropped (0 = never)
    pub search_timeout: u32,

    /// Maximum targets tracked at once (0 = unlimited)
    pub limit: usize,
}

impl Default for AuctionParams {
    fn default() -> Self {
        Self {
            auction_duration: 2,
            passive_threshold: 0.2,
            evaporation: 0.995,
            handover_increment: 0.25,
            search_timeout: 0,
            limit: 0,
        }
    }
}

/// A running search for a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    /// Who asked ("" = injected by the engine, claimable on sight)
    pub origin: String,

    /// Ticks since the request was last refreshed
    pub age: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct Auction {
    remaining: u32,
    best: Option<(String, f64)>,
}

/// Auction and ownership state carried across node swaps.
#[derive(Debug, Clone, Default)]
pub struct AuctionState {
    owned: BTreeMap<Features, f64>,
    searched: BTreeMap<Features, Search>,
    auctions: BTreeMap<Features, Auction>,
    graph: VisionGraph,
    ledger: OutreachLedger,
    selector: Option<Box<dyn StrategySelector>>,
    /// Delayed handovers still in flight: target -> (winner, price)
    pending: BTreeMap<Features, (String, f64)>,
    params: AuctionParams,
    received_utility: f64,
    paid_utility: f64,
    handovers: u32,
    bids: u32,
}

impl AuctionState {
    pub fn new(graph: VisionGraph, params: AuctionParams, failsafe: FailsafeConfig) -> Self {
        Self {
            graph,
            params,
            ledger: OutreachLedger::new(failsafe),
            ..Default::default()
        }
    }

    /// Owned targets with their current confidence.
    pub fn owned(&self) -> &BTreeMap<Features, f64> {
        &self.owned
    }

    /// Targets this node is searching for.
    pub fn searched(&self) -> &BTreeMap<Features, Search> {
        &self.searched
    }

    pub fn graph(&self) -> &VisionGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut VisionGraph {
        &mut self.graph
    }

    pub fn ledger(&self) -> &OutreachLedger {
        &self.ledger
    }

    pub fn params(&self) -> &AuctionParams {
        &self.params
    }

    pub fn selector(&self) -> Option<&dyn StrategySelector> {
        self.selector.as_deref()
    }

    pub fn selector_mut(&mut self) -> Option<&mut Box<dyn StrategySelector>> {
        self.selector.as_mut()
    }

    pub fn set_selector(&mut self, selector: Option<Box<dyn StrategySelector>>) {
        self.selector = selector;
    }

    /// Summed confidence of owned targets.
    pub fn utility(&self) -> f64 {
        self.owned.values().sum()
    }

    /// Price received for handovers this tick.
    pub fn received_utility(&self) -> f64 {
        self.received_utility
    }

    /// Price paid for handovers this tick.
    pub fn paid_utility(&self) -> f64 {
        self.paid_utility
    }

    /// Handovers completed this tick.
    pub fn handovers(&self) -> u32 {
        self.handovers
    }

    /// Bids placed this tick.
    pub fn bids(&self) -> u32 {
        self.bids
    }

    /// True if a delayed handover of `target` has not been delivered yet.
    pub fn handover_pending(&self, target: &Features) -> bool {
        self.pending.contains_key(target)
    }

    /// True if an auction for `target` is open.
    pub fn auctioning(&self, target: &Features) -> bool {
        self.auctions.contains_key(target)
    }

    fn under_limit(&self) -> bool {
        self.params.limit == 0 || self.owned.len() < self.params.limit
    }

    /// Starts tracking `target` (used for scenario seeding and handovers).
    pub fn take_ownership(&mut self, target: Features, confidence: f64) {
        self.searched.remove(&target);
        self.owned.insert(target, confidence);
    }

    /// Records that `origin` asked this node to search for `target`.
    pub fn record_search(&mut self, target: Features, origin: impl Into<String>) {
        self.searched.insert(
            target,
            Search {
                origin: origin.into(),
                age: 0,
            },
        );
    }

    /// Drops every trace of `target`.
    pub fn forget_target(&mut self, target: &Features) {
        self.owned.remove(target);
        self.searched.remove(target);
        self.auctions.remove(target);
        self.pending.remove(target);
        self.ledger.forget(target);
        self.graph.forget_target(target);
    }

    /// Drops every trace of `agent` from the graph and advertised sets.
    pub fn forget_agent(&mut self, agent: &str) {
        self.graph.forget_agent(agent);
        self.ledger.forget_agent(agent);
    }

    /// Clears per-tick counters.
    fn end_tick(&mut self) {
        self.received_utility = 0.0;
        self.paid_utility = 0.0;
        self.handovers = 0;
        self.bids = 0;
    }

    /// Applies one `key = value` parameter. Returns false if unknown or unparsable.
    pub fn set_param(&mut self, key: &str, value: &str) -> bool {
        let value = value.trim();
        match key.trim() {
            "auction_duration" => parse_into(value, &mut self.params.auction_duration),
            "passive_threshold" => parse_into(value, &mut self.params.passive_threshold),
            "evaporation" => parse_into(value, &mut self.params.evaporation),
            "handover_increment" => parse_into(value, &mut self.params.handover_increment),
            "search_timeout" => parse_into(value, &mut self.params.search_timeout),
            "limit" => parse_into(value, &mut self.params.limit),
            "failsafe" => {
                let mut failsafe = *self.ledger.failsafe();
                let ok = parse_into(value, &mut failsafe.enabled);
                self.ledger.set_failsafe(failsafe);
                ok
            }
            "steps_till_broadcast" => {
                let mut failsafe = *self.ledger.failsafe();
                let ok = parse_into(value, &mut failsafe.steps);
                self.ledger.set_failsafe(failsafe);
                ok
            }
            "failsafe_countdown" => {
                let countdown = match value {
                    "tick" => FailsafeCountdown::PerTick,
                    "attempt" => FailsafeCountdown::PerAttempt,
                    _ => return false,
                };
                let mut failsafe = *self.ledger.failsafe();
                failsafe.countdown = countdown;
                self.ledger.set_failsafe(failsafe);
                true
            }
            _ => false,
        }
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

/// What a node sees of its camera during one phase.
pub struct NodeContext<'a> {
    pub transport: &'a mut dyn Transport,
    pub rng: &'a mut dyn RandomSource,
    pub visible: &'a BTreeMap<Features, f64>,
}

/// Per-agent decision component.
///
/// The engine owns the camera, the camera owns its node, and the node only
/// reaches other cameras through the [`Transport`] in its [`NodeContext`].
pub trait DecisionNode: fmt::Debug {
    fn kind(&self) -> NodeKind;

    fn state(&self) -> &AuctionState;

    fn state_mut(&mut self) -> &mut AuctionState;

    fn comm(&self) -> &dyn CommunicationPolicy;

    fn set_comm(&mut self, comm: Box<dyn CommunicationPolicy>);

    /// Installs the policy against the current graph and `neighbours`.
    fn install_comm(&mut self, neighbours: &[String]);

    /// A delayed `StartTracking` sent by this node reached its recipient.
    fn handover_delivered(&mut self, message: &Message);

    /// A delayed `StartTracking` sent by this node was never delivered.
    fn handover_dropped(&mut self, message: &Message);

    /// Handles a message addressed to this node; may reply synchronously.
    fn receive_message(&mut self, message: &Message, visible: &BTreeMap<Features, f64>) -> Option<Message>;

    /// Advertises owned targets through the communication policy.
    fn advertise_tracked_objects(&mut self, ctx: &mut NodeContext<'_>);

    /// Ages pending searches.
    fn update_received_delay(&mut self);

    /// Advances open auctions and resolves those that closed.
    fn update_auction_duration(&mut self, ctx: &mut NodeContext<'_>);

    /// Claims unowned searched targets that came into view.
    fn check_if_searched_is_visible(&mut self, ctx: &mut NodeContext<'_>);

    /// End-of-tick housekeeping.
    fn update(&mut self);

    /// Copies this node's auction state into `target`.
    fn clone_state_into(&self, target: &mut dyn DecisionNode) {
        *target.state_mut() = self.state().clone();
    }

    fn set_param(&mut self, key: &str, value: &str) -> bool {
        self.state_mut().set_param(key, value)
    }

    fn owned_objects(&self) -> &BTreeMap<Features, f64> {
        self.state().owned()
    }

    fn searched_objects(&self) -> &BTreeMap<Features, Search> {
        self.state().searched()
    }

    fn utility(&self) -> f64 {
        self.state().utility()
    }

    fn received_utility(&self) -> f64 {
        self.state().received_utility()
    }

    fn paid_utility(&self) -> f64 {
        self.state().paid_utility()
    }

    fn bandit_solver(&self) -> Option<&dyn StrategySelector> {
        self.state().selector()
    }

    /// Summed confidence of owned targets.
    fn total_confidence(&self) -> f64 {
        self.state().utility()
    }

    /// Share of visible targets this node does not own.
    fn not_tracked_proportion(&self, visible: &BTreeMap<Features, f64>) -> f64 {
        if visible.is_empty() {
            return 0.0;
        }
        let owned = self.state().owned();
        let untracked = visible.keys().filter(|t| !owned.contains_key(*t)).count();
        untracked as f64 / visible.len() as f64
    }
}

/// Reference auction node, active or passive.
#[derive(Debug)]
pub struct AuctionNode {
    kind: NodeKind,
    state: AuctionState,
    comm: Box<dyn CommunicationPolicy>,
}

impl AuctionNode {
    pub fn new(kind: NodeKind, comm: Box<dyn CommunicationPolicy>) -> Self {
        Self::with_state(kind, comm, AuctionState::default())
    }

    pub fn with_state(kind: NodeKind, comm: Box<dyn CommunicationPolicy>, state: AuctionState) -> Self {
        Self { kind, state, comm }
    }

    /// Runs the policy for one message and absorbs any replies.
    fn disseminate(&mut self, kind: MessageKind, target: &Features, ctx: &mut NodeContext<'_>) {
        let mut out = Dissemination::new(
            &mut *ctx.transport,
            &mut *ctx.rng,
            &self.state.graph,
            &mut self.state.ledger,
        );
        self.comm.multicast(kind, target, &mut out);
        for reply in out.into_replies() {
            self.absorb_reply(&reply);
        }
    }

    fn absorb_reply(&mut self, reply: &Message) {
        match reply.kind {
            MessageKind::Bid => {
                let (Some(target), Some(bid)) = (&reply.payload, reply.value) else {
                    return;
                };
                if let Some(auction) = self.state.auctions.get_mut(target) {
                    let better = auction.best.as_ref().map_or(true, |(_, best)| bid > *best);
                    if better {
                        auction.best = Some((reply.from.clone(), bid));
                    }
                }
            }
            MessageKind::ErrorBadDestinationAddress => {
                debug!("{} unreachable, dropping its links", reply.to);
                if !self.comm.freezes_graph() {
                    self.state.graph.forget_agent(&reply.to);
                }
                self.state.ledger.forget_agent(&reply.to);
            }
            _ => {}
        }
    }

    /// Gives up `target` to `winner` once the offer has arrived.
    fn hand_over(&mut self, target: &Features, winner: &str, bid: f64) {
        self.state.owned.remove(target);
        self.state.received_utility += bid;
        self.state.handovers += 1;
        if !self.comm.freezes_graph() {
            let inc = self.state.params.handover_increment;
            self.state.graph.strengthen(winner, target, inc);
        }
    }

    fn resolve(&mut self, target: Features, auction: Auction, ctx: &mut NodeContext<'_>) {
        let own = ctx.visible.get(&target).copied().unwrap_or(0.0);
        if let Some((winner, bid)) = auction.best {
            if bid > own && self.state.owned.contains_key(&target) {
                let offer = Message::new(
                    ctx.transport.local_name(),
                    winner.clone(),
                    MessageKind::StartTracking,
                    Some(target.clone()),
                )
                .with_value(bid);
                match ctx.transport.send_message(offer) {
                    Some(err) if err.kind == MessageKind::ErrorBadDestinationAddress => {
                        self.absorb_reply(&err);
                    }
                    _ if ctx.transport.is_delayed() => {
                        debug!("{} offers {} to {} for {:.3}", ctx.transport.local_name(), target, winner, bid);
                        self.state.pending.insert(target.clone(), (winner, bid));
                    }
                    _ => {
                        debug!("{} hands {} to {} for {:.3}", ctx.transport.local_name(), target, winner, bid);
                        self.hand_over(&target, &winner, bid);
                    }
                }
            }
        }
        self.disseminate(MessageKind::StopSearch, &target, ctx);
    }
}

impl DecisionNode for AuctionNode {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn state(&self) -> &AuctionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AuctionState {
        &mut self.state
    }

    fn comm(&self) -> &dyn CommunicationPolicy {
        self.comm.as_ref()
    }

    fn set_comm(&mut self, comm: Box<dyn CommunicationPolicy>) {
        self.comm = comm;
    }

    fn install_comm(&mut self, neighbours: &[String]) {
        self.comm.install(&self.state.graph, neighbours);
    }

    fn handover_delivered(&mut self, message: &Message) {
        let Some(target) = &message.payload else {
            return;
        };
        if let Some((winner, bid)) = self.state.pending.remove(target) {
            debug!("{} handed {} to {} for {:.3}", message.from, target, winner, bid);
            self.hand_over(target, &winner, bid);
        }
    }

    fn handover_dropped(&mut self, message: &Message) {
        let Some(target) = &message.payload else {
            return;
        };
        if self.state.pending.remove(target).is_some() {
            debug!("{} keeps {}: offer to {} lost", message.from, target, message.to);
            self.absorb_reply(&Message::bad_destination(
                message.from.clone(),
                message.to.clone(),
                message.payload.clone(),
            ));
        }
    }

    fn receive_message(&mut self, message: &Message, visible: &BTreeMap<Features, f64>) -> Option<Message> {
        let target = message.payload.as_ref();
        match message.kind {
            MessageKind::StartSearch => {
                let target = target?;
                if self.state.owned.contains_key(target) {
                    return None;
                }
                self.state.record_search(target.clone(), message.from.as_str());
                let confidence = visible.get(target).copied().unwrap_or(0.0);
                if message.from.is_empty() || confidence <= 0.0 || !self.state.under_limit() {
                    return None;
                }
                self.state.bids += 1;
                Some(
                    Message::new(message.to.clone(), message.from.clone(), MessageKind::Bid, Some(target.clone()))
                        .with_value(confidence),
                )
            }
            MessageKind::StopSearch => {
                self.state.searched.remove(target?);
                None
            }
            MessageKind::StartTracking => {
                let target = target?;
                let confidence = visible.get(target).copied().unwrap_or(0.0);
                self.state.take_ownership(target.clone(), confidence);
                self.state.paid_utility += message.value.unwrap_or(0.0);
                if !self.comm.freezes_graph() {
                    let inc = self.state.params.handover_increment;
                    self.state.graph.strengthen(&message.from, target, inc);
                }
                None
            }
            MessageKind::Bid | MessageKind::ErrorBadDestinationAddress => {
                self.absorb_reply(message);
                None
            }
        }
    }

    fn advertise_tracked_objects(&mut self, ctx: &mut NodeContext<'_>) {
        let owned: Vec<Features> = self.state.owned.keys().cloned().collect();
        for target in owned {
            if self.state.auctions.contains_key(&target) || self.state.pending.contains_key(&target) {
                continue;
            }
            let start = match self.kind {
                NodeKind::Active => true,
                NodeKind::Passive => {
                    ctx.visible.get(&target).copied().unwrap_or(0.0) < self.state.params.passive_threshold
                }
            };
            if start {
                self.state.auctions.insert(
                    target.clone(),
                    Auction {
                        remaining: self.state.params.auction_duration.max(1),
                        best: None,
                    },
                );
                self.disseminate(MessageKind::StartSearch, &target, ctx);
            }
        }
    }

    fn update_received_delay(&mut self) {
        let timeout = self.state.params.search_timeout;
        for search in self.state.searched.values_mut() {
            search.age = search.age.saturating_add(1);
        }
        if timeout > 0 {
            self.state
                .searched
                .retain(|_, s| s.origin.is_empty() || s.age <= timeout);
        }
    }

    fn update_auction_duration(&mut self, ctx: &mut NodeContext<'_>) {
        self.state.ledger.tick();

        let mut closed = Vec::new();
        for (target, auction) in self.state.auctions.iter_mut() {
            auction.remaining = auction.remaining.saturating_sub(1);
            if auction.remaining == 0 {
                closed.push(target.clone());
            }
        }
        for target in closed {
            if let Some(auction) = self.state.auctions.remove(&target) {
                self.resolve(target, auction, ctx);
            }
        }
    }

    fn check_if_searched_is_visible(&mut self, ctx: &mut NodeContext<'_>) {
        for (target, confidence) in self.state.owned.iter_mut() {
            *confidence = ctx.visible.get(target).copied().unwrap_or(0.0);
        }

        let claimable: Vec<(Features, f64)> = self
            .state
            .searched
            .iter()
            .filter(|(_, s)| s.origin.is_empty())
            .filter_map(|(t, _)| ctx.visible.get(t).map(|c| (t.clone(), *c)))
            .filter(|(_, c)| *c > 0.0)
            .collect();

        for (target, confidence) in claimable {
            // An earlier claim may have retracted this search or hit the limit.
            if !self.state.searched.contains_key(&target) || !self.state.under_limit() {
                continue;
            }
            debug!("{} claims {}", ctx.transport.local_name(), target);
            self.state.take_ownership(target.clone(), confidence);
            self.disseminate(MessageKind::StopSearch, &target, ctx);
        }
    }

    fn update(&mut self) {
        let factor = self.state.params.evaporation;
        if !self.comm.freezes_graph() && factor < 1.0 {
            self.state.graph.evaporate(factor);
        }
        self.state.end_tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm_policy::{Broadcast, Fix, Step};
    use crate::testing::{RecordingTransport, ScriptedSource};

    fn t1() -> Features {
        Features::scalar(0.111)
    }

    fn visible(conf: f64) -> BTreeMap<Features, f64> {
        let mut v = BTreeMap::new();
        v.insert(t1(), conf);
        v
    }

    #[test]
    fn test_engine_search_is_claimed_on_sight() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        let search = Message::new("", "C1", MessageKind::StartSearch, Some(t1()));
        // Engine searches never get a bid
        assert!(node.receive_message(&search, &visible(0.8)).is_none());
        assert!(node.searched_objects().contains_key(&t1()));

        let mut net = RecordingTransport::new("C1", &["C2", "C3"]);
        let mut rng = ScriptedSource::new(vec![]);
        let vis = visible(0.8);
        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &vis };
        node.check_if_searched_is_visible(&mut ctx);

        assert_eq!(node.owned_objects().get(&t1()), Some(&0.8));
        assert!(node.searched_objects().is_empty());
        assert_eq!(net.recipients(MessageKind::StopSearch), vec!["C2", "C3"]);
    }

    #[test]
    fn test_bid_reply() {
        let mut node = AuctionNode::new(NodeKind::Passive, Box::new(Step));
        let search = Message::new("C9", "C1", MessageKind::StartSearch, Some(t1()));

        let reply = node.receive_message(&search, &visible(0.6)).unwrap();
        assert_eq!(reply.kind, MessageKind::Bid);
        assert_eq!(reply.from, "C1");
        assert_eq!(reply.to, "C9");
        assert_eq!(reply.value, Some(0.6));
        assert_eq!(node.state().bids(), 1);

        // Not visible: search recorded, no bid
        let mut other = AuctionNode::new(NodeKind::Passive, Box::new(Step));
        assert!(other.receive_message(&search, &BTreeMap::new()).is_none());
        assert_eq!(other.searched_objects()[&t1()].origin, "C9");
    }

    #[test]
    fn test_auction_hands_over_to_better_bidder() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        node.state_mut().take_ownership(t1(), 0.3);

        let mut net = RecordingTransport::new("C1", &["C2"]);
        let mut rng = ScriptedSource::new(vec![]);
        let vis = visible(0.3);
        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &vis };

        node.advertise_tracked_objects(&mut ctx);
        assert!(node.state().auctioning(&t1()));

        let bid = Message::new("C2", "C1", MessageKind::Bid, Some(t1())).with_value(0.9);
        node.receive_message(&bid, &vis);

        // auction_duration = 2
        node.update_auction_duration(&mut ctx);
        assert!(node.state().auctioning(&t1()));
        node.update_auction_duration(&mut ctx);

        assert!(!node.state().auctioning(&t1()));
        assert!(node.owned_objects().is_empty());
        assert_eq!(node.received_utility(), 0.9);
        assert_eq!(node.state().handovers(), 1);
        assert_eq!(net.recipients(MessageKind::StartTracking), vec!["C2"]);
        assert_eq!(net.recipients(MessageKind::StopSearch), vec!["C2"]);

        node.update();
        assert_eq!(node.received_utility(), 0.0);
    }

    #[test]
    fn test_delayed_handover_keeps_ownership_until_delivered() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        node.state_mut().take_ownership(t1(), 0.3);

        let mut net = RecordingTransport::new("C1", &["C2"]).delayed();
        let mut rng = ScriptedSource::new(vec![]);
        let vis = visible(0.3);
        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &vis };

        node.advertise_tracked_objects(&mut ctx);
        let bid = Message::new("C2", "C1", MessageKind::Bid, Some(t1())).with_value(0.9);
        node.receive_message(&bid, &vis);
        node.update_auction_duration(&mut ctx);
        node.update_auction_duration(&mut ctx);

        // Offer queued: still the owner, no new auction
        assert!(node.owned_objects().contains_key(&t1()));
        assert!(node.state().handover_pending(&t1()));
        assert_eq!(node.state().handovers(), 0);
        node.advertise_tracked_objects(&mut ctx);
        assert!(!node.state().auctioning(&t1()));

        let offer = net.sent.iter().find(|m| m.kind == MessageKind::StartTracking).cloned().unwrap();
        node.handover_delivered(&offer);
        assert!(node.owned_objects().is_empty());
        assert!(!node.state().handover_pending(&t1()));
        assert_eq!(node.received_utility(), 0.9);
        assert_eq!(node.state().handovers(), 1);
    }

    #[test]
    fn test_lost_handover_keeps_target() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        node.state_mut().take_ownership(t1(), 0.3);

        let mut net = RecordingTransport::new("C1", &["C2"]).delayed();
        let mut rng = ScriptedSource::new(vec![]);
        let vis = visible(0.3);
        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &vis };

        node.advertise_tracked_objects(&mut ctx);
        let bid = Message::new("C2", "C1", MessageKind::Bid, Some(t1())).with_value(0.9);
        node.receive_message(&bid, &vis);
        node.update_auction_duration(&mut ctx);
        node.update_auction_duration(&mut ctx);

        let offer = net.sent.iter().find(|m| m.kind == MessageKind::StartTracking).cloned().unwrap();
        node.handover_dropped(&offer);
        assert_eq!(node.owned_objects().get(&t1()), Some(&0.3));
        assert!(!node.state().handover_pending(&t1()));
        assert_eq!(node.received_utility(), 0.0);

        // A late confirmation for a dropped offer changes nothing
        node.handover_delivered(&offer);
        assert!(node.owned_objects().contains_key(&t1()));

        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &vis };
        node.advertise_tracked_objects(&mut ctx);
        assert!(node.state().auctioning(&t1()));
    }

    #[test]
    fn test_owner_keeps_target_without_better_bid() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        node.state_mut().take_ownership(t1(), 0.0);
        node.set_param("auction_duration", "1");

        let mut net = RecordingTransport::new("C1", &["C2"]);
        let mut rng = ScriptedSource::new(vec![]);
        let vis = BTreeMap::new();
        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &vis };

        node.advertise_tracked_objects(&mut ctx);
        node.update_auction_duration(&mut ctx);

        assert!(node.owned_objects().contains_key(&t1()));
        assert!(net.recipients(MessageKind::StartTracking).is_empty());
    }

    #[test]
    fn test_passive_only_auctions_when_weak() {
        let mut node = AuctionNode::new(NodeKind::Passive, Box::new(Broadcast));
        node.state_mut().take_ownership(t1(), 0.9);

        let mut net = RecordingTransport::new("C1", &["C2"]);
        let mut rng = ScriptedSource::new(vec![]);
        let strong = visible(0.9);
        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &strong };
        node.advertise_tracked_objects(&mut ctx);
        assert!(!node.state().auctioning(&t1()));

        let weak = visible(0.1);
        let mut ctx = NodeContext { transport: &mut net, rng: &mut rng, visible: &weak };
        node.advertise_tracked_objects(&mut ctx);
        assert!(node.state().auctioning(&t1()));
    }

    #[test]
    fn test_start_tracking_takes_ownership() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Step));
        let search = Message::new("C9", "C1", MessageKind::StartSearch, Some(t1()));
        node.receive_message(&search, &visible(0.5));

        let handover = Message::new("C9", "C1", MessageKind::StartTracking, Some(t1())).with_value(0.5);
        assert!(node.receive_message(&handover, &visible(0.5)).is_none());

        assert_eq!(node.owned_objects().get(&t1()), Some(&0.5));
        assert!(node.searched_objects().is_empty());
        assert_eq!(node.paid_utility(), 0.5);
        assert_eq!(node.state().graph().strength("C9", &t1()), 0.25);
    }

    #[test]
    fn test_static_graph_not_learned() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Fix::new()));
        let handover = Message::new("C9", "C1", MessageKind::StartTracking, Some(t1())).with_value(0.5);
        node.receive_message(&handover, &visible(0.5));
        assert_eq!(node.state().graph().get("C9", &t1()), None);
    }

    #[test]
    fn test_clone_state_into_preserves_ownership() {
        let mut old = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        old.state_mut().take_ownership(t1(), 0.7);
        old.state_mut().graph_mut().set_link("C2", 1.0);

        let mut new = AuctionNode::new(NodeKind::Passive, Box::new(Step));
        old.clone_state_into(&mut new);

        assert_eq!(new.owned_objects(), old.owned_objects());
        assert_eq!(new.state().graph().strength("C2", &t1()), 1.0);
        assert_eq!(new.kind(), NodeKind::Passive);
        assert_eq!(new.comm().name(), "step");
    }

    #[test]
    fn test_limit_blocks_claims_and_bids() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        assert!(node.set_param("limit", "1"));
        node.state_mut().take_ownership(Features::scalar(5.0), 1.0);

        let search = Message::new("C9", "C1", MessageKind::StartSearch, Some(t1()));
        assert!(node.receive_message(&search, &visible(0.9)).is_none());
    }

    #[test]
    fn test_search_timeout() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        node.set_param("search_timeout", "1");
        node.receive_message(&Message::new("C9", "C1", MessageKind::StartSearch, Some(t1())), &BTreeMap::new());
        let t2 = Features::scalar(0.222);
        node.receive_message(&Message::new("", "C1", MessageKind::StartSearch, Some(t2.clone())), &BTreeMap::new());

        node.update_received_delay();
        assert_eq!(node.searched_objects().len(), 2);
        node.update_received_delay();
        // Engine searches never expire
        assert_eq!(node.searched_objects().keys().collect::<Vec<_>>(), vec![&t2]);
    }

    #[test]
    fn test_set_param() {
        let mut state = AuctionState::default();
        assert!(state.set_param("auction_duration", "4"));
        assert_eq!(state.params().auction_duration, 4);
        assert!(state.set_param("failsafe", "true"));
        assert!(state.set_param("failsafe_countdown", "tick"));
        assert!(state.ledger().failsafe().enabled);
        assert_eq!(state.ledger().failsafe().countdown, FailsafeCountdown::PerTick);

        assert!(!state.set_param("auction_duration", "soon"));
        assert!(!state.set_param("colour", "blue"));
    }

    #[test]
    fn test_bad_destination_drops_links() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Step));
        node.state_mut().graph_mut().set_link("C2", 1.0);
        let err = Message::bad_destination("C1", "C2", Some(t1()));
        node.receive_message(&err, &BTreeMap::new());
        assert_eq!(node.state().graph().get("C2", &t1()), None);
    }

    #[test]
    fn test_not_tracked_proportion() {
        let mut node = AuctionNode::new(NodeKind::Active, Box::new(Broadcast));
        node.state_mut().take_ownership(t1(), 0.5);
        let mut vis = visible(0.5);
        vis.insert(Features::scalar(0.222), 0.4);
        assert_eq!(node.not_tracked_proportion(&vis), 0.5);
        assert_eq!(node.not_tracked_proportion(&BTreeMap::new()), 0.0);
    }
}
