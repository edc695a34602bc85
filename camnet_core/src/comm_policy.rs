//! Communication policies: who hears about a target.
//!
//! Every policy answers the same question for a message about target T:
//! which neighbours receive it. The threshold family (Step, Smooth, Fix)
//! draws one uniform value per multicast from the communication stream and
//! sends to each neighbour whose link strength beats it, falling back to a
//! broadcast when nobody qualifies.
//!
//! ```text
//!   StartSearch(T) ──► failsafe due? ──yes──► broadcast
//!                           │no
//!                     r = draw(Comm)
//!                           │
//!         for n in neighbours: p(n,T) > r ? send + advertise
//!                           │
//!                 nobody selected? ──yes──► broadcast
//!
//!   StopSearch(T)  ──► advertised(T) empty? ──yes──► broadcast
//!                           │no
//!                 send to advertised(T), clear entry
//! ```

use crate::vision_graph::VisionGraph;
use camnet_env::{Features, Message, MessageKind, RandomSource, RandomUse, Transport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// When the fail-safe countdown advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailsafeCountdown {
    /// Once per simulated tick
    PerTick,
    /// Once per multicast attempt for the target
    PerAttempt,
}

/// Forced-broadcast fail-safe settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailsafeConfig {
    /// Whether the countdown is attached at all
    pub enabled: bool,

    /// Ticks/attempts before a broadcast is forced
    pub steps: u32,

    /// What advances the countdown
    pub countdown: FailsafeCountdown,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            steps: 5,
            countdown: FailsafeCountdown::PerAttempt,
        }
    }
}

/// Per-node dissemination bookkeeping: advertised sets and fail-safe counters.
#[derive(Debug, Clone, Default)]
pub struct OutreachLedger {
    advertised: BTreeMap<Features, Vec<String>>,
    steps_till_broadcast: BTreeMap<Features, u32>,
    failsafe: FailsafeConfig,
}

impl OutreachLedger {
    pub fn new(failsafe: FailsafeConfig) -> Self {
        Self {
            failsafe,
            ..Default::default()
        }
    }

    pub fn failsafe(&self) -> &FailsafeConfig {
        &self.failsafe
    }

    pub fn set_failsafe(&mut self, failsafe: FailsafeConfig) {
        self.failsafe = failsafe;
    }

    /// Names already told about `target`.
    pub fn advertised(&self, target: &Features) -> &[String] {
        self.advertised.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Records that `agent` was told about `target`.
    pub fn record(&mut self, target: &Features, agent: &str) {
        let names = self.advertised.entry(target.clone()).or_default();
        if !names.iter().any(|n| n == agent) {
            names.push(agent.to_string());
        }
    }

    /// Removes and returns the advertised set for `target`.
    pub fn take_advertised(&mut self, target: &Features) -> Vec<String> {
        self.advertised.remove(target).unwrap_or_default()
    }

    /// Remaining countdown for `target`, if attached.
    pub fn steps_till_broadcast(&self, target: &Features) -> Option<u32> {
        self.steps_till_broadcast.get(target).copied()
    }

    /// Attaches the countdown if enabled and checks whether it expired.
    ///
    /// An expired countdown is detached, so the next attempt starts afresh.
    fn failsafe_due(&mut self, target: &Features) -> bool {
        if !self.failsafe.enabled {
            return false;
        }
        let steps = self.failsafe.steps;
        let left = self.steps_till_broadcast.entry(target.clone()).or_insert(steps);
        if self.failsafe.countdown == FailsafeCountdown::PerAttempt {
            *left = left.saturating_sub(1);
        }
        if *left == 0 {
            self.steps_till_broadcast.remove(target);
            return true;
        }
        false
    }

    /// Detaches the countdown after a successful multicast.
    fn multicast_succeeded(&mut self, target: &Features) {
        self.steps_till_broadcast.remove(target);
    }

    /// Advances per-tick countdowns.
    pub fn tick(&mut self) {
        if self.failsafe.countdown == FailsafeCountdown::PerTick {
            for left in self.steps_till_broadcast.values_mut() {
                *left = left.saturating_sub(1);
            }
        }
    }

    /// Drops all bookkeeping for `target`.
    pub fn forget(&mut self, target: &Features) {
        self.advertised.remove(target);
        self.steps_till_broadcast.remove(target);
    }

    /// Drops `agent` from every advertised set.
    pub fn forget_agent(&mut self, agent: &str) {
        for names in self.advertised.values_mut() {
            names.retain(|n| n != agent);
        }
    }
}

/// Everything a policy needs to disseminate one message.
pub struct Dissemination<'a> {
    pub transport: &'a mut dyn Transport,
    pub rng: &'a mut dyn RandomSource,
    pub graph: &'a VisionGraph,
    pub ledger: &'a mut OutreachLedger,
    replies: Vec<Message>,
}

impl<'a> Dissemination<'a> {
    pub fn new(
        transport: &'a mut dyn Transport,
        rng: &'a mut dyn RandomSource,
        graph: &'a VisionGraph,
        ledger: &'a mut OutreachLedger,
    ) -> Self {
        Self {
            transport,
            rng,
            graph,
            ledger,
            replies: Vec::new(),
        }
    }

    /// Sends to one neighbour, keeping any reply.
    pub fn send(&mut self, to: &str, kind: MessageKind, target: &Features) {
        if let Some(reply) = self.transport.send(to, kind, Some(target)) {
            self.replies.push(reply);
        }
    }

    /// Sends to every current neighbour.
    pub fn broadcast(&mut self, kind: MessageKind, target: &Features) {
        for name in self.transport.neighbours() {
            self.send(&name, kind, target);
        }
    }

    /// Replies collected so far (bids, routing errors).
    pub fn into_replies(self) -> Vec<Message> {
        self.replies
    }
}

/// Polymorphic dissemination strategy.
pub trait CommunicationPolicy: fmt::Debug {
    /// Registry identifier.
    fn name(&self) -> &'static str;

    /// Sends `kind` about `target` to the neighbours this policy selects.
    fn multicast(&mut self, kind: MessageKind, target: &Features, out: &mut Dissemination<'_>);

    /// Sends `kind` about `target` to every neighbour.
    fn broadcast(&mut self, kind: MessageKind, target: &Features, out: &mut Dissemination<'_>) {
        out.broadcast(kind, target);
    }

    /// True if the vision graph must not be updated while installed.
    fn freezes_graph(&self) -> bool {
        false
    }

    /// Called when the policy is installed on a camera.
    fn install(&mut self, _graph: &VisionGraph, _neighbours: &[String]) {}

    fn clone_box(&self) -> Box<dyn CommunicationPolicy>;
}

impl Clone for Box<dyn CommunicationPolicy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Sends everything to everyone.
#[derive(Debug, Clone, Default)]
pub struct Broadcast;

impl CommunicationPolicy for Broadcast {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn multicast(&mut self, kind: MessageKind, target: &Features, out: &mut Dissemination<'_>) {
        out.broadcast(kind, target);
    }

    fn clone_box(&self) -> Box<dyn CommunicationPolicy> {
        Box::new(self.clone())
    }
}

/// Threshold-gated StartSearch shared by the threshold family.
///
/// Returns the number of neighbours selected (0 means it broadcast).
fn threshold_start_search(
    target: &Features,
    graph: &VisionGraph,
    neighbours: &[String],
    out: &mut Dissemination<'_>,
    mut accept: impl FnMut(f64, f64) -> bool,
) -> usize {
    if out.ledger.failsafe_due(target) {
        debug!("{}: fail-safe broadcast for {}", out.transport.local_name(), target);
        out.broadcast(MessageKind::StartSearch, target);
        return 0;
    }

    let r = out.rng.next_f64(RandomUse::Communication);
    let mut selected = 0;
    for name in neighbours {
        if accept(graph.strength(name, target), r) {
            out.send(name, MessageKind::StartSearch, target);
            out.ledger.record(target, name);
            selected += 1;
        }
    }

    if selected == 0 {
        out.broadcast(MessageKind::StartSearch, target);
    } else {
        out.ledger.multicast_succeeded(target);
    }
    selected
}

/// Retraction shared by the threshold family.
fn retract(target: &Features, out: &mut Dissemination<'_>) {
    let told = out.ledger.take_advertised(target);
    if told.is_empty() {
        out.broadcast(MessageKind::StopSearch, target);
    } else {
        for name in &told {
            out.send(name, MessageKind::StopSearch, target);
        }
    }
}

/// Threshold multicast: send iff `p(n, T) > r`.
#[derive(Debug, Clone, Default)]
pub struct Step;

impl CommunicationPolicy for Step {
    fn name(&self) -> &'static str {
        "step"
    }

    fn multicast(&mut self, kind: MessageKind, target: &Features, out: &mut Dissemination<'_>) {
        match kind {
            MessageKind::StartSearch => {
                let graph = out.graph;
                let neighbours = out.transport.neighbours();
                threshold_start_search(target, graph, &neighbours, out, |p, r| p > r);
            }
            MessageKind::StopSearch => retract(target, out),
            _ => out.broadcast(kind, target),
        }
    }

    fn clone_box(&self) -> Box<dyn CommunicationPolicy> {
        Box::new(self.clone())
    }
}

/// Outcome of one Smooth multicast, fed to the threshold law.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastOutcome {
    /// Neighbours that passed the threshold
    pub selected: usize,
    /// Neighbours considered
    pub neighbours: usize,
}

/// Threshold law: `(previous scale, outcome) → next scale`.
pub type ThresholdLaw = Arc<dyn Fn(f64, MulticastOutcome) -> f64 + Send + Sync>;

/// Halves the scale after a miss, relaxes a quarter of the way back to 1 after a hit.
pub fn default_threshold_law() -> ThresholdLaw {
    Arc::new(|prev, outcome| {
        if outcome.selected == 0 {
            prev * 0.5
        } else {
            prev + (1.0 - prev) * 0.25
        }
    })
}

/// Threshold multicast with a per-target adaptive scale on the draw.
///
/// A neighbour is selected iff `p(n, T) > r · scale(T)`; the scale starts at
/// 1 and is updated by the threshold law after every StartSearch.
#[derive(Clone)]
pub struct Smooth {
    scale: BTreeMap<Features, f64>,
    law: ThresholdLaw,
}

impl Smooth {
    pub fn new() -> Self {
        Self::with_law(default_threshold_law())
    }

    pub fn with_law(law: ThresholdLaw) -> Self {
        Self {
            scale: BTreeMap::new(),
            law,
        }
    }

    /// Current scale for `target`.
    pub fn scale(&self, target: &Features) -> f64 {
        self.scale.get(target).copied().unwrap_or(1.0)
    }
}

impl Default for Smooth {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Smooth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Smooth").field("scale", &self.scale).finish()
    }
}

impl CommunicationPolicy for Smooth {
    fn name(&self) -> &'static str {
        "smooth"
    }

    fn multicast(&mut self, kind: MessageKind, target: &Features, out: &mut Dissemination<'_>) {
        match kind {
            MessageKind::StartSearch => {
                let graph = out.graph;
                let neighbours = out.transport.neighbours();
                let scale = self.scale(target);
                let selected =
                    threshold_start_search(target, graph, &neighbours, out, |p, r| p > r * scale);
                let next = (self.law)(
                    scale,
                    MulticastOutcome {
                        selected,
                        neighbours: neighbours.len(),
                    },
                );
                self.scale.insert(target.clone(), next.clamp(0.0, 1.0));
            }
            MessageKind::StopSearch => {
                self.scale.remove(target);
                retract(target, out);
            }
            _ => out.broadcast(kind, target),
        }
    }

    fn clone_box(&self) -> Box<dyn CommunicationPolicy> {
        Box::new(self.clone())
    }
}

/// Threshold multicast over the graph and membership seen at installation.
///
/// Until installed it behaves like [`Step`] over the live graph.
#[derive(Debug, Clone, Default)]
pub struct Fix {
    frozen: Option<(VisionGraph, Vec<String>)>,
}

impl Fix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes an explicit graph and neighbour list up front.
    pub fn with_graph(graph: VisionGraph, neighbours: Vec<String>) -> Self {
        Self {
            frozen: Some((graph, neighbours)),
        }
    }
}

impl CommunicationPolicy for Fix {
    fn name(&self) -> &'static str {
        "fix"
    }

    fn multicast(&mut self, kind: MessageKind, target: &Features, out: &mut Dissemination<'_>) {
        match kind {
            MessageKind::StartSearch => {
                match &self.frozen {
                    Some((graph, neighbours)) => {
                        threshold_start_search(target, graph, neighbours, out, |p, r| p > r);
                    }
                    None => {
                        let graph = out.graph;
                        let neighbours = out.transport.neighbours();
                        threshold_start_search(target, graph, &neighbours, out, |p, r| p > r);
                    }
                }
            }
            MessageKind::StopSearch => retract(target, out),
            _ => out.broadcast(kind, target),
        }
    }

    fn freezes_graph(&self) -> bool {
        true
    }

    fn install(&mut self, graph: &VisionGraph, neighbours: &[String]) {
        self.frozen = Some((graph.clone(), neighbours.to_vec()));
    }

    fn clone_box(&self) -> Box<dyn CommunicationPolicy> {
        Box::new(self.clone())
    }
}
