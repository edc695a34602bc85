//! Camera agents: visibility model, liveness and messaging.
//!
//! A camera sees targets inside a circular sector (range, view angle,
//! heading). Confidence falls off with distance and with the angle from the
//! optical axis:
//!
//! ```text
//!   dist_conf = 1 / (d + (range - d) / range)
//!   ang_conf  = (half - angle) / half        (1 for a full circle)
//!   conf      = dist_conf * ang_conf
//! ```
//!
//! While offline a camera answers every query with the offline sentinel or an
//! empty collection, never sends and never receives.

use crate::decision::{DecisionNode, NodeContext, Search};
use crate::geometry::angle_to;
use crate::target::TraceableObject;
use camnet_env::{Features, Message, MessageKind, RandomSource, Transport};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use tracing::{debug, info};

/// Name reported by an offline camera.
pub const OFFLINE_NAME: &str = "Offline";

/// Liveness of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineState {
    Online,
    /// Offline for this many more ticks
    OfflineFor(u32),
    /// Offline until explicitly brought back
    OfflineForever,
}

/// Routes messages between cameras on behalf of the engine.
pub trait Courier {
    /// True if `name` exists and is online.
    fn is_reachable(&self, name: &str) -> bool;

    /// Hands `message` to its recipient and returns the recipient's reply.
    fn deliver(&mut self, message: Message) -> Option<Message>;
}

/// A message waiting in a camera's outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub message: Message,
    pub remaining: u32,
}

/// Geometry of a camera, all angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraGeometry {
    pub position: Point2<f64>,
    pub heading: f64,
    pub view_angle: f64,
    pub range: f64,
}

/// A simulated camera.
#[derive(Debug)]
pub struct CameraAgent {
    id: String,
    geometry: CameraGeometry,
    state: OnlineState,
    resources: f64,
    max_resources: f64,
    neighbours: Vec<String>,
    visible: BTreeMap<Features, f64>,
    outbox: Vec<PendingMessage>,
    delay: u32,
    sent: u64,
    node: Box<dyn DecisionNode>,
}

impl CameraAgent {
    pub fn new(id: impl Into<String>, geometry: CameraGeometry, node: Box<dyn DecisionNode>) -> Self {
        Self {
            id: id.into(),
            geometry,
            state: OnlineState::Online,
            resources: 1.0,
            max_resources: 1.0,
            neighbours: Vec::new(),
            visible: BTreeMap::new(),
            outbox: Vec::new(),
            delay: 0,
            sent: 0,
            node,
        }
    }

    /// Sets the message delay in ticks (0 = immediate delivery).
    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the resource pool size (and fills it).
    pub fn with_resources(mut self, max: f64) -> Self {
        self.max_resources = max.max(0.0);
        self.resources = self.max_resources;
        self
    }

    /// Configured name, regardless of liveness.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name, or [`OFFLINE_NAME`] while offline.
    pub fn name(&self) -> &str {
        if self.is_offline() {
            OFFLINE_NAME
        } else {
            &self.id
        }
    }

    pub fn geometry(&self) -> &CameraGeometry {
        &self.geometry
    }

    pub fn position(&self) -> Point2<f64> {
        self.geometry.position
    }

    pub fn heading(&self) -> f64 {
        self.geometry.heading
    }

    pub fn view_angle(&self) -> f64 {
        self.geometry.view_angle
    }

    pub fn range(&self) -> f64 {
        self.geometry.range
    }

    pub fn set_geometry(&mut self, geometry: CameraGeometry) {
        self.geometry = geometry;
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    pub fn online_state(&self) -> OnlineState {
        self.state
    }

    pub fn is_offline(&self) -> bool {
        self.state != OnlineState::Online
    }

    /// Takes the camera offline; `-1` means until explicitly restored.
    ///
    /// Durations of 0 leave the camera online.
    pub fn set_offline(&mut self, duration: i64) {
        self.state = match duration {
            d if d < 0 => OnlineState::OfflineForever,
            0 => OnlineState::Online,
            d => OnlineState::OfflineFor(u32::try_from(d).unwrap_or(u32::MAX)),
        };
        if self.is_offline() {
            info!("{} offline ({:?})", self.id, self.state);
            self.visible.clear();
        }
    }

    /// Brings the camera back online immediately.
    pub fn set_online(&mut self) {
        self.state = OnlineState::Online;
    }

    /// Counts down a timed outage; returns true if the camera came back.
    pub fn tick_offline(&mut self) -> bool {
        if let OnlineState::OfflineFor(n) = self.state {
            if n <= 1 {
                self.state = OnlineState::Online;
                info!("{} back online", self.id);
                return true;
            }
            self.state = OnlineState::OfflineFor(n - 1);
        }
        false
    }

    /// Forgets neighbours, resources and sightings.
    ///
    /// The engine must drop the reverse links to keep neighbourhoods symmetric.
    pub fn reset_camera(&mut self) {
        debug!("{} reset", self.id);
        self.neighbours.clear();
        self.resources = 0.0;
        self.visible.clear();
        for pending in self.outbox.drain(..) {
            if pending.message.kind == MessageKind::StartTracking {
                self.node.handover_dropped(&pending.message);
            }
        }
    }

    pub fn available_resources(&self) -> f64 {
        if self.is_offline() {
            0.0
        } else {
            self.resources
        }
    }

    /// Takes `amount` from the pool. Fails (changing nothing) if short or offline.
    pub fn reduce_resources(&mut self, amount: f64) -> bool {
        if self.is_offline() || amount < 0.0 || amount > self.resources {
            return false;
        }
        self.resources -= amount;
        true
    }

    /// Returns `amount` to the pool, capped at its size.
    pub fn add_resources(&mut self, amount: f64) {
        if self.is_offline() || amount < 0.0 {
            return;
        }
        self.resources = (self.resources + amount).min(self.max_resources);
    }

    /// Neighbour names; empty while offline.
    pub fn neighbours(&self) -> &[String] {
        if self.is_offline() {
            &[]
        } else {
            &self.neighbours
        }
    }

    /// Adds a neighbour. Ignored while offline, for self links and duplicates.
    pub fn add_neighbour(&mut self, name: &str) -> bool {
        if self.is_offline() || name == self.id || self.neighbours.iter().any(|n| n == name) {
            return false;
        }
        self.neighbours.push(name.to_string());
        true
    }

    /// Removes a neighbour, whatever the liveness.
    pub fn remove_neighbour(&mut self, name: &str) {
        self.neighbours.retain(|n| n != name);
        self.node.state_mut().forget_agent(name);
    }

    /// Visible targets with their confidence; empty while offline.
    pub fn visible_objects(&self) -> &BTreeMap<Features, f64> {
        &self.visible
    }

    /// Owned targets; empty while offline.
    pub fn tracked_objects(&self) -> Vec<&Features> {
        if self.is_offline() {
            return Vec::new();
        }
        self.node.owned_objects().keys().collect()
    }

    /// Searched targets; empty while offline.
    pub fn searched_objects(&self) -> Vec<(&Features, &Search)> {
        if self.is_offline() {
            return Vec::new();
        }
        self.node.searched_objects().iter().collect()
    }

    /// Updates the confidence for `target`, returning it.
    pub fn update_visibility(&mut self, target: &TraceableObject) -> f64 {
        if self.is_offline() {
            return 0.0;
        }
        let confidence = self.confidence_for(&target.position());
        if confidence > 0.0 {
            self.visible.insert(target.features().clone(), confidence);
        } else {
            self.visible.remove(target.features());
        }
        confidence
    }

    /// Confidence the camera would have for a target at `point`.
    pub fn confidence_for(&self, point: &Point2<f64>) -> f64 {
        let g = &self.geometry;
        if g.range <= 0.0 {
            return 0.0;
        }
        let d = (point - g.position).norm();
        if d > g.range {
            return 0.0;
        }

        let angle_conf = if g.view_angle >= TAU - 1e-9 {
            1.0
        } else {
            let half = g.view_angle / 2.0;
            let angle = angle_to(g.heading, &g.position, point);
            if angle >= half {
                return 0.0;
            }
            (half - angle) / half
        };

        let dist_conf = (1.0 / (d + (g.range - d) / g.range)).min(1.0);
        dist_conf * angle_conf
    }

    /// Forgets a removed target.
    pub fn remove_object(&mut self, target: &Features) {
        self.visible.remove(target);
        self.node.state_mut().forget_target(target);
    }

    /// Messages sent since the last [`CameraAgent::update_ai`].
    pub fn sent_messages(&self) -> u64 {
        self.sent
    }

    pub fn pending_messages(&self) -> &[PendingMessage] {
        &self.outbox
    }

    pub fn node(&self) -> &dyn DecisionNode {
        self.node.as_ref()
    }

    pub fn node_mut(&mut self) -> &mut dyn DecisionNode {
        self.node.as_mut()
    }

    /// Installs a new decision node (its state must already be carried over).
    pub fn set_node(&mut self, mut node: Box<dyn DecisionNode>) {
        node.install_comm(&self.neighbours);
        self.node = node;
    }

    /// Installs the node's policy against the current neighbours.
    pub fn install_policy(&mut self) {
        self.node.install_comm(&self.neighbours);
    }

    /// Hands an incoming message to the node. Offline cameras drop it.
    pub fn receive(&mut self, message: &Message) -> Option<Message> {
        if self.is_offline() {
            return None;
        }
        self.node.receive_message(message, &self.visible)
    }

    /// Sends a message to a neighbour (see [`Transport::send`]).
    pub fn send_message(
        &mut self,
        to: &str,
        kind: MessageKind,
        payload: Option<&Features>,
        courier: &mut dyn Courier,
    ) -> Option<Message> {
        if self.is_offline() {
            return None;
        }
        let mut port = Port {
            name: &self.id,
            neighbours: &self.neighbours,
            outbox: &mut self.outbox,
            delay: self.delay,
            sent: &mut self.sent,
            courier,
        };
        port.send(to, kind, payload)
    }

    /// Runs `phase` on the node with this camera's transport.
    fn with_node(
        &mut self,
        courier: &mut dyn Courier,
        rng: &mut dyn RandomSource,
        phase: impl FnOnce(&mut dyn DecisionNode, &mut NodeContext<'_>),
    ) {
        if self.is_offline() {
            return;
        }
        let CameraAgent {
            id,
            neighbours,
            visible,
            outbox,
            delay,
            sent,
            node,
            ..
        } = self;
        let mut port = Port {
            name: id.as_str(),
            neighbours: neighbours.as_slice(),
            outbox,
            delay: *delay,
            sent,
            courier,
        };
        let mut ctx = NodeContext {
            transport: &mut port,
            rng,
            visible: &*visible,
        };
        phase(node.as_mut(), &mut ctx);
    }

    /// Advertisement phase.
    pub fn advertise(&mut self, courier: &mut dyn Courier, rng: &mut dyn RandomSource) {
        self.with_node(courier, rng, |node, ctx| node.advertise_tracked_objects(ctx));
    }

    /// Bookkeeping phase: search ageing, auctions and sightings.
    pub fn bookkeeping(&mut self, courier: &mut dyn Courier, rng: &mut dyn RandomSource) {
        self.with_node(courier, rng, |node, ctx| {
            node.update_received_delay();
            node.update_auction_duration(ctx);
            node.check_if_searched_is_visible(ctx);
        });
    }

    /// Counts down the outbox and delivers messages that are due.
    ///
    /// Due messages whose recipient went offline are dropped. A dropped
    /// handover leaves the target with this camera.
    pub fn forward_messages(&mut self, courier: &mut dyn Courier) {
        if self.is_offline() {
            return;
        }
        let mut due = Vec::new();
        self.outbox.retain_mut(|pending| {
            pending.remaining = pending.remaining.saturating_sub(1);
            if pending.remaining == 0 {
                due.push(pending.message.clone());
                false
            } else {
                true
            }
        });

        for message in due {
            let handover = message.kind == MessageKind::StartTracking;
            if !courier.is_reachable(&message.to) {
                debug!("{}: dropping delayed {:?} to {}", self.id, message.kind, message.to);
                if handover {
                    self.node.handover_dropped(&message);
                }
                continue;
            }
            let sent = handover.then(|| message.clone());
            if let Some(reply) = courier.deliver(message) {
                self.node.receive_message(&reply, &self.visible);
            }
            if let Some(sent) = sent {
                self.node.handover_delivered(&sent);
            }
        }
    }

    /// End-of-tick update: counts down an outage or lets the node tidy up.
    pub fn update_ai(&mut self) {
        if self.is_offline() {
            self.tick_offline();
        } else {
            self.node.update();
        }
        self.sent = 0;
    }
}

/// A camera's outbound side, lent to its node for one phase.
struct Port<'a> {
    name: &'a str,
    neighbours: &'a [String],
    outbox: &'a mut Vec<PendingMessage>,
    delay: u32,
    sent: &'a mut u64,
    courier: &'a mut dyn Courier,
}

impl Transport for Port<'_> {
    fn local_name(&self) -> &str {
        self.name
    }

    fn neighbours(&self) -> Vec<String> {
        self.neighbours.to_vec()
    }

    fn send(&mut self, to: &str, kind: MessageKind, payload: Option<&Features>) -> Option<Message> {
        let message = Message::new(self.name, to, kind, payload.cloned());
        self.send_message(message)
    }

    fn send_message(&mut self, message: Message) -> Option<Message> {
        let known = self.neighbours.iter().any(|n| *n == message.to);
        if !known || !self.courier.is_reachable(&message.to) {
            debug!("{}: {} unreachable", self.name, message.to);
            return Some(Message::bad_destination(self.name, message.to, message.payload));
        }

        *self.sent += 1;
        if self.is_delayed() {
            self.outbox.push(PendingMessage {
                message,
                remaining: self.delay,
            });
            return None;
        }
        self.courier.deliver(message)
    }

    fn is_delayed(&self) -> bool {
        self.delay > 0
    }
}

/// Routes messages to every camera except the one currently acting.
pub struct Switchboard<'a> {
    before: &'a mut [CameraAgent],
    after: &'a mut [CameraAgent],
}

impl<'a> Switchboard<'a> {
    /// Splits `cameras` into the one at `index` and a switchboard for the rest.
    ///
    /// Returns `None` if `index` is out of bounds.
    pub fn split(cameras: &'a mut [CameraAgent], index: usize) -> Option<(&'a mut CameraAgent, Switchboard<'a>)> {
        if index >= cameras.len() {
            return None;
        }
        let (before, rest) = cameras.split_at_mut(index);
        let (me, after) = rest.split_first_mut()?;
        Some((me, Switchboard { before, after }))
    }

    fn find(&self, name: &str) -> Option<&CameraAgent> {
        self.before.iter().chain(self.after.iter()).find(|c| c.id() == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut CameraAgent> {
        self.before
            .iter_mut()
            .chain(self.after.iter_mut())
            .find(|c| c.id() == name)
    }
}

impl Courier for Switchboard<'_> {
    fn is_reachable(&self, name: &str) -> bool {
        self.find(name).map_or(false, |c| !c.is_offline())
    }

    fn deliver(&mut self, message: Message) -> Option<Message> {
        let recipient = self.find_mut(&message.to)?;
        recipient.receive(&message)
    }
}
