//! Targets and their movement strategies.
//!
//! A target is identified by its immutable feature vector and moved once per
//! tick by a pluggable [`MovementStrategy`]. Strategies that leave the world
//! bounce off its edges.

use crate::geometry::{heading_towards, heading_vector, WorldBounds};
use camnet_env::{Features, RandomSource, RandomUse, SimError};
use nalgebra::Point2;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Parameters a movement strategy is built from (and snapshotted to).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementParams {
    /// Position [x, y]
    pub position: [f64; 2],

    /// Heading in radians
    pub heading: f64,

    /// Distance covered per tick
    pub speed: f64,

    /// Waypoints visited in a loop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<[f64; 2]>,

    /// Mean of the per-tick heading change (random walk)
    #[serde(default)]
    pub mean: f64,

    /// Standard deviation of the per-tick heading change (random walk)
    #[serde(default)]
    pub std: f64,
}

/// Per-tick motion model of a target.
pub trait MovementStrategy: fmt::Debug {
    /// Registry identifier of this strategy.
    fn name(&self) -> &'static str;

    /// Advances the position by one tick.
    fn update(&mut self, bounds: &WorldBounds, rng: &mut dyn RandomSource);

    /// Current position.
    fn position(&self) -> Point2<f64>;

    /// Current heading in radians.
    fn heading(&self) -> f64;

    /// Current parameters, enough to rebuild the strategy at this state.
    fn params(&self) -> MovementParams;
}

/// Moves `position` along `heading` and reflects off the bounds.
fn step_with_bounce(position: &mut Point2<f64>, heading: &mut f64, speed: f64, bounds: &WorldBounds) {
    *position += heading_vector(*heading) * speed;

    if position.x < bounds.min_x || position.x > bounds.max_x {
        *heading = -*heading;
        position.x = position.x.clamp(bounds.min_x, bounds.max_x);
    }
    if position.y < bounds.min_y || position.y > bounds.max_y {
        *heading = PI - *heading;
        position.y = position.y.clamp(bounds.min_y, bounds.max_y);
    }
    *heading = heading.rem_euclid(2.0 * PI);
}

/// Constant heading and speed.
#[derive(Debug, Clone)]
pub struct Straight {
    position: Point2<f64>,
    heading: f64,
    speed: f64,
}

impl Straight {
    pub fn new(position: Point2<f64>, heading: f64, speed: f64) -> Self {
        Self { position, heading, speed }
    }
}

impl MovementStrategy for Straight {
    fn name(&self) -> &'static str {
        "straight"
    }

    fn update(&mut self, bounds: &WorldBounds, _rng: &mut dyn RandomSource) {
        step_with_bounce(&mut self.position, &mut self.heading, self.speed, bounds);
    }

    fn position(&self) -> Point2<f64> {
        self.position
    }

    fn heading(&self) -> f64 {
        self.heading
    }

    fn params(&self) -> MovementParams {
        MovementParams {
            position: [self.position.x, self.position.y],
            heading: self.heading,
            speed: self.speed,
            waypoints: Vec::new(),
            mean: 0.0,
            std: 0.0,
        }
    }
}

/// Walks from a start position to the first waypoint, then loops through the list.
#[derive(Debug, Clone)]
pub struct Waypoints {
    position: Point2<f64>,
    heading: f64,
    speed: f64,
    waypoints: Vec<Point2<f64>>,
    next: usize,
}

impl Waypoints {
    /// Creates a waypoint loop starting at `position`. Fails on an empty list.
    ///
    /// A start on the first waypoint heads straight for the second one.
    pub fn new(position: Point2<f64>, speed: f64, waypoints: Vec<Point2<f64>>) -> Result<Self, SimError> {
        let first = *waypoints
            .first()
            .ok_or_else(|| SimError::configuration("waypoint movement needs at least one waypoint"))?;
        let next = if position == first { 1 % waypoints.len() } else { 0 };
        let heading = heading_towards(&position, &waypoints[next]);
        Ok(Self {
            position,
            heading,
            speed,
            waypoints,
            next,
        })
    }
}

impl MovementStrategy for Waypoints {
    fn name(&self) -> &'static str {
        "waypoints"
    }

    fn update(&mut self, _bounds: &WorldBounds, _rng: &mut dyn RandomSource) {
        let mut budget = self.speed;
        // A single waypoint means standing still.
        if self.waypoints.len() < 2 {
            return;
        }
        while budget > 0.0 {
            let goal = self.waypoints[self.next];
            let dist = (goal - self.position).norm();
            if dist > budget {
                self.heading = heading_towards(&self.position, &goal);
                self.position += heading_vector(self.heading) * budget;
                break;
            }
            self.position = goal;
            budget -= dist;
            self.next = (self.next + 1) % self.waypoints.len();
            self.heading = heading_towards(&self.position, &self.waypoints[self.next]);
            if dist == 0.0 && budget == self.speed {
                // Consecutive duplicate waypoints; avoid spinning forever.
                break;
            }
        }
    }

    fn position(&self) -> Point2<f64> {
        self.position
    }

    fn heading(&self) -> f64 {
        self.heading
    }

    fn params(&self) -> MovementParams {
        // Rotate so the current goal comes first.
        let n = self.waypoints.len();
        let start = self.next;
        let waypoints = (0..n)
            .map(|i| {
                let p = self.waypoints[(start + i) % n];
                [p.x, p.y]
            })
            .collect();
        MovementParams {
            position: [self.position.x, self.position.y],
            heading: self.heading,
            speed: self.speed,
            waypoints,
            mean: 0.0,
            std: 0.0,
        }
    }
}

/// Random walk: the heading drifts by a normally distributed turn each tick.
#[derive(Debug, Clone)]
pub struct Brownian {
    position: Point2<f64>,
    heading: f64,
    speed: f64,
    turn: Normal<f64>,
}

impl Brownian {
    /// Creates a random walk. Fails on a negative or non-finite `std`.
    pub fn new(position: Point2<f64>, heading: f64, speed: f64, mean: f64, std: f64) -> Result<Self, SimError> {
        let turn = Normal::new(mean, std)
            .map_err(|e| SimError::configuration(format!("invalid random walk parameters: {}", e)))?;
        Ok(Self {
            position,
            heading,
            speed,
            turn,
        })
    }
}

impl MovementStrategy for Brownian {
    fn name(&self) -> &'static str {
        "brownian"
    }

    fn update(&mut self, bounds: &WorldBounds, rng: &mut dyn RandomSource) {
        self.heading += self.turn.sample(rng.stream(RandomUse::Universal));
        step_with_bounce(&mut self.position, &mut self.heading, self.speed, bounds);
    }

    fn position(&self) -> Point2<f64> {
        self.position
    }

    fn heading(&self) -> f64 {
        self.heading
    }

    fn params(&self) -> MovementParams {
        MovementParams {
            position: [self.position.x, self.position.y],
            heading: self.heading,
            speed: self.speed,
            waypoints: Vec::new(),
            mean: self.turn.mean(),
            std: self.turn.std_dev(),
        }
    }
}

/// A moving target.
#[derive(Debug)]
pub struct TraceableObject {
    features: Features,
    movement: Box<dyn MovementStrategy>,
}

impl TraceableObject {
    pub fn new(features: Features, movement: Box<dyn MovementStrategy>) -> Self {
        Self { features, movement }
    }

    /// Identity key.
    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn position(&self) -> Point2<f64> {
        self.movement.position()
    }

    pub fn heading(&self) -> f64 {
        self.movement.heading()
    }

    /// Movement strategy (for inspection and snapshots).
    pub fn movement(&self) -> &dyn MovementStrategy {
        self.movement.as_ref()
    }

    /// Advances one tick.
    pub fn update(&mut self, bounds: &WorldBounds, rng: &mut dyn RandomSource) {
        self.movement.update(bounds, rng);
    }
}
