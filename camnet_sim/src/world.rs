//! SimulationEngine - owns every camera and target and advances them tick by tick.
//!
//! One tick runs these phases in order; later phases read state written by
//! earlier ones:
//!
//! ```text
//!  events -> registry -> movement -> failures -> visibility
//!         -> strategy swap -> advertise -> bookkeeping/forward
//!         -> utility, overlap, statistics commit
//! ```

use crate::config::{ParamFile, SimConfig};
use crate::exporter::{CameraFrame, SimFrame, TargetFrame};
use crate::registration::GlobalRegistration;
use crate::registry::{strategy, strategy_index, SelectorParams, StrategyRegistry, COMM_BY_INDEX, STRATEGY_TABLE};
use crate::scenarios::{
    CameraChange, CameraSettings, EventAction, ScenarioEvent, ScenarioSettings, TargetSettings, VisionGraphSettings,
};
use crate::statistics::with_suffix;
use crate::streams::RandomStreams;

use camnet_core::{
    fov_overlap, AuctionState, CameraAgent, CameraGeometry, MovementParams, OnlineState, Switchboard, TraceableObject,
    VisionGraph, WorldBounds,
};
use camnet_env::{ConsistencyViolation, Features, Message, MessageKind, RandomSource, RandomUse, SimError, Statistics};
use nalgebra::Point2;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Multiplier for generated target features.
const FEATURE_STEP: f64 = 0.111;

/// Speed of randomly placed targets.
const RANDOM_OBJECT_SPEED: f64 = 0.3;

/// What a camera reported before its end-of-tick update.
struct Reading {
    index: usize,
    name: String,
    utility: f64,
    sent: u64,
    handovers: u32,
    confidence: f64,
    proportion: f64,
    owned: usize,
}

/// The simulation engine.
pub struct SimulationEngine {
    config: SimConfig,
    scenario: String,
    bounds: WorldBounds,
    cameras: Vec<CameraAgent>,
    objects: Vec<TraceableObject>,
    events: Vec<ScenarioEvent>,
    registry: StrategyRegistry,
    registration: Option<GlobalRegistration>,
    params: Option<ParamFile>,
    rng: RandomStreams,
    stats: Box<dyn Statistics>,
    next_id: u64,
    last_utility: f64,
    last_overlap: f64,
    tick_events: Vec<String>,
}

impl SimulationEngine {
    /// Creates an empty engine. Fails on invalid configuration or an unreadable parameter file.
    pub fn new(config: SimConfig, stats: Box<dyn Statistics>) -> Result<Self, SimError> {
        config.validate()?;
        let params = match &config.param_file {
            Some(path) => Some(ParamFile::load(path)?),
            None => None,
        };
        let registration = config.global_registration.then(GlobalRegistration::new);
        info!(
            "engine seed={} failure_rate={:?} global_registration={}",
            config.seed, config.failure_rate, config.global_registration
        );

        Ok(Self {
            rng: RandomStreams::new(config.seed),
            config,
            scenario: String::new(),
            bounds: WorldBounds::default(),
            cameras: Vec::new(),
            objects: Vec::new(),
            events: Vec::new(),
            registry: StrategyRegistry::new(),
            registration,
            params,
            stats,
            next_id: 0,
            last_utility: 0.0,
            last_overlap: 0.0,
            tick_events: Vec::new(),
        })
    }

    /// Replaces the strategy registry (for custom nodes, policies or movements).
    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Builds the world described by `settings`.
    ///
    /// Every camera, target and scripted event is validated here so that a
    /// bad scenario fails before the first tick.
    pub fn interpret(&mut self, settings: &ScenarioSettings) -> Result<(), SimError> {
        self.scenario = settings.name.clone();
        self.bounds = settings.bounds.unwrap_or_default();
        if self.bounds.width() <= 0.0 || self.bounds.height() <= 0.0 {
            return Err(SimError::configuration(format!("empty world bounds {:?}", self.bounds)));
        }

        for cs in &settings.cameras {
            let (graph, is_static) = initial_graph(&cs.name, settings.vision_graph.as_ref());
            self.add_camera_with_graph(cs, graph, is_static)?;
        }
        for ts in &settings.objects {
            self.add_object(ts)?;
        }
        for _ in 0..settings.random_cameras {
            self.add_random_camera()?;
        }
        for _ in 0..settings.random_objects {
            self.add_random_object()?;
        }

        self.validate_events(&settings.events)?;
        self.events = settings.events.clone();
        for camera in self.cameras.iter_mut() {
            camera.install_policy();
        }

        info!(
            "scenario `{}`: {} cameras, {} targets, {} events",
            self.scenario,
            self.cameras.len(),
            self.objects.len(),
            self.events.len()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn cameras(&self) -> &[CameraAgent] {
        &self.cameras
    }

    pub fn objects(&self) -> &[TraceableObject] {
        &self.objects
    }

    pub fn bounds(&self) -> &WorldBounds {
        &self.bounds
    }

    pub fn set_bounds(&mut self, bounds: WorldBounds) {
        self.bounds = bounds;
    }

    /// Restores the default `[-30, 30]` bounds.
    pub fn reset_bounds(&mut self) {
        self.bounds = WorldBounds::default();
    }

    pub fn registration(&self) -> Option<&GlobalRegistration> {
        self.registration.as_ref()
    }

    pub fn statistics(&self) -> &dyn Statistics {
        self.stats.as_ref()
    }

    /// Completed ticks.
    pub fn time_step(&self) -> u64 {
        self.stats.time_step()
    }

    /// Network utility of the last tick.
    pub fn last_utility(&self) -> f64 {
        self.last_utility
    }

    /// Summed FOV overlap of the last tick.
    pub fn last_overlap(&self) -> f64 {
        self.last_overlap
    }

    /// Hands out a fresh id for camera names and target features.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Looks a camera up by its configured name, online or not.
    pub fn camera_by_name(&self, name: &str) -> Option<&CameraAgent> {
        self.cameras.iter().find(|c| c.id() == name)
    }

    pub fn camera_by_name_mut(&mut self, name: &str) -> Option<&mut CameraAgent> {
        self.cameras.iter_mut().find(|c| c.id() == name)
    }

    fn camera_index(&self, name: &str) -> Option<usize> {
        self.cameras.iter().position(|c| c.id() == name)
    }

    // ------------------------------------------------------------------
    // Cameras
    // ------------------------------------------------------------------

    /// Adds a camera linked to every existing camera.
    pub fn add_camera(&mut self, settings: &CameraSettings) -> Result<(), SimError> {
        self.add_camera_with_graph(settings, VisionGraph::new(), false)
    }

    fn add_camera_with_graph(
        &mut self,
        settings: &CameraSettings,
        graph: VisionGraph,
        static_graph: bool,
    ) -> Result<(), SimError> {
        self.validate_camera(settings)?;
        if self.camera_by_name(&settings.name).is_some() {
            return Err(SimError::configuration(format!("duplicate camera name `{}`", settings.name)));
        }

        let mut params = self.config.auction.clone();
        params.limit = settings.limit;
        if static_graph {
            params.evaporation = 1.0;
            params.handover_increment = 0.0;
        }
        let mut state = AuctionState::new(graph, params, self.config.failsafe);
        if let Some(bandit) = settings.bandit.as_deref().filter(|b| !b.is_empty()) {
            let selector_params = SelectorParams {
                arms: STRATEGY_TABLE.len(),
                epsilon: self.config.epsilon,
                alpha: self.config.alpha,
            };
            state.set_selector(Some(self.registry.create_selector(bandit, &selector_params)?));
        }

        let comm = self.registry.create_comm(&settings.comm)?;
        let mut node = self.registry.create_node(&settings.ai_algorithm, comm, state)?;
        if let Some(params) = &self.params {
            params.apply(node.as_mut())?;
        }

        let camera = CameraAgent::new(settings.name.clone(), geometry_of(settings), node)
            .with_delay(self.config.message_delay)
            .with_resources(self.config.camera_resources);

        debug!(
            "camera {} at ({:.1}, {:.1}) {}/{}",
            settings.name, settings.x, settings.y, settings.ai_algorithm, settings.comm
        );
        self.cameras.push(camera);
        let index = self.cameras.len() - 1;
        for other in 0..index {
            self.link(index, other);
        }
        self.cameras[index].install_policy();
        if let Some(registration) = self.registration.as_mut() {
            registration.add_camera(&settings.name);
        }
        Ok(())
    }

    /// Links two cameras, keeping the relation symmetric.
    fn link(&mut self, a: usize, b: usize) {
        let name_a = self.cameras[a].id().to_string();
        let name_b = self.cameras[b].id().to_string();
        let a_ok = self.cameras[a].add_neighbour(&name_b);
        let b_ok = self.cameras[b].add_neighbour(&name_a);
        if a_ok && !b_ok {
            self.cameras[a].remove_neighbour(&name_b);
        } else if b_ok && !a_ok {
            self.cameras[b].remove_neighbour(&name_a);
        }
    }

    /// Adds a camera with random position, heading, angle, range and policy.
    ///
    /// Returns the new camera's name.
    pub fn add_random_camera(&mut self) -> Result<String, SimError> {
        let comm = COMM_BY_INDEX[self.rng.next_below(3, RandomUse::Universal)];
        let mut name = format!("C{}", self.next_id());
        while self.camera_by_name(&name).is_some() {
            name = format!("C{}", self.next_id());
        }
        let b = self.bounds;
        let settings = CameraSettings {
            name,
            x: self.rng.next_f64(RandomUse::Universal) * b.width() + b.min_x,
            y: self.rng.next_f64(RandomUse::Universal) * b.height() + b.min_y,
            heading: self.rng.next_f64(RandomUse::Universal) * 360.0,
            viewing_angle: self.rng.next_f64(RandomUse::Universal) * 90.0 + 15.0,
            range: self.rng.next_f64(RandomUse::Universal) * 20.0 + 10.0,
            ai_algorithm: "active".to_string(),
            comm: comm.to_string(),
            limit: 0,
            bandit: None,
        };
        self.add_camera(&settings)?;
        Ok(settings.name)
    }

    /// Removes a camera for good. Returns false if there is none by that name.
    pub fn remove_camera(&mut self, name: &str) -> bool {
        let Some(index) = self.camera_index(name) else {
            return false;
        };
        self.remove_camera_at(index);
        true
    }

    fn remove_camera_at(&mut self, index: usize) -> CameraAgent {
        let camera = self.cameras.remove(index);
        for other in self.cameras.iter_mut() {
            other.remove_neighbour(camera.id());
        }
        if let Some(registration) = self.registration.as_mut() {
            registration.remove_camera(camera.id());
        }
        info!("camera {} removed", camera.id());
        camera
    }

    /// Removes a random camera, returning its name.
    pub fn remove_random_camera(&mut self) -> Option<String> {
        if self.cameras.is_empty() {
            return None;
        }
        let index = self.rng.next_below(self.cameras.len(), RandomUse::Universal);
        Some(self.remove_camera_at(index).id().to_string())
    }

    /// Replaces every camera by a random one and re-advertises every target.
    pub fn recreate_cameras(&mut self) -> Result<(), SimError> {
        let count = self.cameras.len();
        self.cameras.clear();
        if let Some(registration) = self.registration.as_mut() {
            registration.clear_cameras();
        }
        for _ in 0..count {
            self.add_random_camera()?;
        }
        let targets: Vec<Features> = self.objects.iter().map(|o| o.features().clone()).collect();
        for target in &targets {
            self.announce(target);
        }
        Ok(())
    }

    /// Applies a geometry change; `None` or `-1` keeps a field.
    ///
    /// Returns false if there is no camera by that name.
    pub fn change_camera(&mut self, change: &CameraChange) -> Result<bool, SimError> {
        let bounds = self.bounds;
        let Some(camera) = self.camera_by_name_mut(&change.name) else {
            return Ok(false);
        };
        let geometry = changed_geometry(camera.geometry(), change);
        check_move(&bounds, change, &geometry)?;
        camera.set_geometry(geometry);
        Ok(true)
    }

    /// Takes a camera offline; `-1` keeps it offline for the rest of the run.
    ///
    /// Returns false if there is no camera by that name.
    pub fn fail_camera(&mut self, name: &str, duration: i64) -> bool {
        let Some(index) = self.camera_index(name) else {
            return false;
        };
        if duration < 0 {
            if let Some(registration) = self.registration.as_mut() {
                registration.remove_camera(name);
            }
        }
        let camera = &mut self.cameras[index];
        if !camera.is_offline() {
            camera.set_offline(duration);
        }
        true
    }

    /// Clears a camera's links on both sides along with its resources.
    fn reset_camera(&mut self, index: usize) {
        let name = self.cameras[index].id().to_string();
        self.cameras[index].reset_camera();
        for (i, other) in self.cameras.iter_mut().enumerate() {
            if i != index {
                other.remove_neighbour(&name);
            }
        }
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    /// Adds a target and asks every online camera to search for it.
    ///
    /// Returns the target's features (generated when not given).
    pub fn add_object(&mut self, settings: &TargetSettings) -> Result<Features, SimError> {
        self.validate_target(settings)?;
        let features = match &settings.features {
            Some(features) => features.clone(),
            None => {
                let id = self.next_id();
                Features::scalar(FEATURE_STEP * id as f64)
            }
        };
        if self.objects.iter().any(|o| *o.features() == features) {
            return Err(SimError::configuration(format!("duplicate target features {}", features)));
        }

        let movement_name = self.movement_for(settings).to_string();
        let params = MovementParams {
            position: [settings.x, settings.y],
            heading: settings.heading.to_radians(),
            speed: settings.speed,
            waypoints: settings.waypoints.clone(),
            mean: settings.mean,
            std: settings.std,
        };
        let movement = self.registry.create_movement(&movement_name, &params)?;
        self.objects.push(TraceableObject::new(features.clone(), movement));
        debug!("target {} ({})", features, movement_name);

        if let Some(registration) = self.registration.as_mut() {
            registration.add_target(features.clone());
        }
        self.announce(&features);
        Ok(features)
    }

    /// Adds a target at a random position and heading.
    pub fn add_random_object(&mut self) -> Result<Features, SimError> {
        let b = self.bounds;
        let settings = TargetSettings {
            features: None,
            x: self.rng.next_f64(RandomUse::Universal) * b.width() + b.min_x,
            y: self.rng.next_f64(RandomUse::Universal) * b.height() + b.min_y,
            heading: self.rng.next_f64(RandomUse::Universal) * 360.0,
            speed: RANDOM_OBJECT_SPEED,
            waypoints: Vec::new(),
            mean: 0.0,
            std: 1.0,
            movement: None,
        };
        self.add_object(&settings)
    }

    /// Removes a target everywhere. Returns false if it is unknown.
    pub fn remove_object(&mut self, features: &Features) -> bool {
        for camera in self.cameras.iter_mut() {
            camera.remove_object(features);
        }
        if let Some(registration) = self.registration.as_mut() {
            registration.remove_target(features);
        }
        let before = self.objects.len();
        self.objects.retain(|o| o.features() != features);
        before != self.objects.len()
    }

    /// Removes a random target, returning its features.
    pub fn remove_random_object(&mut self) -> Option<Features> {
        if self.objects.is_empty() {
            return None;
        }
        let index = self.rng.next_below(self.objects.len(), RandomUse::Universal);
        let features = self.objects[index].features().clone();
        self.remove_object(&features);
        Some(features)
    }

    fn movement_for<'a>(&'a self, settings: &'a TargetSettings) -> &'a str {
        match self.config.movement.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => settings.movement_name(),
        }
    }

    /// Tells cameras that `target` needs an owner.
    fn announce(&mut self, target: &Features) {
        match &self.registration {
            Some(registration) => {
                registration.advertise(target, &mut self.cameras);
            }
            None => {
                for camera in self.cameras.iter_mut().filter(|c| !c.is_offline()) {
                    let message = Message::new("", camera.id(), MessageKind::StartSearch, Some(target.clone()));
                    camera.receive(&message);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn validate_camera(&self, settings: &CameraSettings) -> Result<(), SimError> {
        let position = Point2::new(settings.x, settings.y);
        if !self.bounds.contains(&position) {
            return Err(SimError::configuration(format!(
                "camera {} at ({}, {}) is outside the world",
                settings.name, settings.x, settings.y
            )));
        }
        if settings.range <= 0.0 {
            return Err(SimError::configuration(format!("camera {} has no range", settings.name)));
        }
        self.registry.create_comm(&settings.comm)?;
        if let Some(bandit) = settings.bandit.as_deref().filter(|b| !b.is_empty()) {
            self.registry.create_selector(bandit, &SelectorParams::default())?;
        }
        Ok(())
    }

    fn validate_target(&self, settings: &TargetSettings) -> Result<(), SimError> {
        let position = Point2::new(settings.x, settings.y);
        if !self.bounds.contains(&position) {
            return Err(SimError::configuration(format!(
                "target at ({}, {}) is outside the world",
                settings.x, settings.y
            )));
        }
        Ok(())
    }

    /// Replays the scripted events against a model of the scene so a bad
    /// event fails before the first tick.
    ///
    /// Events run in timestep order, file order within a timestep.
    fn validate_events(&self, events: &[ScenarioEvent]) -> Result<(), SimError> {
        let mut cameras: BTreeMap<String, CameraGeometry> =
            self.cameras.iter().map(|c| (c.id().to_string(), *c.geometry())).collect();
        let mut targets: BTreeSet<Features> = self.objects.iter().map(|o| o.features().clone()).collect();

        let mut ordered: Vec<&ScenarioEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.timestep);
        for event in ordered {
            let at = |message: String| SimError::configuration(format!("event at t={}: {}", event.timestep, message));
            match &event.action {
                EventAction::AddCamera(cs) => {
                    self.validate_camera(cs)?;
                    self.registry.create_node(
                        &cs.ai_algorithm,
                        self.registry.create_comm(&cs.comm)?,
                        AuctionState::default(),
                    )?;
                    if cameras.insert(cs.name.clone(), geometry_of(cs)).is_some() {
                        return Err(at(format!("duplicate camera name `{}`", cs.name)));
                    }
                }
                EventAction::AddObject(ts) => {
                    self.validate_target(ts)?;
                    let params = MovementParams {
                        position: [ts.x, ts.y],
                        heading: ts.heading.to_radians(),
                        speed: ts.speed,
                        waypoints: ts.waypoints.clone(),
                        mean: ts.mean,
                        std: ts.std,
                    };
                    self.registry.create_movement(self.movement_for(ts), &params)?;
                    if let Some(features) = &ts.features {
                        if !targets.insert(features.clone()) {
                            return Err(at(format!("duplicate target features {}", features)));
                        }
                    }
                }
                EventAction::RemoveCamera { name } => {
                    cameras.remove(name);
                }
                EventAction::RemoveObject { features } => {
                    targets.remove(features);
                }
                EventAction::ChangeCamera(change) => {
                    if let Some(geometry) = cameras.get_mut(&change.name) {
                        let moved = changed_geometry(geometry, change);
                        check_move(&self.bounds, change, &moved)?;
                        *geometry = moved;
                    }
                }
                EventAction::FailCamera { .. } | EventAction::RegistryOffline { .. } => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advances the simulation by one tick.
    pub fn tick(&mut self) -> Result<(), SimError> {
        self.tick_events.clear();
        let step = self.stats.time_step();

        self.process_events(step)?;

        if let Some(registration) = self.registration.as_mut() {
            let advertised = registration.update(&mut self.cameras);
            if advertised > 0 {
                debug!("registry re-advertised {} targets", advertised);
            }
        }

        for object in self.objects.iter_mut() {
            object.update(&self.bounds, &mut self.rng);
        }

        self.inject_failure();

        if self.update_visibility() {
            self.stats.add_visible();
        }

        self.select_strategies()?;

        for index in 0..self.cameras.len() {
            if let Some((camera, mut board)) = Switchboard::split(&mut self.cameras, index) {
                camera.advertise(&mut board, &mut self.rng);
            }
        }

        for index in 0..self.cameras.len() {
            if let Some((camera, mut board)) = Switchboard::split(&mut self.cameras, index) {
                camera.bookkeeping(&mut board, &mut self.rng);
                camera.forward_messages(&mut board);
            }
        }

        self.settle();
        Ok(())
    }

    /// Runs `ticks` ticks.
    pub fn run(&mut self, ticks: u64) -> Result<(), SimError> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    fn process_events(&mut self, step: u64) -> Result<(), SimError> {
        let due: Vec<EventAction> = self
            .events
            .iter()
            .filter(|e| e.timestep == step)
            .map(|e| e.action.clone())
            .collect();
        for action in due {
            self.apply_event(action)?;
        }
        Ok(())
    }

    /// Applies one scripted event through the public add/remove primitives.
    pub fn apply_event(&mut self, action: EventAction) -> Result<(), SimError> {
        match action {
            EventAction::AddCamera(cs) => {
                self.add_camera(&cs)?;
                self.tick_events.push(format!("camera {} added", cs.name));
            }
            EventAction::AddObject(ts) => {
                let features = self.add_object(&ts)?;
                self.tick_events.push(format!("target {} added", features));
            }
            EventAction::RemoveCamera { name } => {
                if !self.remove_camera(&name) {
                    warn!("remove_camera: no camera `{}`", name);
                }
            }
            EventAction::RemoveObject { features } => {
                if !self.remove_object(&features) {
                    warn!("remove_object: no target {}", features);
                }
            }
            EventAction::FailCamera { name, duration } => {
                if self.fail_camera(&name, duration) {
                    self.tick_events.push(format!("camera {} failed for {}", name, duration));
                } else {
                    warn!("fail_camera: no camera `{}`", name);
                }
            }
            EventAction::ChangeCamera(change) => {
                if !self.change_camera(&change)? {
                    warn!("change_camera: no camera `{}`", change.name);
                }
            }
            EventAction::RegistryOffline { duration } => match self.registration.as_mut() {
                Some(registration) => registration.set_offline(duration),
                None => warn!("registry_offline ignored: global registration disabled"),
            },
        }
        Ok(())
    }

    /// Possibly takes one random camera offline (and resets it).
    fn inject_failure(&mut self) {
        let Some(rate) = self.config.failure_rate else {
            return;
        };
        if self.rng.next_f64(RandomUse::Error) >= rate || self.cameras.is_empty() {
            return;
        }
        let index = self.rng.next_below(self.cameras.len(), RandomUse::Error);
        let duration = 1 + self.rng.next_below(self.config.max_offline_ticks as usize, RandomUse::Error);
        let reset = self.rng.next_f64(RandomUse::Error) < self.config.reset_probability;

        let camera = &mut self.cameras[index];
        if camera.online_state() == OnlineState::OfflineForever {
            return;
        }
        camera.set_offline(duration as i64);
        let name = camera.id().to_string();
        info!("camera {} failed for {} ticks (reset={})", name, duration, reset);
        if reset {
            self.reset_camera(index);
        }
        self.tick_events.push(format!("camera {} failed for {}", name, duration));
    }

    /// Updates every online camera against every target.
    ///
    /// Returns true if any camera sees anything.
    fn update_visibility(&mut self) -> bool {
        let mut any = false;
        for camera in self.cameras.iter_mut().filter(|c| !c.is_offline()) {
            for object in &self.objects {
                camera.update_visibility(object);
            }
            any |= !camera.visible_objects().is_empty();
        }
        any
    }

    /// Lets each learning camera pick its strategy, swapping its node if it changed.
    fn select_strategies(&mut self) -> Result<(), SimError> {
        for camera in self.cameras.iter_mut() {
            if camera.is_offline() {
                continue;
            }
            let previous = strategy_index(camera.node().kind(), camera.node().comm().name());
            let Some(selector) = camera.node_mut().state_mut().selector_mut() else {
                continue;
            };
            let choice = selector.select_action(&mut self.rng);
            if previous == Some(choice) {
                continue;
            }
            let Some((kind, comm)) = strategy(choice) else {
                warn!("{}: selector chose unknown strategy {}", camera.id(), choice);
                continue;
            };

            self.stats.set_strat(choice, camera.id());
            let mut node = self.registry.create_strategy(choice, AuctionState::default())?;
            camera.node().clone_state_into(node.as_mut());
            debug!(
                "{} switches {}/{} -> {}/{}",
                camera.id(),
                camera.node().kind(),
                camera.node().comm().name(),
                kind,
                comm
            );
            camera.set_node(node);
            self.tick_events.push(format!("{} -> {}/{}", camera.id(), kind, comm));
        }
        Ok(())
    }

    /// Rewards, metrics and the statistics commit.
    fn settle(&mut self) {
        let readings: Vec<Reading> = self
            .cameras
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_offline())
            .map(|(index, c)| {
                let node = c.node();
                Reading {
                    index,
                    name: c.id().to_string(),
                    utility: node.utility() + node.received_utility() - node.paid_utility(),
                    sent: c.sent_messages(),
                    handovers: node.state().handovers(),
                    confidence: node.total_confidence(),
                    proportion: node.not_tracked_proportion(c.visible_objects()),
                    owned: node.owned_objects().len(),
                }
            })
            .collect();

        for camera in self.cameras.iter_mut() {
            camera.update_ai();
        }

        let mut network_utility = 0.0;
        for r in &readings {
            let overhead = r.sent as f64;
            self.stats.add_communication(overhead, &r.name);
            self.stats.add_handover(r.handovers as f64);
            if let Some(selector) = self.cameras[r.index].node_mut().state_mut().selector_mut() {
                self.stats.set_reward(r.utility, overhead, &r.name);
                selector.set_current_reward(r.utility, overhead, Some(r.owned as f64));
            }
            self.stats.add_confidence(r.confidence, &r.name);
            self.stats.add_proportion(r.proportion, &r.name);
            self.stats.add_utility(r.utility, &r.name);
            network_utility += r.utility;
        }

        let overlap = self.network_overlap();
        self.stats.add_overlap(overlap);
        self.last_utility = network_utility;
        self.last_overlap = overlap;

        if let Err(e) = self.stats.next_time_step() {
            warn!("statistics: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Metrics and audits
    // ------------------------------------------------------------------

    /// Summed utility (owned + received - paid) of online cameras.
    pub fn compute_utility(&self) -> f64 {
        self.cameras
            .iter()
            .filter(|c| !c.is_offline())
            .map(|c| {
                let node = c.node();
                node.utility() + node.received_utility() - node.paid_utility()
            })
            .sum()
    }

    /// FOV overlap summed over every unordered pair of online cameras.
    pub fn network_overlap(&self) -> f64 {
        let online: Vec<&CameraAgent> = self.cameras.iter().filter(|c| !c.is_offline()).collect();
        let mut area = 0.0;
        for (i, a) in online.iter().enumerate() {
            for b in &online[i + 1..] {
                area += fov_overlap(&a.position(), a.range(), &b.position(), b.range());
            }
        }
        area
    }

    /// Checks that every target is owned once or searched by someone.
    pub fn check_consistency(&self) -> Result<(), SimError> {
        for object in &self.objects {
            let target = object.features();
            let owners: Vec<String> = self
                .cameras
                .iter()
                .filter(|c| c.node().owned_objects().contains_key(target))
                .map(|c| c.id().to_string())
                .collect();
            if let Some(agent) = self.cameras.iter().find(|c| {
                c.node().owned_objects().contains_key(target) && c.node().searched_objects().contains_key(target)
            }) {
                return Err(ConsistencyViolation::OwnedWhileSearched {
                    target: target.clone(),
                    agent: agent.id().to_string(),
                }
                .into());
            }
            if owners.len() > 1 {
                return Err(ConsistencyViolation::MultipleOwners {
                    target: target.clone(),
                    owners,
                }
                .into());
            }
            let searched = self
                .cameras
                .iter()
                .any(|c| c.node().searched_objects().contains_key(target));
            if owners.is_empty() && !searched {
                return Err(ConsistencyViolation::Untracked(target.clone()).into());
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshots, export, shutdown
    // ------------------------------------------------------------------

    /// Current cameras and targets as a scenario that rebuilds this state.
    ///
    /// Events still to come are kept, shifted to the snapshot's time origin.
    pub fn snapshot(&self) -> ScenarioSettings {
        let now = self.stats.time_step();
        let cameras = self
            .cameras
            .iter()
            .map(|c| {
                let g = c.geometry();
                let node = c.node();
                CameraSettings {
                    name: c.id().to_string(),
                    x: g.position.x,
                    y: g.position.y,
                    heading: g.heading.to_degrees(),
                    viewing_angle: g.view_angle.to_degrees(),
                    range: g.range,
                    ai_algorithm: node.kind().name().to_string(),
                    comm: node.comm().name().to_string(),
                    limit: node.state().params().limit,
                    bandit: node.bandit_solver().map(|s| s.name().to_string()),
                }
            })
            .collect();
        let objects = self
            .objects
            .iter()
            .map(|o| {
                let p = o.movement().params();
                TargetSettings {
                    features: Some(o.features().clone()),
                    x: p.position[0],
                    y: p.position[1],
                    heading: p.heading.to_degrees(),
                    speed: p.speed,
                    waypoints: p.waypoints,
                    mean: p.mean,
                    std: p.std,
                    movement: Some(o.movement().name().to_string()),
                }
            })
            .collect();
        let events = self
            .events
            .iter()
            .filter(|e| e.timestep >= now)
            .map(|e| ScenarioEvent {
                timestep: e.timestep - now,
                action: e.action.clone(),
            })
            .collect();

        ScenarioSettings {
            name: self.scenario.clone(),
            bounds: Some(self.bounds),
            cameras,
            objects,
            random_cameras: 0,
            random_objects: 0,
            vision_graph: None,
            events,
        }
    }

    /// Writes [`SimulationEngine::snapshot`] as JSON.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), SimError> {
        self.snapshot().save(path)
    }

    /// Renderable state after the last tick.
    pub fn frame(&self) -> SimFrame {
        let cameras = self
            .cameras
            .iter()
            .map(|c| {
                let node = c.node();
                CameraFrame {
                    name: c.id().to_string(),
                    x: c.position().x,
                    y: c.position().y,
                    heading: c.heading(),
                    view_angle: c.view_angle(),
                    range: c.range(),
                    state: c.online_state(),
                    strategy: format!("{}/{}", node.kind(), node.comm().name()),
                    visible: c.visible_objects().keys().map(|f| f.values().to_vec()).collect(),
                    tracked: node.owned_objects().keys().map(|f| f.values().to_vec()).collect(),
                }
            })
            .collect();
        let targets = self
            .objects
            .iter()
            .map(|o| TargetFrame {
                features: o.features().values().to_vec(),
                x: o.position().x,
                y: o.position().y,
                heading: o.heading(),
            })
            .collect();

        SimFrame {
            time_step: self.stats.time_step().saturating_sub(1),
            cameras,
            targets,
            utility: self.last_utility,
            overlap: self.last_overlap,
            events: self.tick_events.clone(),
        }
    }

    /// One-line statistics summary.
    pub fn stat_summary(&self) -> String {
        self.stats.summary()
    }

    /// Writes each learning camera's selector series to `<prefix>_<camera>.csv`.
    pub fn export_selector_results(&self, prefix: &Path) -> Result<usize, SimError> {
        let mut written = 0;
        for camera in &self.cameras {
            let Some(selector) = camera.node().bandit_solver() else {
                continue;
            };
            let results = selector.results();
            let path = with_suffix(prefix, &format!("_{}.csv", camera.id()));
            let mut writer = csv::Writer::from_path(&path).map_err(SimError::statistics)?;
            writer
                .write_record(results.iter().map(|(name, _)| name.as_str()))
                .map_err(SimError::statistics)?;
            let rows = results.iter().map(|(_, series)| series.len()).min().unwrap_or(0);
            for row in 0..rows {
                writer
                    .write_record(results.iter().map(|(_, series)| series[row].to_string()))
                    .map_err(SimError::statistics)?;
            }
            writer.flush().map_err(SimError::statistics)?;
            written += 1;
        }
        Ok(written)
    }

    /// Exports selector results (when an output prefix is set) and closes the statistics.
    ///
    /// Failures are logged and the first one is returned.
    pub fn close(&mut self) -> Result<(), SimError> {
        let mut first = None;
        if let Some(prefix) = self.config.output.clone() {
            if let Err(e) = self.export_selector_results(&prefix) {
                warn!("selector results: {}", e);
                first = Some(e);
            }
        }
        if let Err(e) = self.stats.close() {
            warn!("statistics close: {}", e);
            if first.is_none() {
                first = Some(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Initial links for `camera` from the scenario's vision graph.
///
/// Static graphs are symmetric: a camera is also linked to every camera
/// that lists it.
fn initial_graph(camera: &str, settings: Option<&VisionGraphSettings>) -> (VisionGraph, bool) {
    let mut graph = VisionGraph::new();
    let Some(settings) = settings else {
        return (graph, false);
    };
    if let Some(links) = settings.links.get(camera) {
        for other in links {
            graph.set_link(other.clone(), 1.0);
        }
    }
    if settings.is_static {
        for (other, links) in &settings.links {
            if links.iter().any(|l| l == camera) {
                graph.set_link(other.clone(), 1.0);
            }
        }
    }
    (graph, settings.is_static)
}

fn geometry_of(settings: &CameraSettings) -> CameraGeometry {
    CameraGeometry {
        position: Point2::new(settings.x, settings.y),
        heading: settings.heading.to_radians(),
        view_angle: settings.viewing_angle.to_radians(),
        range: settings.range,
    }
}

/// `old` with the fields `change` sets.
fn changed_geometry(old: &CameraGeometry, change: &CameraChange) -> CameraGeometry {
    CameraGeometry {
        position: Point2::new(pick(change.x, old.position.x), pick(change.y, old.position.y)),
        heading: pick(change.heading.map(|h| keep_sentinel(h, f64::to_radians)), old.heading),
        view_angle: pick(change.angle.map(|a| keep_sentinel(a, f64::to_radians)), old.view_angle),
        range: pick(change.range, old.range),
    }
}

fn check_move(bounds: &WorldBounds, change: &CameraChange, geometry: &CameraGeometry) -> Result<(), SimError> {
    if bounds.contains(&geometry.position) {
        Ok(())
    } else {
        Err(SimError::configuration(format!(
            "camera {} moved outside the world to ({}, {})",
            change.name, geometry.position.x, geometry.position.y
        )))
    }
}

/// `value` unless absent or the `-1` sentinel.
fn pick(value: Option<f64>, current: f64) -> f64 {
    match value {
        Some(v) if v != -1.0 => v,
        _ => current,
    }
}

/// Applies `convert` unless `value` is the `-1` sentinel.
fn keep_sentinel(value: f64, convert: fn(f64) -> f64) -> f64 {
    if value == -1.0 {
        value
    } else {
        convert(value)
    }
}
