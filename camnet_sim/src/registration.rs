//! Central registry that re-advertises forgotten targets.

use camnet_core::CameraAgent;
use camnet_env::{Features, Message, MessageKind};
use std::collections::BTreeSet;
use tracing::debug;

/// Global view of cameras and targets.
///
/// Every tick, each registered target that no online camera owns or
/// searches is advertised again (StartSearch from `""`) to every registered
/// online camera, so a target dropped during a failure is picked up again.
#[derive(Debug, Clone, Default)]
pub struct GlobalRegistration {
    cameras: BTreeSet<String>,
    targets: BTreeSet<Features>,
    offline_for: u32,
}

impl GlobalRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_camera(&mut self, name: &str) {
        self.cameras.insert(name.to_string());
    }

    pub fn remove_camera(&mut self, name: &str) {
        self.cameras.remove(name);
    }

    pub fn clear_cameras(&mut self) {
        self.cameras.clear();
    }

    pub fn add_target(&mut self, target: Features) {
        self.targets.insert(target);
    }

    pub fn remove_target(&mut self, target: &Features) {
        self.targets.remove(target);
    }

    pub fn cameras(&self) -> &BTreeSet<String> {
        &self.cameras
    }

    pub fn targets(&self) -> &BTreeSet<Features> {
        &self.targets
    }

    /// Suspends re-advertising for `duration` ticks.
    pub fn set_offline(&mut self, duration: u32) {
        self.offline_for = duration;
    }

    pub fn is_offline(&self) -> bool {
        self.offline_for > 0
    }

    /// Sends StartSearch for `target` to every registered online camera.
    ///
    /// Returns the number of cameras reached.
    pub fn advertise(&self, target: &Features, cameras: &mut [CameraAgent]) -> usize {
        let mut reached = 0;
        for camera in cameras.iter_mut() {
            if camera.is_offline() || !self.cameras.contains(camera.id()) {
                continue;
            }
            let message = Message::new("", camera.id(), MessageKind::StartSearch, Some(target.clone()));
            camera.receive(&message);
            reached += 1;
        }
        reached
    }

    /// Re-advertises every registered target nobody online knows about.
    ///
    /// Returns the number of targets advertised.
    pub fn update(&mut self, cameras: &mut [CameraAgent]) -> usize {
        if self.offline_for > 0 {
            self.offline_for -= 1;
            return 0;
        }
        let forgotten: Vec<Features> = self
            .targets
            .iter()
            .filter(|target| {
                !cameras.iter().filter(|c| !c.is_offline()).any(|c| {
                    c.node().owned_objects().contains_key(*target) || c.node().searched_objects().contains_key(*target)
                })
            })
            .cloned()
            .collect();

        for target in &forgotten {
            debug!("registry re-advertising {}", target);
            self.advertise(target, cameras);
        }
        forgotten.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camnet_core::{AuctionNode, Broadcast, CameraGeometry, NodeKind};
    use nalgebra::Point2;

    fn camera(id: &str) -> CameraAgent {
        CameraAgent::new(
            id,
            CameraGeometry {
                position: Point2::new(0.0, 0.0),
                heading: 0.0,
                view_angle: 1.0,
                range: 10.0,
            },
            Box::new(AuctionNode::new(NodeKind::Active, Box::new(Broadcast))),
        )
    }

    #[test]
    fn test_forgotten_target_is_readvertised() {
        let mut cameras = vec![camera("C1"), camera("C2")];
        let mut registry = GlobalRegistration::new();
        registry.add_camera("C1");
        registry.add_camera("C2");
        let target = Features::scalar(0.111);
        registry.add_target(target.clone());

        assert_eq!(registry.update(&mut cameras), 1);
        assert!(cameras[0].node().searched_objects().contains_key(&target));
        assert!(cameras[1].node().searched_objects().contains_key(&target));

        // now searched, nothing to do
        assert_eq!(registry.update(&mut cameras), 0);
    }

    #[test]
    fn test_unregistered_and_offline_cameras_skipped() {
        let mut cameras = vec![camera("C1"), camera("C2"), camera("C3")];
        cameras[1].set_offline(-1);
        let mut registry = GlobalRegistration::new();
        registry.add_camera("C1");
        registry.add_camera("C2");

        let target = Features::scalar(0.222);
        assert_eq!(registry.advertise(&target, &mut cameras), 1);
        assert!(cameras[0].node().searched_objects().contains_key(&target));
        assert!(cameras[2].node().searched_objects().is_empty());
    }

    #[test]
    fn test_offline_registry_waits() {
        let mut cameras = vec![camera("C1")];
        let mut registry = GlobalRegistration::new();
        registry.add_camera("C1");
        registry.add_target(Features::scalar(0.333));
        registry.set_offline(2);

        assert_eq!(registry.update(&mut cameras), 0);
        assert_eq!(registry.update(&mut cameras), 0);
        assert!(!registry.is_offline());
        assert_eq!(registry.update(&mut cameras), 1);
    }
}
