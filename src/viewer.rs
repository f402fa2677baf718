use crate::math::DAabb3;
use bevy::{math::DVec3, prelude::*};
use std::sync::Arc;

/// A camera volume used to deprioritize terrain work that is off screen.
pub trait CullingVolume: Send + Sync {
    fn intersects(&self, bounds: &DAabb3) -> bool;
}

/// A spherical culling volume around the viewer.
pub struct SphereVolume {
    pub center: DVec3,
    pub radius: f64,
}

impl CullingVolume for SphereVolume {
    fn intersects(&self, bounds: &DAabb3) -> bool {
        bounds.intersects_sphere(self.center, self.radius)
    }
}

/// Marks the camera entity that terrain LOD is computed for.
#[derive(Component, Default, Clone)]
pub struct TerrainViewer {
    /// Camera volume for prioritizing visible tiles. Without one, every
    /// tile counts as on screen.
    pub volume: Option<Arc<dyn CullingVolume>>,
}

/// Snapshot of the viewer state handed through one scheduler cycle.
#[derive(Clone)]
pub struct ViewerInfo {
    pub position: DVec3,
    pub volume: Option<Arc<dyn CullingVolume>>,
}

impl ViewerInfo {
    pub fn intersects(&self, bounds: &DAabb3) -> bool {
        self.volume
            .as_ref()
            .map_or(true, |volume| volume.intersects(bounds))
    }
}
