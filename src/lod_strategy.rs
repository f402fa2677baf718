use crate::{math::DAabb3, viewer::ViewerInfo};
use bevy::{math::DVec3, prelude::*, utils::HashMap};

/// Defines the LOD distribution over the terrain.
pub trait LodStrategy: Send + Sync {
    /// Called once at the start of every scheduler cycle with the current
    /// viewer, before any of the queries below.
    fn update_view(&mut self, _view: &ViewerInfo) {}

    /// True when the sheet's LOD should be re-evaluated.
    fn needs_to_be_updated(&mut self, sheet: Entity, view: &ViewerInfo) -> bool;

    /// The sheet's LOD just reached the required tessellation.
    fn signal_update_completion(&mut self, sheet: Entity, view: &ViewerInfo);

    /// The quad density (quads per squared world unit) this strategy
    /// requires for a tile with the given bounds, base surface normal and
    /// displacement height range.
    fn required_vertex_density_for(
        &self,
        bounds: &DAabb3,
        surface_normal: DVec3,
        min_height: f32,
        max_height: f32,
    ) -> f32;

    /// Maximum number of tile divisions per LOD update. Lower values respond
    /// faster per frame but need more updates to stabilize.
    fn max_divisions_per_update(&self) -> u32;
}

/// Modifies the density required by [`DistanceLod`] per tile.
pub trait DensityModifier: Send + Sync {
    fn density_modifier_for(
        &self,
        bounds: &DAabb3,
        surface_normal: DVec3,
        min_height: f32,
        max_height: f32,
    ) -> f32;
}

/// A LOD measure based on the 3d distance from the viewer, falling off with
/// the squared distance.
pub struct DistanceLod {
    /// Viewer movement after which sheet LODs are re-evaluated.
    pub update_distance: f64,
    /// Quad density of a 1x1 unit surface viewed from one unit away.
    pub one_meter_vertex_density: f32,
    /// Upper bound on the required density.
    pub max_vertex_density: f32,
    pub max_divisions_per_update: u32,
    pub modifiers: Vec<Box<dyn DensityModifier>>,
    view_position: DVec3,
    last_update_positions: HashMap<Entity, DVec3>,
}

impl Default for DistanceLod {
    fn default() -> Self {
        Self {
            update_distance: 10.0,
            one_meter_vertex_density: 512.0,
            max_vertex_density: 64.0,
            max_divisions_per_update: 5,
            modifiers: Vec::new(),
            view_position: DVec3::ZERO,
            last_update_positions: HashMap::default(),
        }
    }
}

impl LodStrategy for DistanceLod {
    fn update_view(&mut self, view: &ViewerInfo) {
        self.view_position = view.position;
    }

    fn needs_to_be_updated(&mut self, sheet: Entity, view: &ViewerInfo) -> bool {
        let Some(&last_position) = self.last_update_positions.get(&sheet) else {
            return true;
        };

        if view.position.distance(last_position) > self.update_distance {
            // invalidate when moved
            self.last_update_positions.remove(&sheet);
            return true;
        }

        false
    }

    fn signal_update_completion(&mut self, sheet: Entity, view: &ViewerInfo) {
        self.last_update_positions.insert(sheet, view.position);
    }

    fn required_vertex_density_for(
        &self,
        bounds: &DAabb3,
        surface_normal: DVec3,
        min_height: f32,
        max_height: f32,
    ) -> f32 {
        let distance = bounds.distance_to_point(self.view_position);
        let mut density = self
            .max_vertex_density
            .min(self.one_meter_vertex_density / (distance * distance) as f32);

        for modifier in &self.modifiers {
            density *= modifier.density_modifier_for(bounds, surface_normal, min_height, max_height);
        }

        density
    }

    fn max_divisions_per_update(&self) -> u32 {
        self.max_divisions_per_update
    }
}

/// Increases vertex density for tiles with large height drops, which tend to
/// carry silhouettes.
pub struct HeightDensityModifier {
    pub height_density_multiplier: f32,
    pub max_height_density_multiplier: f32,
}

impl Default for HeightDensityModifier {
    fn default() -> Self {
        Self {
            height_density_multiplier: 0.005,
            max_height_density_multiplier: 8.0,
        }
    }
}

impl DensityModifier for HeightDensityModifier {
    fn density_modifier_for(
        &self,
        _bounds: &DAabb3,
        _surface_normal: DVec3,
        min_height: f32,
        max_height: f32,
    ) -> f32 {
        let height = max_height - min_height;
        1.0 + (height * self.height_density_multiplier).min(self.max_height_density_multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_at(position: DVec3) -> ViewerInfo {
        ViewerInfo {
            position,
            volume: None,
        }
    }

    #[test]
    fn update_gating_follows_viewer_movement() {
        let mut strategy = DistanceLod::default();
        let sheet = Entity::from_raw(1);

        assert!(strategy.needs_to_be_updated(sheet, &view_at(DVec3::ZERO)));

        strategy.signal_update_completion(sheet, &view_at(DVec3::ZERO));
        assert!(!strategy.needs_to_be_updated(sheet, &view_at(DVec3::new(5.0, 0.0, 0.0))));
        assert!(strategy.needs_to_be_updated(sheet, &view_at(DVec3::new(15.0, 0.0, 0.0))));
    }

    #[test]
    fn density_falls_off_with_squared_distance() {
        let mut strategy = DistanceLod {
            max_vertex_density: 1000.0,
            ..default()
        };
        strategy.update_view(&view_at(DVec3::new(0.0, 10.0, 0.0)));

        let bounds = DAabb3::new(DVec3::new(-1.0, 0.0, -1.0), DVec3::new(1.0, 0.0, 1.0));
        let density = strategy.required_vertex_density_for(&bounds, DVec3::Y, 0.0, 0.0);

        assert!((density - 512.0 / 100.0).abs() < 1e-3);

        strategy.update_view(&view_at(DVec3::new(0.0, 20.0, 0.0)));
        let farther = strategy.required_vertex_density_for(&bounds, DVec3::Y, 0.0, 0.0);
        assert!((density / farther - 4.0).abs() < 1e-3);
    }

    #[test]
    fn height_modifier_boosts_steep_tiles() {
        let mut strategy = DistanceLod {
            modifiers: vec![Box::new(HeightDensityModifier::default())],
            ..default()
        };
        strategy.update_view(&view_at(DVec3::new(0.0, 10.0, 0.0)));

        let bounds = DAabb3::new(DVec3::new(-1.0, 0.0, -1.0), DVec3::new(1.0, 0.0, 1.0));
        let flat = strategy.required_vertex_density_for(&bounds, DVec3::Y, 0.0, 0.0);
        let steep = strategy.required_vertex_density_for(&bounds, DVec3::Y, 0.0, 400.0);

        assert!((steep / flat - 3.0).abs() < 1e-3);
    }
}
