use crate::{
    resources::TerrainResources,
    tasks::TerrainTasks,
    terrain::TerrainSheet,
    tile_tree::{TerrainComponents, TileTree},
};
use bevy::prelude::*;

pub use crate::lod_updater::update_terrain_lod;

/// Quadtree terrain sheet LOD for the bevy app.
///
/// The plugin registers the tile trees and the update systems. The
/// application provides the collaborators:
/// [`TerrainLodUpdater`](crate::lod_updater::TerrainLodUpdater) with a LOD
/// strategy, and [`TerrainResources`] with a buffer allocator. A default
/// [`TerrainTasks`] scheduler backed by the async compute pool is installed
/// automatically.
pub struct TerrainLodPlugin;

impl Plugin for TerrainLodPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<TerrainComponents<TileTree>>()
            .init_resource::<TerrainTasks>()
            .add_systems(
                Update,
                (
                    poll_tile_updates,
                    update_terrain_lod,
                    upload_tessellator_buffers,
                )
                    .chain(),
            );
    }
}

/// Polls the data source for outstanding tile data and settles pending edge
/// swaps, for every allocated tile of every sheet.
pub fn poll_tile_updates(
    mut tile_trees: ResMut<TerrainComponents<TileTree>>,
    mut sheets: Query<(Entity, &mut TerrainSheet)>,
) {
    for (entity, mut sheet) in &mut sheets {
        if let Some(tile_tree) = tile_trees.get_mut(&entity) {
            sheet.poll_tile_updates(tile_tree);
        }
    }
}

/// The deferred resource upload phase: generates all pending tessellator
/// buffers through the application's allocator.
pub fn upload_tessellator_buffers(
    allocator: Option<Res<TerrainResources>>,
    mut sheets: Query<&mut TerrainSheet>,
) {
    let Some(allocator) = allocator else {
        return;
    };

    for mut sheet in &mut sheets {
        if sheet.tessellator.loading_required() {
            sheet.tessellator.load_resources(&*allocator.0);
        }
    }
}
