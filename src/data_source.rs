use crate::{curvature::SheetCurvature, math::SheetRect};
use bevy::math::Vec2;

/// Displacement and texturing parameters for one terrain tile, produced by a
/// [`TerrainDataSource`] on demand.
#[derive(Clone, Copy, Debug)]
pub struct TileData {
    /// Minimum value stored in the tile's displacement map.
    pub displacement_min: f32,
    /// Maximum value stored in the tile's displacement map.
    pub displacement_max: f32,
    /// Offset applied to heights read from the displacement map.
    pub displacement_offset: f32,
    /// Scale applied to heights read from the displacement map.
    pub displacement_scale: f32,
    /// Offset applied to the texture coordinates of the shared tile grid.
    pub texcoords_offset: Vec2,
    /// Scale applied to the texture coordinates of the shared tile grid.
    pub texcoords_scale: Vec2,
}

impl TileData {
    pub fn min_height(&self) -> f32 {
        self.displacement_min * self.displacement_scale + self.displacement_offset
    }

    pub fn max_height(&self) -> f32 {
        self.displacement_max * self.displacement_scale + self.displacement_offset
    }
}

/// Provides the topology of the terrain to be rendered.
///
/// Implementations typically compute tile data asynchronously. All methods
/// are polled once per update cycle and must be side effect free while no new
/// data is available.
pub trait TerrainDataSource: Send + Sync {
    /// Retrieves terrain data for a specific area, or `None` while the data
    /// is still being processed. Once data has been returned for an area, a
    /// subsequent call triggers a new computation.
    fn try_get_tile_data(&self, area: &SheetRect, curvature: &SheetCurvature) -> Option<TileData>;

    /// Whether this data source is currently processing tiles.
    fn is_loading(&self) -> bool;

    /// The number of quads each tile is split into along its edge.
    /// Must be a power of two.
    fn tile_tessellation(&self) -> u16;

    /// The minimum time a LOD should stay displayed before switching.
    fn min_lod_switch_time_secs(&self) -> f32;

    /// Terrain data for this area, previously requested with
    /// [`Self::try_get_tile_data`], is no longer needed.
    fn delete_tile_data(&self, area: &SheetRect);
}
