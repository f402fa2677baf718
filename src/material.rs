use crate::{data_source::TileData, math::SheetRect};

/// The material rendering one terrain tile.
///
/// The shading system itself is out of scope, the LOD driver only needs to
/// know whether the material has settled (for the ready check before a LOD
/// switch) and to notify it of LOD changes so it can play a one frame morph.
pub trait TileMaterial: Send + Sync {
    /// True while the material still waits for parameter or texture updates.
    /// A LOD is only applied once every leaf material reports false.
    fn has_pending_updates(&self) -> bool;

    /// The tile's LOD changed. `morphing` indicates that the tile was
    /// already visible and the material may animate the transition.
    fn on_lod_changed(&mut self, morphing: bool);
}

/// Creates tile materials from freshly loaded tile data.
pub trait MaterialFactory: Send + Sync {
    fn create_material(&self, area: &SheetRect, data: &TileData) -> Box<dyn TileMaterial>;
}
