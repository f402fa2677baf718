//! This crate renders arbitrarily large terrains at a continuously adapted
//! level of detail, from a single flat sheet up to whole planets assembled
//! from six curved sheets, without cracks between regions of different
//! detail and without stalling the frame while detail changes.
//!
//! # Background
//! Each terrain sheet subdivides its area with a quadtree of tiles. Once per
//! cycle the [`lod_updater`] picks one sheet and rebuilds its tree towards
//! the density required by the [`lod_strategy`]: tiles too coarse divide
//! (most urgent first, within a per cycle budget), tiles too fine merge
//! back after a debounce. The rebuild happens against suspended tree events,
//! so the displayed tile set stays stable; only when the data source, the
//! tessellator and every tile report ready is the new LOD applied in one
//! step. A sheet therefore never shows a half built mesh.
//!
//! Cracks between tiles of different detail are closed by the
//! [`tessellator`]: all tiles share one regular vertex grid, and a cached
//! index buffer per edge configuration collapses the finer edge rows into
//! fans that line up exactly with a coarser neighbor. Neighbor depths are
//! found through the [`quad_tree`]'s cross tree navigation, which also works
//! across sheet borders, so a planet's six faces stitch seamlessly.
//!
//! The [`curvature`] model bends flat sheet positions onto a sphere through
//! a precomputed lookup table, with a degenerate exact flat mode. Engine
//! concerns stay behind small traits: the terrain [`data_source`], the
//! [`material`] factory, the GPU buffer allocator in [`resources`] and the
//! background [`tasks`] used by the time sliced visibility pass.

pub mod curvature;
pub mod data_source;
pub mod lod_strategy;
pub mod lod_updater;
pub mod material;
pub mod math;
pub mod planet;
pub mod plugin;
pub mod quad_tree;
pub mod resources;
pub mod settings;
pub mod tasks;
pub mod terrain;
pub mod tessellator;
pub mod tile;
pub mod tile_tree;
pub mod viewer;

mod visibility;

pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        curvature::SheetCurvature,
        data_source::{TerrainDataSource, TileData},
        lod_strategy::{DistanceLod, HeightDensityModifier, LodStrategy},
        lod_updater::TerrainLodUpdater,
        material::{MaterialFactory, TileMaterial},
        math::{DAabb3, SheetRect},
        planet::{spawn_planet, Planet, PlanetParams},
        plugin::TerrainLodPlugin,
        quad_tree::{QuadTree, Side},
        resources::{ResourceAllocator, TerrainResources},
        settings::TerrainSettings,
        tasks::{InlineTasks, TaskScheduler, TerrainTasks, ThreadPoolTasks},
        terrain::{
            spawn_terrain_sheet, SheetCurvatureParams, TerrainSheet, TerrainSheetParams,
        },
        tessellator::EdgeTessellation,
        tile_tree::{TerrainComponents, TileTree},
        viewer::{CullingVolume, SphereVolume, TerrainViewer},
    };
}
