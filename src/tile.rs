use crate::{
    curvature::{CurvatureSample, SheetCurvature},
    data_source::TileData,
    material::{MaterialFactory, TileMaterial},
    math::{DAabb3, SheetRect},
    quad_tree::{NodeEvent, Quadrant},
    tessellator::{EdgeTessellation, SheetTessellator},
};
use bevy::math::DVec3;
use bitflags::bitflags;

bitflags! {
    /// Outstanding asynchronous work on a tile. A candidate LOD is only
    /// applied once every leaf has settled.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PendingUpdates: u8 {
        /// Waiting for the data source to deliver tile data.
        const DATA = 1 << 0;
        /// A visible tile keeps its widened morph tessellation until the
        /// material has settled, then swaps to the final edge key.
        const EDGE_SWAP = 1 << 1;
    }
}

/// The drawable state of a tile: buffer selection and visibility. The
/// geometry itself is shared through the sheet's
/// [`SheetTessellator`], a tile only picks an index buffer via its edge key.
pub struct TileMesh {
    pub active: bool,
    pub material: Option<Box<dyn TileMaterial>>,
    edge_tessellation: EdgeTessellation,
}

impl TileMesh {
    fn new() -> Self {
        Self {
            active: false,
            material: None,
            edge_tessellation: EdgeTessellation::default(),
        }
    }

    pub fn edge_tessellation(&self) -> EdgeTessellation {
        self.edge_tessellation
    }

    pub fn set_edge_tessellation(
        &mut self,
        edge: EdgeTessellation,
        tessellator: &mut SheetTessellator,
    ) {
        self.edge_tessellation = edge;
        tessellator.request_edge_tessellation(edge);
    }

    fn material_settled(&self) -> bool {
        self.material
            .as_ref()
            .is_some_and(|material| !material.has_pending_updates())
    }
}

/// One chunk of terrain, covering a leaf (or former leaf) of a sheet's
/// quadtree.
pub struct TerrainTile {
    area: SheetRect,
    pub mesh: TileMesh,
    bounds: DAabb3,
    min_displacement_height: f32,
    max_displacement_height: f32,
    /// Curvature offset pre-applied to the tile transform, so that tile
    /// local coordinates stay small on planetary curvature. Truncated to
    /// whole units to leave mantissa headroom for the in-shader subtraction.
    curvature_pre_offset: DVec3,
    /// The edge key this tile is supposed to use after the current LOD
    /// switch. Applied to the mesh by [`Self::on_lod_changed`].
    edge_tessellation: EdgeTessellation,
    pending: PendingUpdates,
    last_node_event: NodeEvent,
    is_occluded: bool,
    /// Whether the tile was displayed before the terrain switched to the
    /// current LOD, used to decide if a morph transition is worthwhile.
    pub was_visible_in_previous_lod: bool,
    lod_up_qualified_cycles: u32,
}

impl TerrainTile {
    pub fn new(area: SheetRect, curvature: &SheetCurvature) -> Self {
        Self::with_height_estimate(area, curvature, 0.0, 0.0)
    }

    /// A child tile covering one quadrant of its parent. Until its own data
    /// arrives, the displacement range is inherited from the parent so that
    /// culling and LOD priorities keep working during streaming.
    pub fn subdivide(parent: &TerrainTile, quadrant: Quadrant, curvature: &SheetCurvature) -> Self {
        Self::with_height_estimate(
            parent.area.quadrant(quadrant),
            curvature,
            parent.min_displacement_height,
            parent.max_displacement_height,
        )
    }

    fn with_height_estimate(
        area: SheetRect,
        curvature: &SheetCurvature,
        min_height: f32,
        max_height: f32,
    ) -> Self {
        let curvature_pre_offset = curvature
            .sample_at_sheet_pos(area.center())
            .world_offset
            .trunc();

        Self {
            area,
            mesh: TileMesh::new(),
            bounds: compute_bounds(&area, curvature, min_height, max_height),
            min_displacement_height: min_height,
            max_displacement_height: max_height,
            curvature_pre_offset,
            edge_tessellation: EdgeTessellation::default(),
            pending: PendingUpdates::DATA,
            last_node_event: NodeEvent::Disabled,
            is_occluded: false,
            was_visible_in_previous_lod: false,
            lod_up_qualified_cycles: 0,
        }
    }

    pub fn area(&self) -> &SheetRect {
        &self.area
    }

    /// This tile's bounding box in world space. An approximation derived
    /// from the parent's displacement range until the tile data has loaded.
    pub fn bounds(&self) -> &DAabb3 {
        &self.bounds
    }

    pub fn min_displacement_height(&self) -> f32 {
        self.min_displacement_height
    }

    pub fn max_displacement_height(&self) -> f32 {
        self.max_displacement_height
    }

    pub fn curvature_pre_offset(&self) -> DVec3 {
        self.curvature_pre_offset
    }

    pub fn pending_updates(&self) -> PendingUpdates {
        self.pending
    }

    pub fn edge_tessellation(&self) -> EdgeTessellation {
        self.edge_tessellation
    }

    pub fn set_edge_tessellation(&mut self, edge: EdgeTessellation) {
        self.edge_tessellation = edge;
    }

    /// Fresh data arrived from the data source: update the displacement
    /// range, the bounding box and the material.
    pub fn apply_data(
        &mut self,
        data: &TileData,
        curvature: &SheetCurvature,
        material_factory: &dyn MaterialFactory,
    ) {
        self.min_displacement_height = data.min_height();
        self.max_displacement_height = data.max_height();
        self.bounds = compute_bounds(
            &self.area,
            curvature,
            self.min_displacement_height,
            self.max_displacement_height,
        );
        self.mesh.material = Some(material_factory.create_material(&self.area, data));
        self.pending.remove(PendingUpdates::DATA);
    }

    /// Swaps a morphing tile to its final edge key once the material has
    /// settled. Polled once per update cycle.
    pub fn poll_edge_swap(&mut self, tessellator: &mut SheetTessellator) {
        if self.pending.contains(PendingUpdates::EDGE_SWAP) && self.mesh.material_settled() {
            self.mesh
                .set_edge_tessellation(self.edge_tessellation, tessellator);
            self.pending.remove(PendingUpdates::EDGE_SWAP);
        }
    }

    /// True once all asynchronous work for this tile has settled and its
    /// buffers are available, making it eligible for a LOD switch.
    pub fn is_ready(&self, tessellator: &SheetTessellator) -> bool {
        self.pending.is_empty()
            && self.mesh.material_settled()
            && tessellator.is_tessellation_available(self.mesh.edge_tessellation())
            && tessellator.vertex_buffer().is_some()
    }

    pub fn last_node_event(&self) -> NodeEvent {
        self.last_node_event
    }

    pub fn set_last_node_event(&mut self, event: NodeEvent) {
        self.last_node_event = event;
        self.update_visibility();
    }

    pub fn is_occluded(&self) -> bool {
        self.is_occluded
    }

    /// Applies an occlusion result computed by the visibility pass,
    /// returning whether it changed.
    pub fn set_occluded(&mut self, occluded: bool) -> bool {
        let changed = self.is_occluded != occluded;
        self.is_occluded = occluded;
        changed
    }

    pub fn update_visibility(&mut self) {
        let is_leaf = matches!(
            self.last_node_event,
            NodeEvent::Grouped | NodeEvent::Enabled
        );

        self.mesh.active = is_leaf && !self.is_occluded;
    }

    /// The sheet switched LOD. A tile that stays visible widens its edge key
    /// to the union of old and new for one frame, so the mesh stays hole
    /// free while the material morphs; the final key is applied by
    /// [`Self::poll_edge_swap`].
    pub fn on_lod_changed(&mut self, tessellator: &mut SheetTessellator) {
        if self.was_visible_in_previous_lod {
            if self.edge_tessellation != self.mesh.edge_tessellation() {
                let morph_edges = self.edge_tessellation.max(self.mesh.edge_tessellation());
                self.mesh.set_edge_tessellation(morph_edges, tessellator);
                self.pending.insert(PendingUpdates::EDGE_SWAP);
            }
        } else {
            self.mesh
                .set_edge_tessellation(self.edge_tessellation, tessellator);
        }

        if let Some(material) = &mut self.mesh.material {
            material.on_lod_changed(self.was_visible_in_previous_lod);
        }
    }

    /// Detail reduction debounce: the tile may only be merged into its
    /// parent after qualifying for `delay` consecutive update cycles.
    pub fn should_delay_lod_up(&mut self, delay: u32) -> bool {
        if self.lod_up_qualified_cycles < delay {
            self.lod_up_qualified_cycles += 1;
            true
        } else {
            self.lod_up_qualified_cycles = 0;
            false
        }
    }

    /// The tile stopped qualifying for a merge, start the debounce over.
    pub fn reset_lod_up_debounce(&mut self) {
        self.lod_up_qualified_cycles = 0;
    }
}

/// Whether the tile is hidden behind the horizon of the sheet's curvature,
/// seen from `view_position`. Pure so the visibility pass can run it on a
/// background task against a snapshot of tile state.
pub fn compute_occlusion(
    area: &SheetRect,
    min_height: f32,
    max_height: f32,
    curvature: &SheetCurvature,
    view_position: DVec3,
    curvature_at_view: &CurvatureSample,
) -> bool {
    if curvature.is_flat() {
        return false;
    }

    // the tile position closest to the camera, at maximum elevation
    let flat_view = view_position - curvature_at_view.world_offset;
    let closest = area.closest_point(flat_view);
    let tile_curvature = curvature.sample_at_sheet_pos(closest);
    let tile_highest =
        closest + tile_curvature.world_offset + tile_curvature.normal * max_height as f64;

    // occluded if the sight line to that point dips below the curvature sphere
    let segment = tile_highest - view_position;
    let t = (curvature.center() - view_position).dot(segment) / segment.length_squared();

    if t <= 0.0 || t >= 1.0 {
        return false;
    }

    // tiles below sea level must not occlude themselves
    let occluding_radius = curvature.radius() + f64::from(min_height.min(0.0));
    let closest_to_center = view_position + segment * t;

    closest_to_center.distance(curvature.center()) < occluding_radius
}

fn compute_bounds(
    area: &SheetRect,
    curvature: &SheetCurvature,
    min_height: f32,
    max_height: f32,
) -> DAabb3 {
    let normal = area.normal();
    let min_height = f64::from(min_height);
    let max_height = f64::from(max_height);

    if curvature.is_flat() {
        let corners = area.corners();

        return DAabb3::bounding(
            corners
                .iter()
                .flat_map(|&corner| [corner + normal * min_height, corner + normal * max_height]),
        );
    }

    // sample the curved surface at center, corners and edge midpoints and
    // bound the displaced extremes, with a margin for the sparse sampling
    let mut samples = vec![area.center()];
    samples.extend(area.corners());
    samples.extend(area.edge_midpoints());

    DAabb3::bounding(samples.iter().flat_map(|&position| {
        let sample = curvature.sample_at_sheet_pos(position);
        let curved = position + sample.world_offset;

        [
            curved + sample.normal * min_height,
            curved + sample.normal * max_height,
        ]
    }))
    .scaled_about_center(1.01)
}
