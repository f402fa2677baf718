use crate::{
    curvature::SheetCurvature,
    data_source::TerrainDataSource,
    lod_strategy::LodStrategy,
    material::MaterialFactory,
    math::SheetRect,
    quad_tree::NodeId,
    tasks::TaskScheduler,
    tessellator::SheetTessellator,
    tile::{PendingUpdates, TerrainTile},
    tile_tree::{compute_leaf_edges, TerrainComponents, TileTree},
    viewer::ViewerInfo,
    visibility::TileVisibilityTask,
};
use bevy::{math::DVec3, prelude::*};
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    sync::Arc,
};

/// How a sheet is bent onto the world surface.
pub enum SheetCurvatureParams {
    Flat,
    Curved {
        radius: f64,
        /// Curvature center; computed from the radius when omitted.
        center: Option<DVec3>,
    },
}

/// Configuration of one terrain sheet.
pub struct TerrainSheetParams {
    /// The area covered by the sheet, on the plane of minimum terrain height.
    pub area: SheetRect,
    pub curvature: SheetCurvatureParams,
    pub data_source: Arc<dyn TerrainDataSource>,
    pub material_factory: Arc<dyn MaterialFactory>,
}

/// A LOD quadtree based drawable terrain sheet.
///
/// The sheet drives its own LOD state machine:
/// `Idle → building (events suspended) → awaiting readiness → applying → Idle`.
/// The scheduling across sheets lives in
/// [`TerrainLodUpdater`](crate::lod_updater::TerrainLodUpdater).
#[derive(Component)]
pub struct TerrainSheet {
    pub(crate) curvature: Arc<SheetCurvature>,
    pub(crate) tessellator: SheetTessellator,
    pub(crate) data_source: Arc<dyn TerrainDataSource>,
    pub(crate) material_factory: Arc<dyn MaterialFactory>,
    /// Sheets whose quadtrees are connected to this one. Their border edges
    /// are resynchronized whenever this sheet applies a new LOD.
    pub(crate) adjacent_sheets: Vec<Entity>,
    pub(crate) visibility: Option<TileVisibilityTask>,
    /// True while a candidate LOD is building and tree events are suspended.
    is_building_new_lod: bool,
    /// True if the last computed LOD did not reach the required tessellation
    /// and another build must follow once the current one is applied.
    is_lod_incomplete: bool,
    /// True once a valid LOD for this sheet has been applied.
    has_any_lod: bool,
}

/// Builds the sheet component and its tile tree from the configuration.
pub(crate) fn build_terrain_sheet(params: TerrainSheetParams) -> (TerrainSheet, TileTree) {
    let curvature = Arc::new(match params.curvature {
        SheetCurvatureParams::Flat => SheetCurvature::flat(params.area),
        SheetCurvatureParams::Curved { radius, center } => {
            SheetCurvature::curved(params.area, radius, center)
        }
    });

    let tessellator = SheetTessellator::new(params.data_source.tile_tessellation());
    let tile_tree = TileTree::new(curvature.clone(), params.data_source.clone());

    let sheet = TerrainSheet {
        curvature,
        tessellator,
        data_source: params.data_source,
        material_factory: params.material_factory,
        adjacent_sheets: Vec::new(),
        visibility: None,
        is_building_new_lod: false,
        is_lod_incomplete: true,
        has_any_lod: false,
    };

    (sheet, tile_tree)
}

/// Spawns a standalone terrain sheet and registers its tile tree.
pub fn spawn_terrain_sheet(world: &mut World, params: TerrainSheetParams) -> Entity {
    let (sheet, tile_tree) = build_terrain_sheet(params);
    let entity = world.spawn(sheet).id();

    world
        .resource_mut::<TerrainComponents<TileTree>>()
        .insert(entity, tile_tree);

    entity
}

/// The single capability the LOD ready check needs from any collaborator.
trait ReadyCheck {
    fn is_ready(&self) -> bool;
}

struct DataSourceReady<'a>(&'a dyn TerrainDataSource);

impl ReadyCheck for DataSourceReady<'_> {
    fn is_ready(&self) -> bool {
        !self.0.is_loading()
    }
}

struct TessellatorReady<'a>(&'a SheetTessellator);

impl ReadyCheck for TessellatorReady<'_> {
    fn is_ready(&self) -> bool {
        !self.0.loading_required()
    }
}

struct DivisionCandidate {
    priority: f32,
    node: NodeId,
}

impl PartialEq for DivisionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DivisionCandidate {}

impl PartialOrd for DivisionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DivisionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the binary heap pops the most urgent (lowest) ratio first
        other.priority.total_cmp(&self.priority)
    }
}

impl TerrainSheet {
    pub fn area(&self) -> &SheetRect {
        self.curvature.area()
    }

    pub fn curvature(&self) -> &SheetCurvature {
        &self.curvature
    }

    pub fn tessellator(&self) -> &SheetTessellator {
        &self.tessellator
    }

    pub fn adjacent_sheets(&self) -> &[Entity] {
        &self.adjacent_sheets
    }

    /// True while a new LOD tree is building and tree events are suspended.
    pub fn is_building_new_lod(&self) -> bool {
        self.is_building_new_lod
    }

    /// True if the last computed LOD does not reach the required tessellation.
    pub fn is_lod_incomplete(&self) -> bool {
        self.is_lod_incomplete
    }

    /// True if a valid LOD for this sheet is available.
    pub fn has_any_lod(&self) -> bool {
        self.has_any_lod
    }

    /// The minimum display time between LOD switches, set by the data source.
    pub fn min_lod_switch_time_secs(&self) -> f32 {
        self.data_source.min_lod_switch_time_secs()
    }

    /// Starts building a new candidate LOD: recomputes the target
    /// tessellation, queues the edge buffers for the candidate leaves and
    /// suspends tree event delivery until [`Self::apply_new_lod`].
    ///
    /// Panics when called while a build is already in progress; that is a
    /// scheduling bug, not a runtime condition.
    pub fn begin_updating_lod(
        &mut self,
        entity: Entity,
        tile_trees: &mut TerrainComponents<TileTree>,
        view: &ViewerInfo,
        strategy: &dyn LodStrategy,
        lod_up_delay: u32,
    ) {
        assert!(
            !self.is_building_new_lod,
            "terrain sheet is still processing the previous LOD"
        );

        self.update_tessellation(
            tile_trees.get_mut(&entity).unwrap(),
            view,
            strategy,
            lod_up_delay,
        );
        self.prepare_tile_edges(tile_trees, entity);
        self.is_building_new_lod = true;
    }

    /// Polled once per cycle: true when the data source, the tessellator and
    /// every leaf tile report no outstanding work for the candidate LOD.
    pub fn is_new_lod_ready(&self, tile_tree: &TileTree) -> bool {
        let collaborators: [&dyn ReadyCheck; 2] = [
            &DataSourceReady(&*self.data_source),
            &TessellatorReady(&self.tessellator),
        ];

        if !collaborators.iter().all(|collaborator| collaborator.is_ready()) {
            return false;
        }

        tile_tree
            .tree()
            .leaves()
            .all(|leaf| tile_tree.tile(leaf).is_ready(&self.tessellator))
    }

    /// Switches the sheet to the candidate LOD: resumes and flushes the
    /// suspended tree events, stitches the leaf edges against the actual
    /// neighbor depths, notifies the tiles and prunes subtrees that fell out
    /// of use.
    ///
    /// Panics when no build is in progress.
    pub fn apply_new_lod(&mut self, entity: Entity, tile_trees: &mut TerrainComponents<TileTree>) {
        assert!(
            self.is_building_new_lod,
            "there is no LOD to be applied, call begin_updating_lod first"
        );

        tile_trees.get_mut(&entity).unwrap().resume_events();
        self.update_tile_edges(tile_trees, entity);
        self.tiles_on_lod_changed(tile_trees.get_mut(&entity).unwrap());
        tile_trees.get_mut(&entity).unwrap().remove_unused_nodes();

        self.is_building_new_lod = false;
        self.has_any_lod = true;

        debug!(
            "applied new LOD with {} leaves{}",
            tile_trees[&entity].tree().leaf_count(),
            if self.is_lod_incomplete {
                " (incomplete)"
            } else {
                ""
            }
        );
    }

    /// Re-stitches this sheet's border against its neighbors without a full
    /// rebuild, after an adjacent sheet switched LOD. Morph transitions are
    /// played where tiles stay visible.
    pub fn update_edge_tessellation(
        &mut self,
        entity: Entity,
        tile_trees: &mut TerrainComponents<TileTree>,
    ) {
        flag_leaves_visibility(tile_trees.get_mut(&entity).unwrap());
        self.prepare_tile_edges(tile_trees, entity);
        self.update_tile_edges(tile_trees, entity);
        self.tiles_on_lod_changed(tile_trees.get_mut(&entity).unwrap());
    }

    /// The range of tessellation ratios over all leaves, used by the
    /// scheduler to pick the sheet with the largest discrepancy.
    pub fn tessellation_ratio_range(
        &self,
        tile_tree: &TileTree,
        strategy: &dyn LodStrategy,
    ) -> (f32, f32) {
        tile_tree
            .tree()
            .leaves()
            .fold((f32::MAX, f32::MIN), |(min, max), leaf| {
                let ratio = self.required_tess_ratio(tile_tree.tile(leaf), strategy);
                (min.min(ratio), max.max(ratio))
            })
    }

    /// Walks the tree top down, grouping over-tessellated tiles (after the
    /// debounce) and dividing under-tessellated leaves, most urgent first,
    /// within the division budget. The budget is waived until the sheet has
    /// completed its first LOD, so the initial build converges in full
    /// before anything is shown.
    fn update_tessellation(
        &mut self,
        tile_tree: &mut TileTree,
        view: &ViewerInfo,
        strategy: &dyn LodStrategy,
        lod_up_delay: u32,
    ) {
        self.is_lod_incomplete = false;

        flag_leaves_visibility(tile_tree);
        tile_tree.suspend_events();

        let mut to_divide = BinaryHeap::new();
        let mut queue = VecDeque::from([tile_tree.tree().root()]);

        while let Some(node) = queue.pop_front() {
            let ratio = self.required_tess_ratio(tile_tree.tile(node), strategy);
            let is_leaf = tile_tree.tree().is_leaf(node);

            if ratio >= 1.0 {
                // required tessellation reached
                if !is_leaf {
                    if tile_tree.tile_mut(node).should_delay_lod_up(lod_up_delay) {
                        // keep the children for now to avoid LOD flickering
                        queue.extend(tile_tree.tree().children(node).unwrap());
                    } else {
                        tile_tree.group(node);
                    }
                }
            } else {
                // more vertices are required
                tile_tree.tile_mut(node).reset_lod_up_debounce();

                if !is_leaf {
                    // the sub tiles already exist, keep walking down
                    queue.extend(tile_tree.tree().children(node).unwrap());
                } else {
                    // a single division is not enough below a quarter of the target
                    self.is_lod_incomplete |= ratio < 0.25;

                    // off screen tiles divide with lower priority
                    let mut priority = ratio;
                    if !view.intersects(tile_tree.tile(node).bounds()) {
                        priority += 1.0;
                    }

                    to_divide.push(DivisionCandidate { priority, node });
                }
            }
        }

        let max_divisions = strategy.max_divisions_per_update();
        let mut division_count = 0;

        while !to_divide.is_empty() && (division_count < max_divisions || !self.has_any_lod) {
            let candidate = to_divide.pop().unwrap();
            tile_tree.divide(candidate.node);
            division_count += 1;

            if !self.has_any_lod {
                // the unbudgeted first build keeps refining the fresh
                // children until the whole sheet reaches its target density
                for child in tile_tree.tree().children(candidate.node).unwrap() {
                    let ratio = self.required_tess_ratio(tile_tree.tile(child), strategy);

                    if ratio < 1.0 {
                        let mut priority = ratio;
                        if !view.intersects(tile_tree.tile(child).bounds()) {
                            priority += 1.0;
                        }

                        to_divide.push(DivisionCandidate {
                            priority,
                            node: child,
                        });
                    }
                }
            }
        }

        if !self.has_any_lod {
            // the exhaustive first build leaves nothing outstanding
            self.is_lod_incomplete = !to_divide.is_empty();
        } else {
            // divisions that did not fit the budget keep the LOD incomplete
            self.is_lod_incomplete |= !to_divide.is_empty();
        }
    }

    /// The ratio between the tile's current quad density and the density
    /// required by the LOD strategy. Below one means the tile needs more
    /// detail.
    fn required_tess_ratio(&self, tile: &TerrainTile, strategy: &dyn LodStrategy) -> f32 {
        let tessellation = f64::from(self.tessellator.tessellation());
        let tile_density = ((tessellation * tessellation) / tile.area().area()) as f32;

        let surface_normal = self
            .curvature
            .sample_at_sheet_pos(tile.area().center())
            .normal;
        let required_density = strategy.required_vertex_density_for(
            tile.bounds(),
            surface_normal,
            tile.min_displacement_height(),
            tile.max_displacement_height(),
        );

        tile_density / required_density
    }

    /// Requests the edge buffers for the current leaves, so the geometry is
    /// generated before the LOD switch needs it.
    fn prepare_tile_edges(&mut self, tile_trees: &TerrainComponents<TileTree>, entity: Entity) {
        for (_, edge) in compute_leaf_edges(tile_trees, entity, self.tessellator.tessellation()) {
            self.tessellator.request_edge_tessellation(edge);
        }
    }

    /// Recomputes every leaf's edge key from the actual neighbor depths and
    /// assigns it to the tiles.
    fn update_tile_edges(&mut self, tile_trees: &mut TerrainComponents<TileTree>, entity: Entity) {
        let edges = compute_leaf_edges(tile_trees, entity, self.tessellator.tessellation());

        let tile_tree = tile_trees.get_mut(&entity).unwrap();
        for (node, edge) in edges {
            tile_tree.tile_mut(node).set_edge_tessellation(edge);
        }
    }

    fn tiles_on_lod_changed(&mut self, tile_tree: &mut TileTree) {
        let leaves: Vec<NodeId> = tile_tree.tree().leaves().collect();

        for leaf in leaves {
            tile_tree.tile_mut(leaf).on_lod_changed(&mut self.tessellator);
        }
    }

    /// Polls the data source for tiles whose data is outstanding and swaps
    /// settled morph tessellations. Runs for all allocated tiles, including
    /// the currently disabled ones, so a re-division finds them ready.
    pub(crate) fn poll_tile_updates(&mut self, tile_tree: &mut TileTree) {
        let Self {
            curvature,
            tessellator,
            data_source,
            material_factory,
            ..
        } = self;

        for tile in tile_tree.tiles_mut() {
            if tile.pending_updates().contains(PendingUpdates::DATA) {
                if let Some(data) = data_source.try_get_tile_data(tile.area(), curvature) {
                    tile.apply_data(&data, curvature, &**material_factory);
                }
            }

            tile.poll_edge_swap(tessellator);
        }
    }

    /// Kicks or harvests the time sliced background visibility pass.
    pub(crate) fn update_tiles_visibility(
        &mut self,
        tile_tree: &mut TileTree,
        view: &ViewerInfo,
        tasks: &dyn TaskScheduler,
        slices: u32,
    ) {
        let visibility = self
            .visibility
            .get_or_insert_with(|| TileVisibilityTask::new(tasks, self.curvature.clone()));

        visibility.update(tile_tree, view.position, slices);
    }
}

/// Remembers which tiles are currently displayed, so that the next LOD
/// switch can restrict cosmetic morphs to tiles that actually were visible.
fn flag_leaves_visibility(tile_tree: &mut TileTree) {
    let nodes: Vec<(NodeId, bool)> = tile_tree
        .tree()
        .active_nodes()
        .map(|node| (node, tile_tree.tree().is_leaf(node)))
        .collect();

    for (node, is_leaf) in nodes {
        tile_tree.tile_mut(node).was_visible_in_previous_lod = is_leaf;
    }
}
