use crate::{
    curvature::SheetCurvature,
    data_source::TerrainDataSource,
    quad_tree::{Neighbor, NodeEvent, NodeId, QuadTree, QuadTreeManager, Quadrant, Side},
    tessellator::EdgeTessellation,
    tile::TerrainTile,
};
use bevy::{prelude::*, utils::HashMap};
use std::sync::Arc;

/// Resource associating per sheet data with the terrain sheet entities.
#[derive(Resource, Deref, DerefMut)]
pub struct TerrainComponents<C>(pub HashMap<Entity, C>);

impl<C> Default for TerrainComponents<C> {
    fn default() -> Self {
        Self(HashMap::default())
    }
}

/// The quadtree of terrain tiles of one sheet.
///
/// Specializes the generic [`QuadTree`] with the tile factory (children cover
/// a quarter of the parent area) and with event suspension: while a new LOD
/// is being built, structural changes are applied to the tree but their
/// visibility side effects are queued, keeping the displayed tile set stable
/// until the LOD is applied. Deleted tiles release their data at the data
/// source.
pub struct TileTree {
    tree: QuadTree<TerrainTile>,
    curvature: Arc<SheetCurvature>,
    data_source: Arc<dyn TerrainDataSource>,
    suspended: bool,
    pending_events: Vec<(NodeId, NodeEvent)>,
}

struct TileTreeOps<'a> {
    curvature: &'a SheetCurvature,
    data_source: &'a dyn TerrainDataSource,
    suspended: bool,
    pending_events: &'a mut Vec<(NodeId, NodeEvent)>,
}

impl QuadTreeManager<TerrainTile> for TileTreeOps<'_> {
    fn create_child(&mut self, parent: &TerrainTile, quadrant: Quadrant) -> TerrainTile {
        TerrainTile::subdivide(parent, quadrant, self.curvature)
    }

    fn node_event(&mut self, node: NodeId, value: &mut TerrainTile, event: NodeEvent) {
        if self.suspended {
            self.pending_events.push((node, event));
        } else {
            value.set_last_node_event(event);
        }
    }

    fn node_deleted(&mut self, tile: TerrainTile) {
        self.data_source.delete_tile_data(tile.area());
    }
}

impl TileTree {
    /// Creates the tree with a single root tile covering the whole sheet.
    ///
    /// The tree starts with events suspended, so the root only becomes
    /// visible once the sheet's first LOD is applied.
    pub fn new(curvature: Arc<SheetCurvature>, data_source: Arc<dyn TerrainDataSource>) -> Self {
        let root_tile = TerrainTile::new(*curvature.area(), &curvature);
        let mut pending_events = Vec::new();

        let mut ops = TileTreeOps {
            curvature: &curvature,
            data_source: &*data_source,
            suspended: true,
            pending_events: &mut pending_events,
        };
        let tree = QuadTree::new(root_tile, &mut ops);

        Self {
            tree,
            curvature,
            data_source,
            suspended: true,
            pending_events,
        }
    }

    pub fn tree(&self) -> &QuadTree<TerrainTile> {
        &self.tree
    }

    pub fn tile(&self, node: NodeId) -> &TerrainTile {
        self.tree.value(node)
    }

    pub fn tile_mut(&mut self, node: NodeId) -> &mut TerrainTile {
        self.tree.value_mut(node)
    }

    /// All allocated tiles, including currently disabled ones. Disabled
    /// tiles keep polling their data so that a re-division finds them ready.
    pub fn tiles_mut(&mut self) -> impl Iterator<Item = &mut TerrainTile> {
        self.tree.values_mut()
    }

    pub fn divide(&mut self, node: NodeId) {
        self.with_ops(|tree, ops| tree.divide(node, ops));
    }

    pub fn group(&mut self, node: NodeId) {
        self.with_ops(|tree, ops| tree.group(node, ops));
    }

    pub fn remove_unused_nodes(&mut self) {
        self.with_ops(|tree, ops| tree.remove_unused_nodes(ops));
    }

    /// Stops event delivery to the tiles; the displayed tile set stays
    /// untouched while the tree layout changes underneath.
    pub fn suspend_events(&mut self) {
        self.suspended = true;
    }

    /// Resumes event delivery and flushes all suspended events in their
    /// original order.
    pub fn resume_events(&mut self) {
        if !self.suspended {
            return;
        }

        self.suspended = false;

        for (node, event) in std::mem::take(&mut self.pending_events) {
            self.tree.value_mut(node).set_last_node_event(event);
        }
    }

    /// Registers a symmetric connection between the borders of two sheets.
    pub fn connect(
        tree_a: &mut TileTree,
        entity_a: Entity,
        side_a: Side,
        tree_b: &mut TileTree,
        entity_b: Entity,
        side_b: Side,
        flip: bool,
    ) {
        QuadTree::connect(
            &mut tree_a.tree,
            entity_a,
            side_a,
            &mut tree_b.tree,
            entity_b,
            side_b,
            flip,
        );
    }

    fn with_ops<R>(&mut self, f: impl FnOnce(&mut QuadTree<TerrainTile>, &mut TileTreeOps) -> R) -> R {
        let Self {
            tree,
            curvature,
            data_source,
            suspended,
            pending_events,
        } = self;

        let mut ops = TileTreeOps {
            curvature,
            data_source: &**data_source,
            suspended: *suspended,
            pending_events,
        };

        f(tree, &mut ops)
    }
}

/// Resolves a neighbor query, following tree-to-tree connections into the
/// adjacent sheet where necessary.
pub fn resolve_neighbor(
    trees: &TerrainComponents<TileTree>,
    entity: Entity,
    node: NodeId,
    side: Side,
) -> Option<(Entity, NodeId)> {
    match trees.get(&entity)?.tree.neighbor(node, side) {
        Neighbor::None => None,
        Neighbor::Local(neighbor) => Some((entity, neighbor)),
        Neighbor::Remote { tree, side, coord } => {
            let far_tree = trees.get(&tree)?;
            Some((tree, far_tree.tree.edge_at_coord(side, coord)))
        }
    }
}

fn neighbor_depth(
    trees: &TerrainComponents<TileTree>,
    entity: Entity,
    node: NodeId,
    side: Side,
) -> Option<u32> {
    resolve_neighbor(trees, entity, node, side)
        .map(|(neighbor_entity, neighbor)| trees[&neighbor_entity].tree.depth(neighbor))
}

/// The edge key a leaf needs to stitch seamlessly against its actual
/// neighbors: `2^(depth - neighbor_depth)` towards any shallower neighbor,
/// one everywhere else. A missing neighbor (unconnected sheet border) counts
/// as equal depth.
pub fn leaf_edge_tessellation(
    trees: &TerrainComponents<TileTree>,
    entity: Entity,
    node: NodeId,
    tessellation: u16,
) -> EdgeTessellation {
    let depth = trees[&entity].tree.depth(node);

    let divisor = |side: Side| {
        let neighbor_depth = neighbor_depth(trees, entity, node, side).unwrap_or(depth);
        let difference = depth
            .saturating_sub(neighbor_depth)
            .min(tessellation.trailing_zeros());

        1_u16 << difference
    };

    EdgeTessellation {
        top: divisor(Side::Top),
        bottom: divisor(Side::Bottom),
        left: divisor(Side::Left),
        right: divisor(Side::Right),
    }
}

/// Edge keys for all leaves of a sheet, computed in a read only pass so the
/// result can be applied while the trees are borrowed mutably.
pub(crate) fn compute_leaf_edges(
    trees: &TerrainComponents<TileTree>,
    entity: Entity,
    tessellation: u16,
) -> Vec<(NodeId, EdgeTessellation)> {
    let tree = trees[&entity].tree();

    tree.leaves()
        .map(|leaf| {
            (
                leaf,
                leaf_edge_tessellation(trees, entity, leaf, tessellation),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_source::TileData, math::SheetRect};
    use bevy::math::{DVec2, DVec3};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingDataSource {
        deleted: AtomicUsize,
    }

    impl TerrainDataSource for TrackingDataSource {
        fn try_get_tile_data(
            &self,
            _area: &SheetRect,
            _curvature: &SheetCurvature,
        ) -> Option<TileData> {
            None
        }

        fn is_loading(&self) -> bool {
            false
        }

        fn tile_tessellation(&self) -> u16 {
            16
        }

        fn min_lod_switch_time_secs(&self) -> f32 {
            0.0
        }

        fn delete_tile_data(&self, _area: &SheetRect) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_tree(data_source: Arc<TrackingDataSource>) -> TileTree {
        let area = SheetRect::new(DVec3::ZERO, DVec3::X, DVec3::Z, DVec2::splat(256.0));
        TileTree::new(Arc::new(SheetCurvature::flat(area)), data_source)
    }

    #[test]
    fn suspended_events_keep_tiles_stable_until_resume() {
        let mut tile_tree = test_tree(Arc::new(TrackingDataSource::default()));
        let root = tile_tree.tree().root();

        // the root enable event from construction is still suspended
        assert!(!tile_tree.tile(root).mesh.active);

        tile_tree.divide(root);
        let children = tile_tree.tree().children(root).unwrap();

        for child in children {
            assert!(!tile_tree.tile(child).mesh.active);
        }

        tile_tree.resume_events();

        for child in children {
            assert!(tile_tree.tile(child).mesh.active);
        }
        // the divided root is no longer a leaf and thus not displayed
        assert!(!tile_tree.tile(root).mesh.active);
    }

    #[test]
    fn child_tiles_cover_the_parent_quadrants() {
        let mut tile_tree = test_tree(Arc::new(TrackingDataSource::default()));
        let root = tile_tree.tree().root();
        let parent_area = *tile_tree.tile(root).area();

        tile_tree.divide(root);
        let children = tile_tree.tree().children(root).unwrap();

        for (child, quadrant) in children.into_iter().zip(Quadrant::ALL) {
            assert_eq!(
                *tile_tree.tile(child).area(),
                parent_area.quadrant(quadrant)
            );
        }
    }

    #[test]
    fn deleting_unused_tiles_releases_their_data() {
        let data_source = Arc::new(TrackingDataSource::default());
        let mut tile_tree = test_tree(data_source.clone());
        let root = tile_tree.tree().root();

        tile_tree.divide(root);
        tile_tree.resume_events();
        tile_tree.group(root);
        tile_tree.remove_unused_nodes();

        assert_eq!(data_source.deleted.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn edge_keys_follow_neighbor_depths() {
        let mut trees = TerrainComponents::<TileTree>::default();
        let entity = Entity::from_raw(1);
        let mut tile_tree = test_tree(Arc::new(TrackingDataSource::default()));

        // top left quadrant one level deeper than its siblings
        let root = tile_tree.tree().root();
        tile_tree.divide(root);
        let top_left = tile_tree.tree().children(root).unwrap()[0];
        tile_tree.divide(top_left);

        trees.insert(entity, tile_tree);

        let tree = trees[&entity].tree();
        let deep_leaf = tree.children(top_left).unwrap()[3]; // bottom right of the divided quadrant

        let edge = leaf_edge_tessellation(&trees, entity, deep_leaf, 16);

        // the coarser siblings lie right and below, the sheet border costs nothing
        assert_eq!(
            edge,
            EdgeTessellation {
                top: 1,
                bottom: 2,
                left: 1,
                right: 2,
            }
        );
    }
}
