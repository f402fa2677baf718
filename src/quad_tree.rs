use bevy::prelude::*;
use slab::Slab;

/// Coordinate bits available for subdivision. One bit of the i64 range is
/// left unused so that neighbor comparisons can not overflow.
const COORDINATE_BITS: u32 = 61;

/// The four sides of a quadtree, also used to address tree-to-tree connections.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Side {
    Left,
    Right,
    Top,
    Bottom,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Left, Side::Right, Side::Top, Side::Bottom];

    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Top => Side::Bottom,
            Side::Bottom => Side::Top,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
            Side::Top => 2,
            Side::Bottom => 3,
        }
    }
}

/// The position of a child node within its parent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::TopRight,
        Quadrant::BottomLeft,
        Quadrant::BottomRight,
    ];

    fn index(self) -> usize {
        match self {
            Quadrant::TopLeft => 0,
            Quadrant::TopRight => 1,
            Quadrant::BottomLeft => 2,
            Quadrant::BottomRight => 3,
        }
    }

    /// Whether this quadrant borders the given side of its parent.
    fn touches(self, side: Side) -> bool {
        match side {
            Side::Left => matches!(self, Quadrant::TopLeft | Quadrant::BottomLeft),
            Side::Right => matches!(self, Quadrant::TopRight | Quadrant::BottomRight),
            Side::Top => matches!(self, Quadrant::TopLeft | Quadrant::TopRight),
            Side::Bottom => matches!(self, Quadrant::BottomLeft | Quadrant::BottomRight),
        }
    }
}

/// Stable handle to a node within one [`QuadTree`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(usize);

/// Structural events delivered to the [`QuadTreeManager`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeEvent {
    /// An existing or freshly created node has become part of the active tree.
    Enabled,
    /// The node left the active tree, but is kept for cheap re-division.
    Disabled,
    /// The node's children have been disabled, the node is a leaf again.
    Grouped,
    /// The node's children have been enabled, the node is no longer a leaf.
    Divided,
}

/// Callbacks through which a [`QuadTree`] creates child values and reports
/// structural changes. Event delivery is a plain data operation, so a manager
/// may buffer events instead of acting on them immediately.
pub trait QuadTreeManager<T> {
    fn create_child(&mut self, parent: &T, quadrant: Quadrant) -> T;

    fn node_event(&mut self, node: NodeId, value: &mut T, event: NodeEvent);

    /// The node has been removed for good, its value is handed back.
    fn node_deleted(&mut self, value: T);
}

/// A registered link from one side of a tree to the side of another tree.
///
/// Connections are plain value records. They never own the far tree, which is
/// identified by the entity of the terrain sheet it belongs to.
#[derive(Clone, Copy, Debug)]
pub struct TreeConnection {
    pub tree: Entity,
    pub side: Side,
    /// Whether edge coordinates run in opposite directions on the two sides.
    pub flip: bool,
}

/// The result of a neighbor query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Neighbor {
    /// The query ran off an unconnected border of the tree.
    None,
    /// The neighbor lives in the same tree.
    Local(NodeId),
    /// The neighbor lies beyond a tree-to-tree connection and must be looked
    /// up with [`QuadTree::edge_at_coord`] on the far tree.
    Remote { tree: Entity, side: Side, coord: i64 },
}

struct Node<T> {
    value: T,
    parent: Option<NodeId>,
    quadrant: Quadrant,
    children: Option<[NodeId; 4]>,
    is_leaf: bool,
    depth: u32,
    /// Fixed point coordinate from left to right, halved at every division.
    /// Used only for neighbor comparisons, never for geometry.
    left_right: i64,
    /// Fixed point coordinate from top to bottom.
    top_bottom: i64,
}

/// A generic quadtree over values of type `T`.
///
/// Nodes either are leaves or have exactly four children, which are always
/// created and destroyed as a group. Grouping a node only deactivates its
/// children, so a later re-division can reuse them without involving the
/// manager; [`QuadTree::remove_unused_nodes`] reclaims subtrees that stayed
/// unused.
///
/// Neighbor queries walk up to the first ancestor on the far row, then
/// descend towards the queried coordinate, which makes them O(depth). At tree
/// borders they follow the registered [`TreeConnection`] if present.
pub struct QuadTree<T> {
    nodes: Slab<Node<T>>,
    root: NodeId,
    connections: [Option<TreeConnection>; 4],
    node_count: usize,
    leaf_count: usize,
}

impl<T> QuadTree<T> {
    pub fn new(root_value: T, manager: &mut impl QuadTreeManager<T>) -> Self {
        let mut nodes = Slab::new();
        let root = NodeId(nodes.insert(Node {
            value: root_value,
            parent: None,
            quadrant: Quadrant::TopLeft,
            children: None,
            is_leaf: true,
            depth: 0,
            left_right: 0,
            top_bottom: 0,
        }));

        let mut tree = Self {
            nodes,
            root,
            connections: [None; 4],
            node_count: 1,
            leaf_count: 1,
        };

        tree.emit(root, NodeEvent::Enabled, manager);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Count of nodes in the active tree.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Count of leaves in the active tree.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Whether the node still exists. Deferred consumers of node handles
    /// (e.g. buffered visibility results) check before dereferencing, since
    /// [`Self::remove_unused_nodes`] may have deleted the node in between.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(node.0)
    }

    pub fn value(&self, node: NodeId) -> &T {
        &self.nodes[node.0].value
    }

    pub fn value_mut(&mut self, node: NodeId) -> &mut T {
        &mut self.nodes[node.0].value
    }

    pub fn depth(&self, node: NodeId) -> u32 {
        self.nodes[node.0].depth
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node.0].is_leaf
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// The active children of an internal node, `None` for leaves.
    pub fn children(&self, node: NodeId) -> Option<[NodeId; 4]> {
        if self.nodes[node.0].is_leaf {
            None
        } else {
            self.nodes[node.0].children
        }
    }

    pub fn child(&self, node: NodeId, quadrant: Quadrant) -> Option<NodeId> {
        self.children(node).map(|children| children[quadrant.index()])
    }

    pub fn connection(&self, side: Side) -> Option<&TreeConnection> {
        self.connections[side.index()].as_ref()
    }

    /// Registers a symmetric connection between the sides of two trees.
    ///
    /// Panics if either side already carries a different connection, since
    /// silently replacing one would desynchronize the edge stitching of the
    /// previously connected trees.
    pub fn connect(
        tree_a: &mut QuadTree<T>,
        entity_a: Entity,
        side_a: Side,
        tree_b: &mut QuadTree<T>,
        entity_b: Entity,
        side_b: Side,
        flip: bool,
    ) {
        for (tree, side, far) in [(&*tree_a, side_a, entity_b), (&*tree_b, side_b, entity_a)] {
            if let Some(existing) = tree.connection(side) {
                assert!(
                    existing.tree == far,
                    "side {side:?} is already connected to another tree"
                );
            }
        }

        tree_a.connections[side_a.index()] = Some(TreeConnection {
            tree: entity_b,
            side: side_b,
            flip,
        });
        tree_b.connections[side_b.index()] = Some(TreeConnection {
            tree: entity_a,
            side: side_a,
            flip,
        });
    }

    /// Turns a leaf into an internal node with four children.
    ///
    /// Children disabled by an earlier [`Self::group`] are reactivated without
    /// asking the manager for new values.
    pub fn divide(&mut self, node: NodeId, manager: &mut impl QuadTreeManager<T>) {
        if !self.nodes[node.0].is_leaf {
            return; // already divided
        }

        let depth = self.nodes[node.0].depth;
        assert!(
            depth < COORDINATE_BITS,
            "quadtree coordinate bits exhausted at depth {depth}"
        );

        if self.nodes[node.0].children.is_none() {
            let delta = 1_i64 << (COORDINATE_BITS - 1 - depth);
            let left_right = self.nodes[node.0].left_right;
            let top_bottom = self.nodes[node.0].top_bottom;

            let children = Quadrant::ALL.map(|quadrant| {
                let value = manager.create_child(&self.nodes[node.0].value, quadrant);
                let (lr, tb) = match quadrant {
                    Quadrant::TopLeft => (left_right - delta, top_bottom - delta),
                    Quadrant::TopRight => (left_right + delta, top_bottom - delta),
                    Quadrant::BottomLeft => (left_right - delta, top_bottom + delta),
                    Quadrant::BottomRight => (left_right + delta, top_bottom + delta),
                };

                NodeId(self.nodes.insert(Node {
                    value,
                    parent: Some(node),
                    quadrant,
                    children: None,
                    is_leaf: true,
                    depth: depth + 1,
                    left_right: lr,
                    top_bottom: tb,
                }))
            });

            self.nodes[node.0].children = Some(children);
        }

        self.node_count += 4;
        self.leaf_count += 3;

        for child in self.nodes[node.0].children.unwrap() {
            // collapse stale subtrees kept from a previous division
            self.group(child, manager);
            self.emit(child, NodeEvent::Enabled, manager);
        }

        self.nodes[node.0].is_leaf = false;
        self.emit(node, NodeEvent::Divided, manager);
    }

    /// Recursively disables all descendants and makes the node a leaf again.
    /// The children are kept for a possible re-division.
    pub fn group(&mut self, node: NodeId, manager: &mut impl QuadTreeManager<T>) {
        if self.nodes[node.0].is_leaf {
            return; // already grouped
        }

        for child in self.nodes[node.0].children.unwrap() {
            self.group(child, manager);
            self.emit(child, NodeEvent::Disabled, manager);
        }

        self.nodes[node.0].is_leaf = true;
        self.node_count -= 4;
        self.leaf_count -= 3;
        self.emit(node, NodeEvent::Grouped, manager);
    }

    /// Permanently deletes every child set that hangs below a leaf,
    /// reclaiming subtrees that were grouped and never re-divided.
    pub fn remove_unused_nodes(&mut self, manager: &mut impl QuadTreeManager<T>) {
        self.remove_unused(self.root, manager);
    }

    fn remove_unused(&mut self, node: NodeId, manager: &mut impl QuadTreeManager<T>) {
        let Some(children) = self.nodes[node.0].children else {
            return;
        };

        for child in children {
            self.remove_unused(child, manager);
        }

        if self.nodes[node.0].is_leaf {
            self.nodes[node.0].children = None;

            for child in children {
                let removed = self.nodes.remove(child.0);
                manager.node_deleted(removed.value);
            }
        }
    }

    fn emit(&mut self, node: NodeId, event: NodeEvent, manager: &mut impl QuadTreeManager<T>) {
        manager.node_event(node, &mut self.nodes[node.0].value, event);
    }

    /// Pre-order traversal of the active tree.
    pub fn active_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![self.root];

        std::iter::from_fn(move || {
            let node = stack.pop()?;

            if let Some(children) = self.children(node) {
                stack.extend(children.iter().rev());
            }

            Some(node)
        })
    }

    /// All leaves of the active tree, top left to bottom right.
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.active_nodes().filter(|&node| self.is_leaf(node))
    }

    /// Mutable access to the values of all allocated nodes, including
    /// disabled ones that still await deletion.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.nodes.iter_mut().map(|(_, node)| &mut node.value)
    }

    /// Returns the node adjacent to the given one on the specified side, at a
    /// depth no greater than its own. Returns [`Neighbor::Remote`] when the
    /// neighbor lies in a connected tree and [`Neighbor::None`] beyond an
    /// unconnected border.
    pub fn neighbor(&self, node: NodeId, side: Side) -> Neighbor {
        // the coordinate along the edge, perpendicular to the query direction
        let coord = match side {
            Side::Top | Side::Bottom => self.nodes[node.0].left_right,
            Side::Left | Side::Right => self.nodes[node.0].top_bottom,
        };

        // search the first ancestor crossed when moving towards `side`
        let mut current = node;
        let ancestor = loop {
            let Some(parent) = self.nodes[current.0].parent else {
                // ran off the tree, defer to the connected tree if any
                let Some(connection) = self.connection(side) else {
                    return Neighbor::None;
                };

                return Neighbor::Remote {
                    tree: connection.tree,
                    side: connection.side,
                    coord: if connection.flip { -coord } else { coord },
                };
            };

            if self.nodes[current.0].quadrant.touches(side.opposite()) {
                break parent;
            }

            current = parent;
        };

        // descend into the subtree on the near row, towards the coordinate
        let children = self.nodes[ancestor.0].children.unwrap();
        let (first, second) = match side {
            Side::Left => (children[0], children[2]),
            Side::Right => (children[1], children[3]),
            Side::Top => (children[0], children[1]),
            Side::Bottom => (children[2], children[3]),
        };

        let subtree = self.closer_to(coord, side, first, second);
        Neighbor::Local(self.edge_search(subtree, side.opposite(), coord))
    }

    /// The leaf on the specified edge of the tree that lies closest to the
    /// given coordinate. Used to resolve neighbor queries across trees.
    pub fn edge_at_coord(&self, side: Side, coord: i64) -> NodeId {
        self.edge_search(self.root, side, coord)
    }

    fn edge_search(&self, start: NodeId, side: Side, coord: i64) -> NodeId {
        let mut edge = start;

        while let Some(children) = self.children(edge) {
            let (first, second) = match side {
                Side::Left => (children[0], children[2]),
                Side::Right => (children[1], children[3]),
                Side::Top => (children[0], children[1]),
                Side::Bottom => (children[2], children[3]),
            };

            edge = self.closer_to(coord, side, first, second);
        }

        edge
    }

    fn closer_to(&self, coord: i64, side: Side, first: NodeId, second: NodeId) -> NodeId {
        let axis = |node: NodeId| match side {
            Side::Top | Side::Bottom => self.nodes[node.0].left_right,
            Side::Left | Side::Right => self.nodes[node.0].top_bottom,
        };

        if (coord - axis(first)).abs() < (coord - axis(second)).abs() {
            first
        } else {
            second
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[derive(Default)]
    struct CountingManager {
        created: usize,
        deleted: usize,
        events: Vec<(NodeId, NodeEvent)>,
    }

    impl QuadTreeManager<u32> for CountingManager {
        fn create_child(&mut self, parent: &u32, _quadrant: Quadrant) -> u32 {
            self.created += 1;
            parent + 1
        }

        fn node_event(&mut self, node: NodeId, _value: &mut u32, event: NodeEvent) {
            self.events.push((node, event));
        }

        fn node_deleted(&mut self, _value: u32) {
            self.deleted += 1;
        }
    }

    fn reference_counts(tree: &QuadTree<u32>) -> (usize, usize) {
        let nodes = tree.active_nodes().count();
        let leaves = tree.leaves().count();
        (nodes, leaves)
    }

    #[test]
    fn division_and_grouping_track_counts() {
        let mut manager = CountingManager::default();
        let mut tree = QuadTree::new(0, &mut manager);

        assert_eq!((tree.node_count(), tree.leaf_count()), (1, 1));

        let root = tree.root();
        tree.divide(root, &mut manager);
        assert_eq!((tree.node_count(), tree.leaf_count()), (5, 4));

        let child = tree.child(root, Quadrant::TopLeft).unwrap();
        tree.divide(child, &mut manager);
        assert_eq!((tree.node_count(), tree.leaf_count()), (9, 7));

        tree.group(root, &mut manager);
        assert_eq!((tree.node_count(), tree.leaf_count()), (1, 1));

        assert_eq!(reference_counts(&tree), (1, 1));
    }

    #[test]
    fn counts_stay_consistent_under_random_churn() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut manager = CountingManager::default();
        let mut tree = QuadTree::new(0, &mut manager);

        for _ in 0..500 {
            let nodes: Vec<NodeId> = tree.active_nodes().collect();
            let node = *nodes.choose(&mut rng).unwrap();

            if tree.is_leaf(node) && tree.depth(node) < 6 {
                tree.divide(node, &mut manager);
            } else if !tree.is_leaf(node) && rng.random_bool(0.4) {
                tree.group(node, &mut manager);
            }

            let (nodes, leaves) = reference_counts(&tree);
            assert_eq!(tree.node_count(), nodes);
            assert_eq!(tree.leaf_count(), leaves);

            // every internal node has exactly 4 children
            let internal = nodes - leaves;
            assert_eq!(nodes, 1 + 4 * internal);
        }
    }

    #[test]
    fn grouped_children_are_reused_on_redivision() {
        let mut manager = CountingManager::default();
        let mut tree = QuadTree::new(0, &mut manager);
        let root = tree.root();

        tree.divide(root, &mut manager);
        tree.group(root, &mut manager);
        tree.divide(root, &mut manager);

        assert_eq!(manager.created, 4);
        assert_eq!(manager.deleted, 0);
    }

    #[test]
    fn remove_unused_nodes_deletes_grouped_subtrees() {
        let mut manager = CountingManager::default();
        let mut tree = QuadTree::new(0, &mut manager);
        let root = tree.root();

        tree.divide(root, &mut manager);
        let child = tree.child(root, Quadrant::TopLeft).unwrap();
        tree.divide(child, &mut manager);

        tree.remove_unused_nodes(&mut manager);
        assert_eq!(manager.deleted, 0); // everything still active

        tree.group(root, &mut manager);
        tree.remove_unused_nodes(&mut manager);
        assert_eq!(manager.deleted, 8);
        assert_eq!((tree.node_count(), tree.leaf_count()), (1, 1));
    }

    #[test]
    fn neighbors_within_one_tree_are_symmetric() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut manager = CountingManager::default();
        let mut tree = QuadTree::new(0, &mut manager);

        for _ in 0..60 {
            let leaves: Vec<NodeId> = tree.leaves().collect();
            let leaf = *leaves.choose(&mut rng).unwrap();
            if tree.depth(leaf) < 4 {
                tree.divide(leaf, &mut manager);
            }
        }

        for leaf in tree.leaves() {
            for side in Side::ALL {
                let Neighbor::Local(neighbor) = tree.neighbor(leaf, side) else {
                    continue;
                };

                if tree.is_leaf(neighbor) && tree.depth(neighbor) == tree.depth(leaf) {
                    assert_eq!(
                        tree.neighbor(neighbor, side.opposite()),
                        Neighbor::Local(leaf),
                        "{side:?} neighbor of {leaf:?} is not symmetric"
                    );
                }
            }
        }
    }

    #[test]
    fn border_without_connection_has_no_neighbor() {
        let mut manager = CountingManager::default();
        let mut tree = QuadTree::new(0, &mut manager);
        let root = tree.root();
        tree.divide(root, &mut manager);

        let top_left = tree.child(root, Quadrant::TopLeft).unwrap();
        assert_eq!(tree.neighbor(top_left, Side::Left), Neighbor::None);
        assert_eq!(tree.neighbor(top_left, Side::Top), Neighbor::None);
        assert!(matches!(
            tree.neighbor(top_left, Side::Right),
            Neighbor::Local(_)
        ));
    }

    #[test]
    fn connected_trees_resolve_neighbors_across_the_border() {
        let mut manager = CountingManager::default();
        let mut left_tree = QuadTree::new(0, &mut manager);
        let mut right_tree = QuadTree::new(0, &mut manager);
        let left_entity = Entity::from_raw(1);
        let right_entity = Entity::from_raw(2);

        QuadTree::connect(
            &mut left_tree,
            left_entity,
            Side::Right,
            &mut right_tree,
            right_entity,
            Side::Left,
            false,
        );

        left_tree.divide(left_tree.root(), &mut manager);
        right_tree.divide(right_tree.root(), &mut manager);
        let rtl = right_tree.child(right_tree.root(), Quadrant::TopLeft).unwrap();
        right_tree.divide(rtl, &mut manager);

        // the top right leaf of the left tree looks right into the finer tree
        let query = left_tree.child(left_tree.root(), Quadrant::TopRight).unwrap();
        let Neighbor::Remote { tree, side, coord } = left_tree.neighbor(query, Side::Right) else {
            panic!("expected a remote neighbor");
        };

        assert_eq!(tree, right_entity);
        assert_eq!(side, Side::Left);

        // the query leaf spans both quarter leaves of the finer edge, its
        // center coordinate ties between them and resolves to the lower one
        let resolved = right_tree.edge_at_coord(side, coord);
        let expected = right_tree.child(rtl, Quadrant::BottomLeft).unwrap();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn flipped_connections_mirror_the_edge_coordinate() {
        let mut manager = CountingManager::default();
        let mut left_tree = QuadTree::new(0, &mut manager);
        let mut right_tree = QuadTree::new(0, &mut manager);

        QuadTree::connect(
            &mut left_tree,
            Entity::from_raw(1),
            Side::Right,
            &mut right_tree,
            Entity::from_raw(2),
            Side::Left,
            true,
        );

        left_tree.divide(left_tree.root(), &mut manager);
        right_tree.divide(right_tree.root(), &mut manager);

        // mirrored: the *top* right leaf matches the *bottom* left leaf
        let query = left_tree.child(left_tree.root(), Quadrant::TopRight).unwrap();
        let Neighbor::Remote { side, coord, .. } = left_tree.neighbor(query, Side::Right) else {
            panic!("expected a remote neighbor");
        };

        let resolved = right_tree.edge_at_coord(side, coord);
        let expected = right_tree
            .child(right_tree.root(), Quadrant::BottomLeft)
            .unwrap();
        assert_eq!(resolved, expected);
    }

    #[test]
    #[should_panic(expected = "already connected")]
    fn conflicting_connections_are_rejected() {
        let mut manager = CountingManager::default();
        let mut tree_a = QuadTree::new(0, &mut manager);
        let mut tree_b = QuadTree::new(0, &mut manager);
        let mut tree_c = QuadTree::new(0, &mut manager);

        QuadTree::connect(
            &mut tree_a,
            Entity::from_raw(1),
            Side::Right,
            &mut tree_b,
            Entity::from_raw(2),
            Side::Left,
            false,
        );
        QuadTree::connect(
            &mut tree_a,
            Entity::from_raw(1),
            Side::Right,
            &mut tree_c,
            Entity::from_raw(3),
            Side::Left,
            false,
        );
    }
}
