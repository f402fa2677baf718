use crate::{
    curvature::SheetCurvature,
    math::SheetRect,
    quad_tree::NodeId,
    tasks::{TaskHandle, TaskScheduler, TaskState},
    tile::compute_occlusion,
    tile_tree::TileTree,
};
use bevy::math::DVec3;
use std::sync::{Arc, Mutex};

struct VisibilityInput {
    node: NodeId,
    area: SheetRect,
    min_height: f32,
    max_height: f32,
    was_occluded: bool,
}

#[derive(Default)]
struct VisibilityScratch {
    view_position: DVec3,
    inputs: Vec<VisibilityInput>,
    /// Occlusion results for tiles whose state flipped.
    changed: Vec<(NodeId, bool)>,
}

/// The time sliced occlusion pass of one terrain sheet.
///
/// Every invocation harvests the previous slice (if its background task
/// completed) and snapshots the next `leaf_count / slices + 1` leaves behind
/// a round robin cursor, so very large quadtrees never recompute all of
/// their occlusion in a single frame. Results are buffered and only applied
/// once the task for the slice reports complete.
pub(crate) struct TileVisibilityTask {
    task: Box<dyn TaskHandle>,
    scratch: Arc<Mutex<VisibilityScratch>>,
    cursor: usize,
}

impl TileVisibilityTask {
    pub fn new(tasks: &dyn TaskScheduler, curvature: Arc<SheetCurvature>) -> Self {
        let scratch = Arc::new(Mutex::new(VisibilityScratch::default()));
        let task_scratch = scratch.clone();

        let task = tasks.create_task(
            "terrain_tiles_visibility",
            Box::new(move || {
                let mut scratch = task_scratch.lock().unwrap();
                let scratch = &mut *scratch;

                let curvature_at_view = curvature.sample_at_world_pos(scratch.view_position);

                scratch.changed.clear();
                for input in &scratch.inputs {
                    let occluded = compute_occlusion(
                        &input.area,
                        input.min_height,
                        input.max_height,
                        &curvature,
                        scratch.view_position,
                        &curvature_at_view,
                    );

                    if occluded != input.was_occluded {
                        scratch.changed.push((input.node, occluded));
                    }
                }
            }),
        );

        Self {
            task,
            scratch,
            cursor: 0,
        }
    }

    pub fn update(&mut self, tile_tree: &mut TileTree, view_position: DVec3, slices: u32) {
        if self.task.state() == TaskState::Completed {
            let mut scratch = self.scratch.lock().unwrap();

            for (node, occluded) in scratch.changed.drain(..) {
                // the tree may have pruned the node since the snapshot
                if !tile_tree.tree().contains(node) {
                    continue;
                }

                let tile = tile_tree.tile_mut(node);
                tile.set_occluded(occluded);
                tile.update_visibility();
            }

            scratch.inputs.clear();
            drop(scratch);
            self.task.reset();
        }

        if self.task.state() == TaskState::Idle {
            let mut scratch = self.scratch.lock().unwrap();
            scratch.view_position = view_position;

            let leaf_count = tile_tree.tree().leaf_count();
            let slice_len = leaf_count / slices.max(1) as usize + 1;
            let slice_end = self.cursor + slice_len;

            for (index, leaf) in tile_tree.tree().leaves().enumerate() {
                if index < self.cursor {
                    continue;
                }
                if index >= slice_end {
                    break;
                }

                let tile = tile_tree.tile(leaf);
                scratch.inputs.push(VisibilityInput {
                    node: leaf,
                    area: *tile.area(),
                    min_height: tile.min_displacement_height(),
                    max_height: tile.max_displacement_height(),
                    was_occluded: tile.is_occluded(),
                });
            }

            self.cursor = if slice_end >= leaf_count { 0 } else { slice_end };

            drop(scratch);
            self.task.queue_execution();
        }
    }
}
