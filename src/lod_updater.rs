use crate::{
    lod_strategy::LodStrategy,
    settings::TerrainSettings,
    tasks::TerrainTasks,
    terrain::TerrainSheet,
    tile_tree::{TerrainComponents, TileTree},
    viewer::{TerrainViewer, ViewerInfo},
};
use bevy::prelude::*;

/// Coordinates LOD rebuilds across all terrain sheets in the scene.
///
/// Exactly one sheet rebuilds at a time, chosen by the largest discrepancy
/// between current and required tessellation among the sheets the strategy
/// marks as due. Sheets without any LOD yet are exempt from the round robin:
/// they all build in parallel until each has its first LOD, so multi sheet
/// startup (e.g. the six faces of a planet) converges together.
///
/// A sheet that becomes ineligible mid build still finishes; eligibility is
/// only consulted when picking the next sheet.
#[derive(Resource)]
pub struct TerrainLodUpdater {
    pub strategy: Box<dyn LodStrategy>,
    /// While set, no new rebuild is started. In-flight builds still finish.
    pub freeze_lod: bool,
    settings: TerrainSettings,
    current_sheet: Option<Entity>,
    /// Time at which the last LOD switch took place.
    last_lod_switch: Option<f64>,
}

impl TerrainLodUpdater {
    pub fn new(strategy: Box<dyn LodStrategy>, settings: TerrainSettings) -> Self {
        Self {
            strategy,
            freeze_lod: false,
            settings,
            current_sheet: None,
            last_lod_switch: None,
        }
    }

    pub fn settings(&self) -> &TerrainSettings {
        &self.settings
    }

    /// The sheet currently rebuilding under the round robin, if any.
    pub fn current_sheet(&self) -> Option<Entity> {
        self.current_sheet
    }

    /// Bounds LOD churn: once a sheet is displayed, its next switch has to
    /// wait out the data source's minimum switch time.
    fn lod_switch_time_elapsed(&self, sheet: &TerrainSheet, now: f64) -> bool {
        match self.last_lod_switch {
            None => true,
            Some(last) => {
                !sheet.has_any_lod()
                    || now - last > f64::from(sheet.min_lod_switch_time_secs())
            }
        }
    }
}

/// Runs one scheduler cycle: advances fresh sheets in parallel, commits the
/// active sheet's rebuild once it is ready, resynchronizes the borders of its
/// neighbors, picks the next sheet to rebuild and drives the visibility
/// tasks.
pub fn update_terrain_lod(
    updater: Option<ResMut<TerrainLodUpdater>>,
    mut tile_trees: ResMut<TerrainComponents<TileTree>>,
    mut sheets: Query<(Entity, &mut TerrainSheet)>,
    viewers: Query<(&GlobalTransform, &TerrainViewer)>,
    tasks: Res<TerrainTasks>,
    time: Res<Time>,
) {
    let Some(mut updater) = updater else {
        return;
    };
    let updater = &mut *updater;

    let Some((view_transform, viewer)) = viewers.iter().next() else {
        return;
    };
    let view = ViewerInfo {
        position: view_transform.translation().as_dvec3(),
        volume: viewer.volume.clone(),
    };
    updater.strategy.update_view(&view);

    let entities: Vec<Entity> = sheets.iter().map(|(entity, _)| entity).collect();

    // sheets with no LOD yet build in parallel, ahead of the round robin,
    // with the division budget waived for their exhaustive first build
    let mut new_sheet_loading = false;
    for &entity in &entities {
        let (_, mut sheet) = sheets.get_mut(entity).unwrap();
        if sheet.has_any_lod() {
            continue;
        }

        new_sheet_loading = true;
        if !sheet.is_building_new_lod() {
            sheet.begin_updating_lod(
                entity,
                &mut tile_trees,
                &view,
                &*updater.strategy,
                updater.settings.lod_up_delay,
            );
        } else if sheet.is_new_lod_ready(&tile_trees[&entity]) {
            sheet.apply_new_lod(entity, &mut tile_trees);
        }
    }

    if !new_sheet_loading {
        // commit the active sheet once its candidate LOD is ready
        if let Some(entity) = updater.current_sheet {
            let mut applied_neighbors = None;

            {
                let (_, mut sheet) = sheets.get_mut(entity).unwrap();
                if sheet.is_new_lod_ready(&tile_trees[&entity])
                    && updater.lod_switch_time_elapsed(&sheet, time.elapsed_secs_f64())
                {
                    if !sheet.is_lod_incomplete() && sheet.has_any_lod() {
                        updater.strategy.signal_update_completion(entity, &view);
                    }

                    sheet.apply_new_lod(entity, &mut tile_trees);
                    applied_neighbors = Some(sheet.adjacent_sheets().to_vec());
                }
            }

            if let Some(neighbors) = applied_neighbors {
                // adjacent sheets re-stitch their borders; neighbors of
                // neighbors catch up on their own subsequent cycles
                for neighbor in neighbors {
                    let (_, mut neighbor_sheet) = sheets.get_mut(neighbor).unwrap();
                    neighbor_sheet.update_edge_tessellation(neighbor, &mut tile_trees);
                }

                updater.last_lod_switch = Some(time.elapsed_secs_f64());
                updater.current_sheet = None;
            }
        }

        // round robin: pick the sheet with the largest tessellation discrepancy
        if !updater.freeze_lod && updater.current_sheet.is_none() {
            updater.current_sheet = select_next_sheet(updater, &tile_trees, &sheets, &entities, &view);

            if let Some(entity) = updater.current_sheet {
                let (_, mut sheet) = sheets.get_mut(entity).unwrap();
                sheet.begin_updating_lod(
                    entity,
                    &mut tile_trees,
                    &view,
                    &*updater.strategy,
                    updater.settings.lod_up_delay,
                );
            }
        }
    }

    // tile visibility; the sheets time slice the work internally
    for &entity in &entities {
        let (_, mut sheet) = sheets.get_mut(entity).unwrap();
        if sheet.has_any_lod() {
            sheet.update_tiles_visibility(
                tile_trees.get_mut(&entity).unwrap(),
                &view,
                &*tasks.0,
                updater.settings.visibility_slices,
            );
        }
    }
}

fn select_next_sheet(
    updater: &mut TerrainLodUpdater,
    tile_trees: &TerrainComponents<TileTree>,
    sheets: &Query<(Entity, &mut TerrainSheet)>,
    entities: &[Entity],
    view: &ViewerInfo,
) -> Option<Entity> {
    let mut selected = None;
    let mut max_discrepancy = 1.0_f32;

    for &entity in entities {
        if !updater.strategy.needs_to_be_updated(entity, view) {
            continue;
        }

        let (_, sheet) = sheets.get(entity).unwrap();
        let (from, to) = sheet.tessellation_ratio_range(&tile_trees[&entity], &*updater.strategy);

        let discrepancy = f32::max(
            if from < 1.0 { 1.0 / from } else { from },
            if to < 1.0 { 1.0 / to } else { to },
        );

        if discrepancy > max_discrepancy {
            max_discrepancy = discrepancy;
            selected = Some(entity);
        }
    }

    selected
}
