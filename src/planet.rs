use crate::{
    data_source::TerrainDataSource,
    material::MaterialFactory,
    math::{cube, SheetRect},
    quad_tree::Side,
    terrain::{build_terrain_sheet, SheetCurvatureParams, TerrainSheetParams},
    tile_tree::{TerrainComponents, TileTree},
};
use bevy::{
    math::{DVec2, DVec3},
    prelude::*,
};
use std::sync::Arc;

/// Configuration of a planet built from six curved terrain sheets.
pub struct PlanetParams {
    pub center: DVec3,
    pub radius: f64,
    pub data_source: Arc<dyn TerrainDataSource>,
    pub material_factory: Arc<dyn MaterialFactory>,
}

/// A drawable planet: six terrain sheets over the faces of a cube, bent onto
/// a shared sphere by their curvature.
#[derive(Component)]
pub struct Planet {
    pub center: DVec3,
    pub radius: f64,
    pub sheets: [Entity; 6],
}

/// Spawns the six sheets of a planet and connects their quadtrees, so that
/// neighbor queries and edge stitching work seamlessly across the cube
/// edges. Returns the planet entity.
pub fn spawn_planet(world: &mut World, params: PlanetParams) -> Entity {
    // sheet side length is kept a power of two so tile areas stay exact
    // under repeated halving
    let side_length = floor_power_of_two(2.0 * params.radius / 3.0_f64.sqrt());

    let entities: [Entity; 6] = std::array::from_fn(|_| world.spawn_empty().id());

    let mut sheets = Vec::with_capacity(6);
    let mut trees = Vec::with_capacity(6);

    for face in 0..6 {
        let right = cube::FACE_RIGHT[face];
        let up = cube::FACE_UP[face];
        let normal = cube::FACE_NORMAL[face];

        let area = SheetRect::new(
            params.center + 0.5 * side_length * (normal - right - up),
            right,
            up,
            DVec2::splat(side_length),
        );

        let (sheet, tree) = build_terrain_sheet(TerrainSheetParams {
            area,
            curvature: SheetCurvatureParams::Curved {
                radius: params.radius,
                center: Some(params.center),
            },
            data_source: params.data_source.clone(),
            material_factory: params.material_factory.clone(),
        });

        sheets.push(sheet);
        trees.push(tree);
    }

    // connect adjacent faces; each pair is registered once, the connection
    // itself is symmetric
    for face in 0..6 {
        for side in Side::ALL {
            let (adjacent, adjacent_side, flip) = cube::face_adjacency(face, side);
            if adjacent < face {
                continue;
            }

            let (near, far) = trees.split_at_mut(adjacent);
            TileTree::connect(
                &mut near[face],
                entities[face],
                side,
                &mut far[0],
                entities[adjacent],
                adjacent_side,
                flip,
            );

            sheets[face].adjacent_sheets.push(entities[adjacent]);
            sheets[adjacent].adjacent_sheets.push(entities[face]);
        }
    }

    let mut tile_trees = world.resource_mut::<TerrainComponents<TileTree>>();
    for (&entity, tree) in entities.iter().zip(trees) {
        tile_trees.insert(entity, tree);
    }

    for (&entity, sheet) in entities.iter().zip(sheets) {
        world.entity_mut(entity).insert(sheet);
    }

    world
        .spawn(Planet {
            center: params.center,
            radius: params.radius,
            sheets: entities,
        })
        .id()
}

fn floor_power_of_two(value: f64) -> f64 {
    value.log2().floor().exp2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curvature::SheetCurvature,
        data_source::{TerrainDataSource, TileData},
        material::{TileMaterial, MaterialFactory},
        terrain::TerrainSheet,
        tile_tree::resolve_neighbor,
    };
    use itertools::iproduct;

    struct IdleDataSource;

    impl TerrainDataSource for IdleDataSource {
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

        fn delete_tile_data(&self, _area: &SheetRect) {}
    }

    struct NullMaterial;

    impl TileMaterial for NullMaterial {
        fn has_pending_updates(&self) -> bool {
            false
        }

        fn on_lod_changed(&mut self, _morphing: bool) {}
    }

    struct NullFactory;

    impl MaterialFactory for NullFactory {
        fn create_material(&self, _area: &SheetRect, _data: &TileData) -> Box<dyn TileMaterial> {
            Box::new(NullMaterial)
        }
    }

    fn spawn_test_planet(world: &mut World) -> Planet {
        world.init_resource::<TerrainComponents<TileTree>>();

        let planet = spawn_planet(
            world,
            PlanetParams {
                center: DVec3::new(100.0, -50.0, 2000.0),
                radius: 1000.0,
                data_source: Arc::new(IdleDataSource),
                material_factory: Arc::new(NullFactory),
            },
        );

        let planet = world.entity(planet).get::<Planet>().unwrap();
        Planet {
            center: planet.center,
            radius: planet.radius,
            sheets: planet.sheets,
        }
    }

    #[test]
    fn all_faces_are_connected_and_adjacent() {
        let mut world = World::new();
        let planet = spawn_test_planet(&mut world);

        for &entity in &planet.sheets {
            let sheet = world.entity(entity).get::<TerrainSheet>().unwrap();
            assert_eq!(sheet.adjacent_sheets().len(), 4);
        }

        let tile_trees = world.resource::<TerrainComponents<TileTree>>();
        for (&entity, side) in iproduct!(&planet.sheets, Side::ALL) {
            let root = tile_trees[&entity].tree().root();
            let (neighbor_entity, neighbor) =
                resolve_neighbor(tile_trees, entity, root, side).expect("face is connected");

            assert_ne!(neighbor_entity, entity);
            assert!(planet.sheets.contains(&neighbor_entity));
            assert_eq!(tile_trees[&neighbor_entity].tree().root(), neighbor);
        }
    }

    #[test]
    fn connected_borders_coincide_geometrically() {
        let mut world = World::new();
        let planet = spawn_test_planet(&mut world);

        let areas: Vec<SheetRect> = planet
            .sheets
            .iter()
            .map(|&entity| {
                *world
                    .entity(entity)
                    .get::<TerrainSheet>()
                    .unwrap()
                    .area()
            })
            .collect();

        // edge midpoints per side, in the order returned by edge_midpoints
        let midpoint = |face: usize, side: Side| {
            let midpoints = areas[face].edge_midpoints();
            match side {
                Side::Top => midpoints[0],
                Side::Left => midpoints[1],
                Side::Right => midpoints[2],
                Side::Bottom => midpoints[3],
            }
        };

        for (face, side) in iproduct!(0..6, Side::ALL) {
            let (adjacent, adjacent_side, _) = cube::face_adjacency(face, side);

            assert!(
                midpoint(face, side)
                    .distance(midpoint(adjacent, adjacent_side))
                    < 1e-6,
                "face {face} {side:?} does not meet face {adjacent} {adjacent_side:?}"
            );
        }
    }

    #[test]
    fn sheet_side_length_is_a_power_of_two() {
        assert_eq!(floor_power_of_two(1154.7), 1024.0);
        assert_eq!(floor_power_of_two(1024.0), 1024.0);
        assert_eq!(floor_power_of_two(100.0), 64.0);
    }
}
