use crate::quad_tree::Side;
use bevy::math::DVec3;

/// Per face right vectors of the terrain cube, indexed +X, -X, +Y, -Y, +Z, -Z.
pub const FACE_RIGHT: [DVec3; 6] = [
    DVec3::new(0.0, 0.0, -1.0),
    DVec3::new(0.0, 0.0, 1.0),
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(-1.0, 0.0, 0.0),
];

/// Per face up vectors of the terrain cube.
pub const FACE_UP: [DVec3; 6] = [
    DVec3::new(0.0, 1.0, 0.0),
    DVec3::new(0.0, 1.0, 0.0),
    DVec3::new(0.0, 0.0, -1.0),
    DVec3::new(0.0, 0.0, 1.0),
    DVec3::new(0.0, 1.0, 0.0),
    DVec3::new(0.0, 1.0, 0.0),
];

/// Per face outward normals of the terrain cube.
pub const FACE_NORMAL: [DVec3; 6] = [
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(-1.0, 0.0, 0.0),
    DVec3::new(0.0, 1.0, 0.0),
    DVec3::new(0.0, -1.0, 0.0),
    DVec3::new(0.0, 0.0, 1.0),
    DVec3::new(0.0, 0.0, -1.0),
];

/// The neighboring face across one side of a cube face, together with the
/// side of the neighbor that touches it and whether the edge coordinates run
/// in opposite directions.
///
/// A sheet's quadtree sides map onto its area as left = -x axis,
/// right = +x axis, top = -y axis and bottom = +y axis.
pub fn face_adjacency(face: usize, side: Side) -> (usize, Side, bool) {
    let towards = match side {
        Side::Top => -FACE_UP[face],
        Side::Bottom => FACE_UP[face],
        Side::Left => -FACE_RIGHT[face],
        Side::Right => FACE_RIGHT[face],
    };

    let adjacent = FACE_NORMAL
        .iter()
        .position(|&normal| normal == towards)
        .expect("cube face axes are closed under adjacency");

    // the direction along the shared edge, seen from this face
    let edge_direction = match side {
        Side::Top | Side::Bottom => FACE_RIGHT[face],
        Side::Left | Side::Right => FACE_UP[face],
    };

    let adjacent_side = if FACE_UP[adjacent] == FACE_NORMAL[face] {
        Side::Bottom
    } else if -FACE_UP[adjacent] == FACE_NORMAL[face] {
        Side::Top
    } else if FACE_RIGHT[adjacent] == FACE_NORMAL[face] {
        Side::Right
    } else {
        Side::Left
    };

    let adjacent_edge_direction = match adjacent_side {
        Side::Top | Side::Bottom => FACE_RIGHT[adjacent],
        Side::Left | Side::Right => FACE_UP[adjacent],
    };

    (adjacent, adjacent_side, adjacent_edge_direction != edge_direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::iproduct;

    #[test]
    fn face_axes_are_orthonormal() {
        for face in 0..6 {
            assert_eq!(FACE_RIGHT[face].cross(FACE_UP[face]), FACE_NORMAL[face]);
            assert_eq!(FACE_RIGHT[face].length(), 1.0);
            assert_eq!(FACE_UP[face].length(), 1.0);
        }
    }

    #[test]
    fn adjacency_is_symmetric() {
        for (face, side) in iproduct!(0..6, Side::ALL) {
            let (adjacent, adjacent_side, flipped) = face_adjacency(face, side);

            assert_ne!(adjacent, face);

            let (back, back_side, back_flipped) = face_adjacency(adjacent, adjacent_side);
            assert_eq!(back, face);
            assert_eq!(back_side, side);
            assert_eq!(back_flipped, flipped);
        }
    }

    #[test]
    fn every_face_touches_four_distinct_faces() {
        for face in 0..6 {
            let mut neighbors: Vec<usize> = Side::ALL
                .iter()
                .map(|&side| face_adjacency(face, side).0)
                .collect();
            neighbors.sort_unstable();
            neighbors.dedup();

            assert_eq!(neighbors.len(), 4);
        }
    }
}
