use crate::quad_tree::Quadrant;
use bevy::math::{DVec2, DVec3};

/// An oriented rectangle in 3d space, spanned by two unit axes.
///
/// Every terrain sheet and every tile covers one such rectangle, placed on the
/// plane of minimum terrain height. `position` is the top left corner, the
/// x axis runs left to right and the y axis top to bottom, so the surface
/// normal is `x_axis × y_axis`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SheetRect {
    pub position: DVec3,
    pub x_axis: DVec3,
    pub y_axis: DVec3,
    pub size: DVec2,
}

impl SheetRect {
    pub fn new(position: DVec3, x_axis: DVec3, y_axis: DVec3, size: DVec2) -> Self {
        Self {
            position,
            x_axis,
            y_axis,
            size,
        }
    }

    pub fn normal(&self) -> DVec3 {
        self.x_axis.cross(self.y_axis)
    }

    pub fn center(&self) -> DVec3 {
        self.position_at(DVec2::splat(0.5))
    }

    pub fn area(&self) -> f64 {
        self.size.x * self.size.y
    }

    /// World position of the given uv coordinates (0,0 = top left, 1,1 = bottom right).
    pub fn position_at(&self, uv: DVec2) -> DVec3 {
        self.position + self.x_axis * (uv.x * self.size.x) + self.y_axis * (uv.y * self.size.y)
    }

    /// The uv coordinates of a world position projected onto the rectangle plane.
    pub fn coords_at(&self, position: DVec3) -> DVec2 {
        let offset = position - self.position;

        DVec2::new(
            offset.dot(self.x_axis) / self.size.x,
            offset.dot(self.y_axis) / self.size.y,
        )
    }

    /// The quarter of this rectangle covered by the child of the given quadrant.
    pub fn quadrant(&self, quadrant: Quadrant) -> Self {
        let size = self.size * 0.5;
        let offset = match quadrant {
            Quadrant::TopLeft => DVec2::ZERO,
            Quadrant::TopRight => DVec2::new(1.0, 0.0),
            Quadrant::BottomLeft => DVec2::new(0.0, 1.0),
            Quadrant::BottomRight => DVec2::ONE,
        };

        Self {
            position: self.position
                + self.x_axis * (offset.x * size.x)
                + self.y_axis * (offset.y * size.y),
            x_axis: self.x_axis,
            y_axis: self.y_axis,
            size,
        }
    }

    pub fn corners(&self) -> [DVec3; 4] {
        [
            self.position_at(DVec2::new(0.0, 0.0)),
            self.position_at(DVec2::new(1.0, 0.0)),
            self.position_at(DVec2::new(0.0, 1.0)),
            self.position_at(DVec2::new(1.0, 1.0)),
        ]
    }

    pub fn edge_midpoints(&self) -> [DVec3; 4] {
        [
            self.position_at(DVec2::new(0.5, 0.0)),
            self.position_at(DVec2::new(0.0, 0.5)),
            self.position_at(DVec2::new(1.0, 0.5)),
            self.position_at(DVec2::new(0.5, 1.0)),
        ]
    }

    /// The point on the rectangle closest to an arbitrary world position.
    pub fn closest_point(&self, position: DVec3) -> DVec3 {
        let uv = self
            .coords_at(position)
            .clamp(DVec2::ZERO, DVec2::ONE);

        self.position_at(uv)
    }

    /// Intersects the line through `origin` along `direction` with the
    /// rectangle plane. Falls back to the projected origin if the line runs
    /// parallel to the plane.
    pub fn ray_plane_intersection(&self, origin: DVec3, direction: DVec3) -> DVec3 {
        let normal = self.normal();
        let denominator = direction.dot(normal);

        if denominator.abs() < 1e-12 {
            let offset = origin - self.position;
            return origin - normal * offset.dot(normal);
        }

        let t = (self.position - origin).dot(normal) / denominator;
        origin + direction * t
    }
}
