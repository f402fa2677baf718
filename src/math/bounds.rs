use bevy::math::DVec3;

/// A double precision axis aligned bounding box.
///
/// Terrain bounds are computed in world space, where planetary curvature
/// offsets exceed f32 precision by orders of magnitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DAabb3 {
    pub min: DVec3,
    pub max: DVec3,
}

impl DAabb3 {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// The smallest box containing all of the supplied points.
    pub fn bounding(points: impl IntoIterator<Item = DVec3>) -> Self {
        let mut points = points.into_iter();
        let first = points.next().expect("can not bound zero points");

        points.fold(Self::new(first, first), |bounds, point| {
            bounds.including(point)
        })
    }

    pub fn including(self, point: DVec3) -> Self {
        Self {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> DVec3 {
        (self.max - self.min) * 0.5
    }

    /// Grows the box symmetrically around its center.
    pub fn scaled_about_center(self, factor: f64) -> Self {
        let center = self.center();
        let half_extents = self.half_extents() * factor;

        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Distance from the point to the closest surface of the box, zero if inside.
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        let closest = point.clamp(self.min, self.max);
        closest.distance(point)
    }

    pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
        self.distance_to_point(center) < radius
    }
}
