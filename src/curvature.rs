use crate::math::SheetRect;
use bevy::math::{DVec2, DVec3};
use ndarray::Array2;
use std::f64::consts::SQRT_2;

/// Lookup table resolution used for curved sheets. Flat sheets get a minimal
/// grid since their samples are constant anyway.
pub const CURVATURE_RESOLUTION: usize = 129;
const FLAT_RESOLUTION: usize = 3;

/// Curvature information at one point of a sheet: the curved surface normal
/// and the offset from the flat sheet plane to the curved world position.
#[derive(Clone, Copy, Debug)]
pub struct CurvatureSample {
    pub normal: DVec3,
    pub world_offset: DVec3,
}

/// Maps flat sheet positions onto a curved surface.
///
/// Samples are precomputed on a small grid over the sheet area and
/// interpolated bilinearly, which keeps per tile curvature queries cheap at
/// planetary scale. The degenerate flat model returns the sheet plane normal
/// and a zero offset exactly, without touching the table.
pub struct SheetCurvature {
    area: SheetRect,
    lut: Array2<CurvatureSample>,
    center: DVec3,
    radius: f64,
    is_flat: bool,
}

impl SheetCurvature {
    pub fn flat(area: SheetRect) -> Self {
        // the center still serves as a reference point for data sources
        Self::build(area, true, 0.0, area.center(), FLAT_RESOLUTION)
    }

    /// A sheet curved onto a sphere of the given radius.
    ///
    /// The radius is clamped up to the sheet's half diagonal, the smallest
    /// sphere the sheet can wrap onto without degenerating; anything smaller
    /// would produce NaN geometry later. Without an explicit center the
    /// sphere is placed so that it touches all four sheet corners.
    pub fn curved(area: SheetRect, radius: f64, explicit_center: Option<DVec3>) -> Self {
        let half_diagonal = area.size.max_element() * SQRT_2 * 0.5;
        let radius = radius.max(half_diagonal * 1.001);

        let center = explicit_center.unwrap_or_else(|| {
            area.center()
                - area.normal() * (radius * radius - half_diagonal * half_diagonal).sqrt()
        });

        Self::build(area, false, radius, center, CURVATURE_RESOLUTION)
    }

    fn build(area: SheetRect, is_flat: bool, radius: f64, center: DVec3, resolution: usize) -> Self {
        let texel_size = 1.0 / (resolution - 1) as f64;

        let lut = Array2::from_shape_fn((resolution, resolution), |(row, col)| {
            let uv = DVec2::new(col as f64, row as f64) * texel_size;
            Self::sample_precise(area, is_flat, radius, center, area.position_at(uv))
        });

        Self {
            area,
            lut,
            center,
            radius,
            is_flat,
        }
    }

    fn sample_precise(
        area: SheetRect,
        is_flat: bool,
        radius: f64,
        center: DVec3,
        world_position: DVec3,
    ) -> CurvatureSample {
        if is_flat {
            return CurvatureSample {
                normal: area.normal(),
                world_offset: DVec3::ZERO,
            };
        }

        let normal = (world_position - center).normalize();

        CurvatureSample {
            normal,
            world_offset: center + normal * radius - world_position,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.is_flat
    }

    pub fn area(&self) -> &SheetRect {
        &self.area
    }

    pub fn center(&self) -> DVec3 {
        self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Curvature at a position on the sheet plane. Positions outside the
    /// sheet are clamped to its border.
    pub fn sample_at_sheet_pos(&self, position: DVec3) -> CurvatureSample {
        if self.is_flat {
            // exact by construction, flat terrain has no curvature error budget
            return CurvatureSample {
                normal: self.area.normal(),
                world_offset: DVec3::ZERO,
            };
        }

        let uv = self
            .area
            .coords_at(position)
            .clamp(DVec2::ZERO, DVec2::ONE);

        let mut sample = self.sample_bilinear(uv);
        sample.normal = sample.normal.normalize();
        sample
    }

    /// Curvature at an arbitrary world position, e.g. the camera.
    ///
    /// The position is first brought onto the sheet plane: along the
    /// estimated curvature normal if it lies on the near side, or via the
    /// closest sheet point if it sits behind the curvature center where a
    /// projection is meaningless.
    pub fn sample_at_world_pos(&self, position: DVec3) -> CurvatureSample {
        if self.is_flat {
            return self.sample_at_sheet_pos(position);
        }

        let direction = (position - self.center).normalize();

        let on_sheet = if direction.dot(self.area.normal()) > 0.1 {
            self.area.ray_plane_intersection(position, direction)
        } else {
            self.area.closest_point(position)
        };

        self.sample_at_sheet_pos(on_sheet)
    }

    fn sample_bilinear(&self, uv: DVec2) -> CurvatureSample {
        let last = (self.lut.nrows() - 1) as f64;
        let scaled = uv * last;

        let col = (scaled.x as usize).min(self.lut.ncols() - 2);
        let row = (scaled.y as usize).min(self.lut.nrows() - 2);
        let fraction = scaled - DVec2::new(col as f64, row as f64);

        let lerp = |a: CurvatureSample, b: CurvatureSample, amount: f64| CurvatureSample {
            normal: a.normal.lerp(b.normal, amount),
            world_offset: a.world_offset.lerp(b.world_offset, amount),
        };

        let top = lerp(self.lut[(row, col)], self.lut[(row, col + 1)], fraction.x);
        let bottom = lerp(
            self.lut[(row + 1, col)],
            self.lut[(row + 1, col + 1)],
            fraction.x,
        );

        lerp(top, bottom, fraction.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::iproduct;

    fn sheet(size: f64) -> SheetRect {
        SheetRect::new(
            DVec3::new(-size * 0.5, 0.0, -size * 0.5),
            DVec3::X,
            DVec3::Z,
            DVec2::splat(size),
        )
    }

    #[test]
    fn flat_curvature_is_exact() {
        let curvature = SheetCurvature::flat(sheet(1024.0));

        for (x, z) in iproduct!([-512.0, -17.3, 0.0, 511.0], [-512.0, 3.7, 512.0]) {
            let sample = curvature.sample_at_sheet_pos(DVec3::new(x, 0.0, z));
            assert_eq!(sample.normal, DVec3::NEG_Y);
            assert_eq!(sample.world_offset, DVec3::ZERO);
        }
    }

    #[test]
    fn curved_samples_lie_on_the_sphere() {
        let radius = 6_000_000.0;
        let area = sheet(2.0 * radius / 3.0_f64.sqrt());
        let center = area.center() + area.normal() * -radius;
        let curvature = SheetCurvature::curved(area, radius, Some(center));

        // table aligned samples interpolate exactly, arbitrary ones within
        // the bilinear chord error of the 129 sample grid
        for (uv, tolerance) in [
            (DVec2::new(0.5, 0.25), 1e-6 * radius),
            (DVec2::new(64.0 / 128.0, 32.0 / 128.0), 1e-9 * radius),
            (DVec2::new(0.123, 0.876), 1e-3 * radius),
            (DVec2::new(1.0, 1.0), 1e-9 * radius),
        ] {
            let position = area.position_at(uv);
            let sample = curvature.sample_at_sheet_pos(position);
            let distance = (position + sample.world_offset - center).length();

            assert!(
                (distance - radius).abs() < tolerance,
                "uv {uv:?}: distance {distance} vs radius {radius}"
            );
        }
    }

    #[test]
    fn world_samples_project_back_onto_the_sheet() {
        let radius = 1000.0;
        let area = sheet(800.0);
        let curvature = SheetCurvature::curved(area, radius, None);

        let position = area.position_at(DVec2::new(0.4, 0.6));
        let on_sheet = curvature.sample_at_sheet_pos(position);

        // a camera hovering above the curved surface resolves to (nearly) the
        // same sample; the small drift stems from the bilinear table lookup
        let camera = position + on_sheet.world_offset + on_sheet.normal * 250.0;
        let from_world = curvature.sample_at_world_pos(camera);

        assert!((from_world.world_offset - on_sheet.world_offset).length() < 0.1);
        assert!(from_world.normal.dot(on_sheet.normal) > 1.0 - 1e-6);
    }

    #[test]
    fn degenerate_radius_is_clamped() {
        let area = sheet(1000.0);
        let curvature = SheetCurvature::curved(area, 1.0, None);

        assert!(curvature.radius() > 500.0);

        let sample = curvature.sample_at_sheet_pos(area.position_at(DVec2::new(0.9, 0.1)));
        assert!(sample.normal.is_finite());
        assert!(sample.world_offset.is_finite());
    }
}
