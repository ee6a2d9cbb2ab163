// resample.rs — CPU reference resample filter.
//
// This is the authoritative implementation: the GPU orchestrator in
// gpu/resample.rs is validated against it, so the two must perform the
// same arithmetic in the same precision. Per output voxel:
//
//   buffer index → output physical point → transform → source physical
//   space → source continuous index → inside check → interpolate
//   (or default value)
//
// Both geometry mappings are applied as the same packed 3×4 row
// matrices the device kernel consumes, rather than going through
// nalgebra per voxel — one less place for the two paths to diverge.
//
// The voxel loop parallelizes over output z-slices with rayon; slices
// write disjoint chunks of the output buffer, mirroring the device's
// one-writer-per-voxel model.

use crate::bspline::decompose_in_place;
use crate::geometry::ImageGeometry;
use crate::image::{Image3, Pixel};
use crate::interpolation::{
    is_inside, sample_bspline, sample_linear, sample_nearest, InterpolatorKind,
};
use crate::transform::Transform;
use nalgebra::Vector3;
use rayon::prelude::*;

/// CPU resample filter: configure once, `update()` per run.
#[derive(Debug, Clone)]
pub struct ResampleFilter {
    pub output_geometry: ImageGeometry,
    /// Value written for output voxels that map outside the source.
    pub default_value: f32,
    pub transform: Transform,
    pub interpolator: InterpolatorKind,
}

#[inline]
fn apply_rows(rows: &[[f32; 4]; 3], v: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(
        rows[0][0] * v.x + rows[0][1] * v.y + rows[0][2] * v.z + rows[0][3],
        rows[1][0] * v.x + rows[1][1] * v.y + rows[1][2] * v.z + rows[1][3],
        rows[2][0] * v.x + rows[2][1] * v.y + rows[2][2] * v.z + rows[2][3],
    )
}

impl ResampleFilter {
    pub fn new(
        output_geometry: ImageGeometry,
        default_value: f32,
        transform: Transform,
        interpolator: InterpolatorKind,
    ) -> Self {
        ResampleFilter {
            output_geometry,
            default_value,
            transform,
            interpolator,
        }
    }

    /// Resample `input` onto the configured output geometry.
    ///
    /// The B-spline coefficient decomposition runs on every call — the
    /// filter holds no cached state, so a caller that mutates the input
    /// between runs always gets fresh coefficients.
    pub fn update<T: Pixel>(&self, input: &Image3<T>) -> Image3<T> {
        let out_geom = self.output_geometry.clone();
        let [ow, oh, _] = out_geom.size;
        let in_size = input.size();

        let idx_to_phys = out_geom.index_to_physical_rows();
        let phys_to_ci = input.geometry().physical_to_index_rows();

        // Coefficient volume for the B-spline sampler only.
        let coefficients = match self.interpolator {
            InterpolatorKind::BSpline => {
                let mut c = input.samples_to_f32();
                decompose_in_place(&mut c, in_size);
                Some(c)
            }
            _ => None,
        };

        let mut output = Image3::<T>::new(out_geom);
        let slice_len = ow as usize * oh as usize;

        output
            .as_mut_slice()
            .par_chunks_mut(slice_len)
            .enumerate()
            .for_each(|(z, slice)| {
                let z = z as u32;
                for y in 0..oh {
                    for x in 0..ow {
                        let idx = Vector3::new(x as f32, y as f32, z as f32);
                        let p = apply_rows(&idx_to_phys, idx);
                        let q = self.transform.map_point(p);
                        let ci = apply_rows(&phys_to_ci, q);

                        let value = if is_inside(ci, in_size) {
                            match self.interpolator {
                                InterpolatorKind::NearestNeighbor => sample_nearest(input, ci),
                                InterpolatorKind::Linear => sample_linear(input, ci),
                                InterpolatorKind::BSpline => sample_bspline(
                                    coefficients.as_ref().expect("coefficients prepared"),
                                    in_size,
                                    ci,
                                ),
                            }
                        } else {
                            self.default_value
                        };

                        slice[x as usize + ow as usize * y as usize] = T::from_f32(value);
                    }
                }
            });

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::AffineTransform;
    use nalgebra::Matrix3;

    fn unit_geometry(size: [u32; 3]) -> ImageGeometry {
        ImageGeometry::new(size, Vector3::new(1.0, 1.0, 1.0), Vector3::zeros())
    }

    fn checker_volume(size: [u32; 3]) -> Image3<i16> {
        let mut img = Image3::new(unit_geometry(size));
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    let v = ((x + y + z) % 2) as i16 * 100 + (x as i16);
                    img.set(x, y, z, v);
                }
            }
        }
        img
    }

    fn identity_filter(size: [u32; 3], interpolator: InterpolatorKind) -> ResampleFilter {
        ResampleFilter::new(
            unit_geometry(size),
            -1.0,
            Transform::Affine(AffineTransform::identity()),
            interpolator,
        )
    }

    #[test]
    fn test_identity_nearest_reproduces_source() {
        let input = checker_volume([8, 6, 5]);
        let filter = identity_filter([8, 6, 5], InterpolatorKind::NearestNeighbor);
        let output = filter.update(&input);
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn test_identity_linear_reproduces_source() {
        // At integer positions trilinear weights collapse to one sample.
        let input = checker_volume([6, 6, 6]);
        let filter = identity_filter([6, 6, 6], InterpolatorKind::Linear);
        let output = filter.update(&input);
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn test_outside_gets_default_value() {
        // Translate far off the volume: every voxel maps outside.
        let input = checker_volume([6, 6, 6]);
        let transform = Transform::Affine(AffineTransform {
            matrix: Matrix3::identity(),
            translation: Vector3::new(1000.0, 0.0, 0.0),
        });
        let filter = ResampleFilter::new(
            unit_geometry([6, 6, 6]),
            -1.0,
            transform,
            InterpolatorKind::Linear,
        );
        let output = filter.update(&input);
        assert!(output.as_slice().iter().all(|&v| v == -1));
    }

    #[test]
    fn test_default_value_respected_per_transform_kind() {
        use crate::transform::BSplineTransform;
        // A free-form transform over a domain that does not reach the
        // source still yields the default everywhere outside.
        let input = checker_volume([4, 4, 4]);
        let out_geom = ImageGeometry::new(
            [4, 4, 4],
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(500.0, 500.0, 500.0),
        );
        let t = BSplineTransform::over_image([2, 2, 2], &out_geom);
        let filter = ResampleFilter::new(
            out_geom,
            7.0,
            Transform::BSpline(t),
            InterpolatorKind::NearestNeighbor,
        );
        let output = filter.update(&input);
        assert!(output.as_slice().iter().all(|&v| v == 7));
    }

    #[test]
    fn test_repeat_update_is_bit_identical() {
        let input = checker_volume([7, 7, 7]);
        let filter = ResampleFilter::new(
            unit_geometry([8, 8, 8]),
            -1.0,
            Transform::Affine(AffineTransform::from_parameters(&[
                1.03, 0.2, 0.0, -0.21, 1.12, 0.3, 0.0, 0.01, 0.8, -10.0, 5.1, 0.0,
            ])),
            InterpolatorKind::BSpline,
        );
        let a = filter.update(&input);
        let b = filter.update(&input);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_output_geometry_matches_configuration() {
        let input = checker_volume([6, 6, 6]);
        let out_geom = ImageGeometry::with_direction(
            [9, 5, 7],
            [1, 0, -2],
            Vector3::new(0.9, 1.1, 1.0),
            Vector3::new(0.3, -0.2, 0.0),
            Matrix3::identity(),
        );
        let filter = ResampleFilter::new(
            out_geom.clone(),
            -1.0,
            Transform::Affine(AffineTransform::identity()),
            InterpolatorKind::Linear,
        );
        let output = filter.update(&input);
        assert_eq!(output.geometry(), &out_geom);
        assert_eq!(output.num_voxels(), 9 * 5 * 7);
    }

    #[test]
    fn test_scaling_resample_downsamples() {
        // Output spacing 2.0 over the same physical extent: every output
        // voxel lands exactly on an even-index source voxel.
        let input = checker_volume([8, 8, 8]);
        let out_geom = ImageGeometry::new(
            [4, 4, 4],
            Vector3::new(2.0, 2.0, 2.0),
            Vector3::zeros(),
        );
        let filter = ResampleFilter::new(
            out_geom,
            -1.0,
            Transform::Affine(AffineTransform::identity()),
            InterpolatorKind::NearestNeighbor,
        );
        let output = filter.update(&input);
        for z in 0..4u32 {
            for y in 0..4u32 {
                for x in 0..4u32 {
                    assert_eq!(output.get(x, y, z), input.get(2 * x, 2 * y, 2 * z));
                }
            }
        }
    }
}
