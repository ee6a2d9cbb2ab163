// geometry.rs — Volume geometry: the mapping between voxel indices and
// physical space.
//
// A structured volume is more than its sample array: spacing, origin,
// direction cosines, size and start index together place the rectangular
// index domain in physical (world) space:
//
//   physical = origin + direction · diag(spacing) · index
//
// where `index` is the absolute voxel index (start index included, so a
// volume starting at index (10, 0, 0) has its first voxel at
// origin + direction · diag(spacing) · (10, 0, 0)).
//
// The direction matrix holds the unit vectors of the volume axes as
// columns and must be orthonormal — its inverse is its transpose, which
// is what `physical_to_continuous_index` relies on.
//
// Both resample paths (CPU and GPU) consume geometry as two affine maps
// packed as 3×4 row matrices:
//   - output index        → physical point   (per-voxel kernel input)
//   - physical point      → buffer-local continuous index of the source
// The start index is folded into the constant column on both sides so
// kernels work purely in buffer coordinates.

use nalgebra::{Matrix3, Vector3};

/// Placement of a 3-D rectangular index domain in physical space.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    /// Number of voxels per axis.
    pub size: [u32; 3],
    /// Absolute index of the first voxel. Usually zero, but resampling
    /// preserves whatever the source volume declares.
    pub start_index: [i32; 3],
    /// Physical extent of one voxel per axis. Strictly positive.
    pub spacing: Vector3<f32>,
    /// Physical position of the voxel at `start_index`... not quite:
    /// the position of absolute index (0, 0, 0). See `index_to_physical`.
    pub origin: Vector3<f32>,
    /// Direction cosines; columns are the physical unit vectors of the
    /// index axes. Must be orthonormal.
    pub direction: Matrix3<f32>,
}

/// Largest tolerated deviation of `directionᵀ · direction` from identity.
const ORTHONORMAL_TOLERANCE: f32 = 1e-4;

impl ImageGeometry {
    /// Axis-aligned geometry: identity direction, zero start index.
    pub fn new(size: [u32; 3], spacing: Vector3<f32>, origin: Vector3<f32>) -> Self {
        ImageGeometry {
            size,
            start_index: [0; 3],
            spacing,
            origin,
            direction: Matrix3::identity(),
        }
    }

    /// Full constructor. Validates spacing and direction.
    ///
    /// # Panics
    /// Panics if any spacing component is not strictly positive, or if
    /// the direction matrix is not orthonormal within tolerance. Both
    /// indicate a broken volume header, not a recoverable condition.
    pub fn with_direction(
        size: [u32; 3],
        start_index: [i32; 3],
        spacing: Vector3<f32>,
        origin: Vector3<f32>,
        direction: Matrix3<f32>,
    ) -> Self {
        assert!(
            spacing.iter().all(|&s| s > 0.0),
            "spacing must be strictly positive, got {spacing:?}"
        );
        let gram = direction.transpose() * direction;
        let deviation = (gram - Matrix3::identity()).norm();
        assert!(
            deviation < ORTHONORMAL_TOLERANCE,
            "direction matrix is not orthonormal (|DᵀD - I| = {deviation})"
        );
        ImageGeometry {
            size,
            start_index,
            spacing,
            origin,
            direction,
        }
    }

    /// Total number of voxels.
    #[inline]
    pub fn num_voxels(&self) -> usize {
        self.size.iter().map(|&s| s as usize).product()
    }

    /// Map an absolute (continuous) voxel index to a physical point.
    #[inline]
    pub fn index_to_physical(&self, index: Vector3<f32>) -> Vector3<f32> {
        self.origin + self.direction * index.component_mul(&self.spacing)
    }

    /// Map a physical point to an absolute continuous index.
    ///
    /// Uses the transpose of the direction matrix as its inverse, which
    /// holds because the matrix is orthonormal (validated on
    /// construction).
    #[inline]
    pub fn physical_to_continuous_index(&self, p: Vector3<f32>) -> Vector3<f32> {
        let rotated = self.direction.transpose() * (p - self.origin);
        rotated.component_div(&self.spacing)
    }

    /// The index→physical map as a 3×4 row matrix over *buffer-local*
    /// indices (start index folded into the constant column).
    ///
    /// Row r satisfies: physical_r = Σ_a M[r][a]·buf_a + M[r][3].
    pub fn index_to_physical_rows(&self) -> [[f32; 4]; 3] {
        let a = self.direction * Matrix3::from_diagonal(&self.spacing);
        let start = Vector3::new(
            self.start_index[0] as f32,
            self.start_index[1] as f32,
            self.start_index[2] as f32,
        );
        let b = self.origin + a * start;
        pack_rows(&a, &b)
    }

    /// The physical→index map as a 3×4 row matrix producing
    /// *buffer-local* continuous indices (start index subtracted).
    pub fn physical_to_index_rows(&self) -> [[f32; 4]; 3] {
        let inv_spacing = Vector3::new(
            1.0 / self.spacing.x,
            1.0 / self.spacing.y,
            1.0 / self.spacing.z,
        );
        let a = Matrix3::from_diagonal(&inv_spacing) * self.direction.transpose();
        let start = Vector3::new(
            self.start_index[0] as f32,
            self.start_index[1] as f32,
            self.start_index[2] as f32,
        );
        let b = -(a * self.origin) - start;
        pack_rows(&a, &b)
    }

    /// Physical extent per axis: spacing · (size − 1). The span between
    /// the centers of the first and last voxel, which is the domain a
    /// free-form transform mesh covers.
    pub fn physical_extent(&self) -> Vector3<f32> {
        Vector3::new(
            self.spacing.x * (self.size[0].saturating_sub(1)) as f32,
            self.spacing.y * (self.size[1].saturating_sub(1)) as f32,
            self.spacing.z * (self.size[2].saturating_sub(1)) as f32,
        )
    }
}

fn pack_rows(a: &Matrix3<f32>, b: &Vector3<f32>) -> [[f32; 4]; 3] {
    let mut rows = [[0.0f32; 4]; 3];
    for r in 0..3 {
        for c in 0..3 {
            rows[r][c] = a[(r, c)];
        }
        rows[r][3] = b[r];
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vector3<f32>, b: Vector3<f32>) -> bool {
        (a - b).norm() < 1e-4
    }

    #[test]
    fn test_identity_geometry_round_trip() {
        let g = ImageGeometry::new(
            [8, 8, 8],
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::zeros(),
        );
        let idx = Vector3::new(3.0, 4.5, 7.0);
        let p = g.index_to_physical(idx);
        assert!(close(p, idx));
        assert!(close(g.physical_to_continuous_index(p), idx));
    }

    #[test]
    fn test_spacing_and_origin() {
        let g = ImageGeometry::new(
            [4, 4, 4],
            Vector3::new(2.0, 0.5, 1.5),
            Vector3::new(10.0, -5.0, 0.0),
        );
        let p = g.index_to_physical(Vector3::new(1.0, 2.0, 2.0));
        assert!(close(p, Vector3::new(12.0, -4.0, 3.0)));
        let ci = g.physical_to_continuous_index(p);
        assert!(close(ci, Vector3::new(1.0, 2.0, 2.0)));
    }

    #[test]
    fn test_rotated_direction_round_trip() {
        // 90° rotation about z: x-axis of the volume points along
        // physical y.
        let d = Matrix3::new(
            0.0, -1.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0,
        );
        let g = ImageGeometry::with_direction(
            [4, 4, 4],
            [0; 3],
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(1.0, 2.0, 3.0),
            d,
        );
        let idx = Vector3::new(2.0, 0.0, 1.0);
        let p = g.index_to_physical(idx);
        assert!(close(p, Vector3::new(1.0, 4.0, 4.0)));
        assert!(close(g.physical_to_continuous_index(p), idx));
    }

    #[test]
    fn test_row_matrices_match_direct_mapping() {
        let g = ImageGeometry::with_direction(
            [6, 5, 4],
            [2, -1, 0],
            Vector3::new(1.5, 0.8, 2.0),
            Vector3::new(-3.0, 7.0, 1.0),
            Matrix3::identity(),
        );
        let i2p = g.index_to_physical_rows();
        let p2i = g.physical_to_index_rows();

        // Buffer index (1, 2, 3) is absolute index (3, 1, 3).
        let buf = [1.0f32, 2.0, 3.0];
        let apply = |rows: &[[f32; 4]; 3], v: [f32; 3]| {
            let mut out = [0.0f32; 3];
            for r in 0..3 {
                out[r] =
                    rows[r][0] * v[0] + rows[r][1] * v[1] + rows[r][2] * v[2] + rows[r][3];
            }
            out
        };

        let p = apply(&i2p, buf);
        let expected = g.index_to_physical(Vector3::new(3.0, 1.0, 3.0));
        assert!((p[0] - expected.x).abs() < 1e-4);
        assert!((p[1] - expected.y).abs() < 1e-4);
        assert!((p[2] - expected.z).abs() < 1e-4);

        // And back to buffer-local coordinates.
        let back = apply(&p2i, p);
        for (got, want) in back.iter().zip(buf.iter()) {
            assert!((got - want).abs() < 1e-3, "round trip: {got} vs {want}");
        }
    }

    #[test]
    #[should_panic(expected = "orthonormal")]
    fn test_rejects_skewed_direction() {
        let d = Matrix3::new(
            1.0, 0.3, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        );
        let _ = ImageGeometry::with_direction(
            [2, 2, 2],
            [0; 3],
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::zeros(),
            d,
        );
    }

    #[test]
    #[should_panic(expected = "spacing")]
    fn test_rejects_zero_spacing() {
        let _ = ImageGeometry::with_direction(
            [2, 2, 2],
            [0; 3],
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::zeros(),
            Matrix3::identity(),
        );
    }

    #[test]
    fn test_physical_extent() {
        let g = ImageGeometry::new(
            [11, 21, 2],
            Vector3::new(1.0, 0.5, 3.0),
            Vector3::zeros(),
        );
        let e = g.physical_extent();
        assert!(close(e, Vector3::new(10.0, 10.0, 3.0)));
    }
}
