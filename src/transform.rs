// transform.rs — Coordinate transforms mapping output physical points
// into the source volume's physical space.
//
// Resampling is a gather: for every output voxel the transform answers
// "where in the source does this voxel's value come from". Two kinds are
// supported, as a closed enum — the variant set is small and fixed, and
// kernel selection keys off the discriminant, so there is nothing for a
// trait object to add here:
//
//   - Affine:    y = A·x + t
//   - Free-form: y = x + d(x), a cubic B-spline deformation field over a
//                regular control-point mesh (Rueckert et al., "Nonrigid
//                registration using free-form deformations", 1999)
//
// Parameters are a flat f32 sequence in both cases:
//   affine:    9 matrix entries row-major, then 3 translation entries
//   free-form: control-point displacements grouped by axis — all x
//              displacements, then all y, then all z, each block in
//              x-fastest control-grid order
//
// `device_params()` serializes each variant into the storage-buffer
// layout its WGSL snippet expects. The CPU `map_point` and the device
// snippet evaluate the same formulas; the CPU side is the reference.

use crate::bspline::cubic_weights;
use crate::geometry::ImageGeometry;
use nalgebra::{Matrix3, Vector3};

/// Transform discriminant; part of the kernel cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Affine,
    BSpline,
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformKind::Affine => write!(f, "Affine"),
            TransformKind::BSpline => write!(f, "BSpline"),
        }
    }
}

// ---------------------------------------------------------------------------
// Affine
// ---------------------------------------------------------------------------

/// `y = A·x + t`.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    pub matrix: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

impl AffineTransform {
    pub fn identity() -> Self {
        AffineTransform {
            matrix: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from flat parameters: 9 matrix entries row-major, then the
    /// 3 translation entries.
    ///
    /// # Panics
    /// Panics unless exactly 12 parameters are given.
    pub fn from_parameters(params: &[f32]) -> Self {
        assert_eq!(params.len(), 12, "affine transform takes 12 parameters");
        AffineTransform {
            matrix: Matrix3::from_row_slice(&params[0..9]),
            translation: Vector3::new(params[9], params[10], params[11]),
        }
    }

    #[inline]
    pub fn map_point(&self, p: Vector3<f32>) -> Vector3<f32> {
        self.matrix * p + self.translation
    }

    /// Device parameter block: the 12 parameters in their flat order.
    fn device_params(&self) -> Vec<f32> {
        let m = &self.matrix;
        vec![
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }
}

// ---------------------------------------------------------------------------
// Free-form (B-spline) deformation
// ---------------------------------------------------------------------------

/// Cubic B-spline free-form deformation over a regular control mesh.
///
/// The mesh spans a physical domain (origin, direction, extent) divided
/// into `mesh_size` cells per axis. A cubic spline needs one extra
/// control point before the domain and two after, so the control grid
/// has `mesh_size + 3` points per axis, with the grid shifted one cell
/// before the domain origin. Displacements at the control points are the
/// transform's parameters; points map as identity plus the spline-
/// weighted sum of the 4³ surrounding control displacements.
#[derive(Debug, Clone)]
pub struct BSplineTransform {
    /// Cells per axis.
    pub mesh_size: [u32; 3],
    /// Physical origin of the deformation domain.
    pub domain_origin: Vector3<f32>,
    /// Orientation of the domain (orthonormal, same convention as image
    /// direction matrices).
    pub domain_direction: Matrix3<f32>,
    /// Physical extent of the domain per axis.
    pub domain_extent: Vector3<f32>,
    /// Displacement coefficients grouped by axis; each block has
    /// `grid_len()` entries in x-fastest grid order.
    coefficients: Vec<f32>,
}

impl BSplineTransform {
    /// Zero-displacement (identity) transform over the given domain.
    pub fn new(
        mesh_size: [u32; 3],
        domain_origin: Vector3<f32>,
        domain_direction: Matrix3<f32>,
        domain_extent: Vector3<f32>,
    ) -> Self {
        let mut t = BSplineTransform {
            mesh_size,
            domain_origin,
            domain_direction,
            domain_extent,
            coefficients: Vec::new(),
        };
        t.coefficients = vec![0.0; 3 * t.grid_len()];
        t
    }

    /// Mesh covering a source volume's physical domain — the common
    /// configuration for resampling benchmarks.
    pub fn over_image(mesh_size: [u32; 3], geometry: &ImageGeometry) -> Self {
        Self::new(
            mesh_size,
            geometry.origin,
            geometry.direction,
            geometry.physical_extent(),
        )
    }

    /// Control points per axis: mesh cells + spline order.
    #[inline]
    pub fn grid_size(&self) -> [u32; 3] {
        [
            self.mesh_size[0] + 3,
            self.mesh_size[1] + 3,
            self.mesh_size[2] + 3,
        ]
    }

    /// Control points in the whole grid (one axis block).
    #[inline]
    pub fn grid_len(&self) -> usize {
        self.grid_size().iter().map(|&g| g as usize).product()
    }

    /// Total parameter count: three displacement blocks.
    #[inline]
    pub fn num_parameters(&self) -> usize {
        3 * self.grid_len()
    }

    /// Replace the displacement coefficients (x block, y block, z block).
    ///
    /// # Panics
    /// Panics on length mismatch.
    pub fn set_parameters(&mut self, params: &[f32]) {
        assert_eq!(
            params.len(),
            self.num_parameters(),
            "free-form transform takes {} parameters, got {}",
            self.num_parameters(),
            params.len(),
        );
        self.coefficients.clear();
        self.coefficients.extend_from_slice(params);
    }

    pub fn parameters(&self) -> &[f32] {
        &self.coefficients
    }

    /// Physical spacing of the control grid per axis.
    fn grid_spacing(&self) -> Vector3<f32> {
        Vector3::new(
            self.domain_extent.x / self.mesh_size[0] as f32,
            self.domain_extent.y / self.mesh_size[1] as f32,
            self.domain_extent.z / self.mesh_size[2] as f32,
        )
    }

    /// Physical point → mesh parametric coordinate, in cell units, as a
    /// 3×4 row matrix. u ∈ [0, mesh_size] covers the domain.
    fn physical_to_mesh_rows(&self) -> [[f32; 4]; 3] {
        let gs = self.grid_spacing();
        let inv = Vector3::new(1.0 / gs.x, 1.0 / gs.y, 1.0 / gs.z);
        let a = Matrix3::from_diagonal(&inv) * self.domain_direction.transpose();
        let b = -(a * self.domain_origin);
        let mut rows = [[0.0f32; 4]; 3];
        for r in 0..3 {
            for c in 0..3 {
                rows[r][c] = a[(r, c)];
            }
            rows[r][3] = b[r];
        }
        rows
    }

    #[inline]
    pub fn map_point(&self, p: Vector3<f32>) -> Vector3<f32> {
        let rows = self.physical_to_mesh_rows();
        let u = Vector3::new(
            rows[0][0] * p.x + rows[0][1] * p.y + rows[0][2] * p.z + rows[0][3],
            rows[1][0] * p.x + rows[1][1] * p.y + rows[1][2] * p.z + rows[1][3],
            rows[2][0] * p.x + rows[2][1] * p.y + rows[2][2] * p.z + rows[2][3],
        );

        // Containing cell, clamped to the valid support region. Points
        // outside the mesh evaluate the nearest boundary cell with the
        // local parameter clamped to [0, 1] — no extrapolation blow-up.
        let m = self.mesh_size;
        let cell = [
            (u.x.floor() as i64).clamp(0, m[0] as i64 - 1) as usize,
            (u.y.floor() as i64).clamp(0, m[1] as i64 - 1) as usize,
            (u.z.floor() as i64).clamp(0, m[2] as i64 - 1) as usize,
        ];
        let wx = cubic_weights((u.x - cell[0] as f32).clamp(0.0, 1.0));
        let wy = cubic_weights((u.y - cell[1] as f32).clamp(0.0, 1.0));
        let wz = cubic_weights((u.z - cell[2] as f32).clamp(0.0, 1.0));

        let g = self.grid_size();
        let (gx, gy) = (g[0] as usize, g[1] as usize);
        let n = self.grid_len();
        let mut disp = Vector3::zeros();
        for (kz, &wkz) in wz.iter().enumerate() {
            for (ky, &wky) in wy.iter().enumerate() {
                let plane = gx * ((cell[1] + ky) + gy * (cell[2] + kz));
                for (kx, &wkx) in wx.iter().enumerate() {
                    let w = wkx * wky * wkz;
                    let ci = (cell[0] + kx) + plane;
                    disp.x += w * self.coefficients[ci];
                    disp.y += w * self.coefficients[n + ci];
                    disp.z += w * self.coefficients[2 * n + ci];
                }
            }
        }
        p + disp
    }

    /// Device parameter block layout (see `transform_bspline.wgsl`):
    ///   [0..3]   grid size per axis (as f32), one pad
    ///   [4..16]  physical→mesh rows (3 × vec4)
    ///   [16..]   coefficient blocks: x, y, z
    fn device_params(&self) -> Vec<f32> {
        let g = self.grid_size();
        let rows = self.physical_to_mesh_rows();
        let mut out = Vec::with_capacity(16 + self.coefficients.len());
        out.extend_from_slice(&[g[0] as f32, g[1] as f32, g[2] as f32, 0.0]);
        for row in &rows {
            out.extend_from_slice(row);
        }
        out.extend_from_slice(&self.coefficients);
        out
    }
}

// ---------------------------------------------------------------------------
// Closed transform variant
// ---------------------------------------------------------------------------

/// The transform bound to a resample run.
#[derive(Debug, Clone)]
pub enum Transform {
    Affine(AffineTransform),
    BSpline(BSplineTransform),
}

impl Transform {
    #[inline]
    pub fn kind(&self) -> TransformKind {
        match self {
            Transform::Affine(_) => TransformKind::Affine,
            Transform::BSpline(_) => TransformKind::BSpline,
        }
    }

    /// Map an output-space physical point into source space.
    #[inline]
    pub fn map_point(&self, p: Vector3<f32>) -> Vector3<f32> {
        match self {
            Transform::Affine(t) => t.map_point(p),
            Transform::BSpline(t) => t.map_point(p),
        }
    }

    /// Serialize for the device. The returned block is a snapshot:
    /// mutating the transform afterwards does not affect a dispatch the
    /// block was already uploaded for.
    pub fn device_params(&self) -> Vec<f32> {
        match self {
            Transform::Affine(t) => t.device_params(),
            Transform::BSpline(t) => t.device_params(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vector3<f32>, b: Vector3<f32>, tol: f32) -> bool {
        (a - b).norm() < tol
    }

    #[test]
    fn test_affine_identity() {
        let t = AffineTransform::identity();
        let p = Vector3::new(1.0, -2.0, 3.5);
        assert!(close(t.map_point(p), p, 1e-6));
    }

    #[test]
    fn test_affine_from_parameters() {
        // The benchmark's 3-D affine.
        let t = AffineTransform::from_parameters(&[
            1.03, 0.2, 0.0, //
            -0.21, 1.12, 0.3, //
            0.0, 0.01, 0.8, //
            -10.0, 5.1, 0.0,
        ]);
        let p = Vector3::new(10.0, 20.0, 30.0);
        let q = t.map_point(p);
        assert!((q.x - (1.03 * 10.0 + 0.2 * 20.0 - 10.0)).abs() < 1e-4);
        assert!((q.y - (-0.21 * 10.0 + 1.12 * 20.0 + 0.3 * 30.0 + 5.1)).abs() < 1e-4);
        assert!((q.z - (0.01 * 20.0 + 0.8 * 30.0)).abs() < 1e-4);
    }

    #[test]
    #[should_panic(expected = "12 parameters")]
    fn test_affine_wrong_parameter_count() {
        let _ = AffineTransform::from_parameters(&[1.0; 9]);
    }

    #[test]
    fn test_bspline_zero_displacement_is_identity() {
        let t = BSplineTransform::new(
            [4, 4, 4],
            Vector3::zeros(),
            Matrix3::identity(),
            Vector3::new(100.0, 100.0, 100.0),
        );
        for p in [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(50.0, 25.0, 75.0),
            Vector3::new(100.0, 100.0, 100.0),
            // Outside the mesh: clamped support, still identity.
            Vector3::new(150.0, -20.0, 50.0),
        ] {
            assert!(close(t.map_point(p), p, 1e-5), "point {p:?}");
        }
    }

    #[test]
    fn test_bspline_grid_dimensions() {
        let t = BSplineTransform::new(
            [4, 5, 6],
            Vector3::zeros(),
            Matrix3::identity(),
            Vector3::new(10.0, 10.0, 10.0),
        );
        assert_eq!(t.grid_size(), [7, 8, 9]);
        assert_eq!(t.grid_len(), 7 * 8 * 9);
        assert_eq!(t.num_parameters(), 3 * 7 * 8 * 9);
    }

    #[test]
    fn test_bspline_uniform_displacement() {
        // Setting every control point to the same displacement shifts
        // every point by exactly that amount (the weights sum to 1).
        let mut t = BSplineTransform::new(
            [4, 4, 4],
            Vector3::zeros(),
            Matrix3::identity(),
            Vector3::new(80.0, 80.0, 80.0),
        );
        let n = t.grid_len();
        let mut params = vec![0.0f32; 3 * n];
        for v in params[..n].iter_mut() {
            *v = 3.0; // x displacement
        }
        for v in params[2 * n..].iter_mut() {
            *v = -1.5; // z displacement
        }
        t.set_parameters(&params);

        let p = Vector3::new(40.0, 20.0, 60.0);
        let q = t.map_point(p);
        assert!(close(q, Vector3::new(43.0, 20.0, 58.5), 1e-3), "got {q:?}");
    }

    #[test]
    fn test_bspline_displacement_is_smooth_and_local() {
        // Perturb one interior control point; the displacement must be
        // nonzero near it and exactly zero outside its 4-cell support.
        let mut t = BSplineTransform::new(
            [8, 8, 8],
            Vector3::zeros(),
            Matrix3::identity(),
            Vector3::new(80.0, 80.0, 80.0),
        );
        let g = t.grid_size();
        let n = t.grid_len();
        let mut params = vec![0.0f32; 3 * n];
        // Control point (5, 5, 5) in the padded grid, x-displacement.
        let ci = 5 + g[0] as usize * (5 + g[1] as usize * 5);
        params[ci] = 10.0;
        t.set_parameters(&params);

        // Grid point (5,5,5) sits one cell before index 5 ⇒ physical
        // (4·10, ...) = (40, 40, 40) with 10 mm cells. Near it: moved.
        let near = t.map_point(Vector3::new(40.0, 40.0, 40.0));
        assert!((near.x - 40.0).abs() > 1.0, "no displacement near the knot");

        // Far corner: outside the support of that single control point.
        let far = t.map_point(Vector3::new(5.0, 5.0, 5.0));
        assert!(close(far, Vector3::new(5.0, 5.0, 5.0), 1e-5));
    }

    #[test]
    fn test_device_params_layout() {
        let mut t = BSplineTransform::new(
            [4, 4, 4],
            Vector3::new(1.0, 2.0, 3.0),
            Matrix3::identity(),
            Vector3::new(40.0, 40.0, 40.0),
        );
        let n = t.grid_len();
        let mut params = vec![0.0f32; 3 * n];
        params[0] = 9.0;
        t.set_parameters(&params);

        let block = Transform::BSpline(t).device_params();
        assert_eq!(block.len(), 16 + 3 * n);
        assert_eq!(block[0], 7.0); // grid size x
        assert_eq!(block[16], 9.0); // first x coefficient
        // physical→mesh row 0: 1/gs on the diagonal, offset −origin/gs.
        let gs = 10.0;
        assert!((block[4] - 1.0 / gs).abs() < 1e-6);
        assert!((block[7] - -1.0 / gs).abs() < 1e-6);
    }

    #[test]
    fn test_transform_kind() {
        assert_eq!(
            Transform::Affine(AffineTransform::identity()).kind(),
            TransformKind::Affine
        );
    }
}
