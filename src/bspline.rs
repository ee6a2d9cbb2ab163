// bspline.rs — Cubic B-spline basis and the separable coefficient
// decomposition prefilter.
//
// Direct cubic B-spline "interpolation" of raw samples does not pass
// through the data — the basis functions overlap. Interpolation requires
// a prefiltered *coefficient* volume c such that
//
//   Σ_m β₃(x − m) · c[m]  =  f[x]   at integer x.
//
// Unser's recursive filter computes c from f in O(n) per line: one
// causal and one anticausal first-order pass per axis with the single
// cubic pole z = √3 − 2, plus an overall gain of 6 per axis
// (Unser, Aldroubi, Eden — "B-Spline Signal Processing", 1993).
//
// The same math runs in three places and must stay in lockstep:
//   - `decompose_in_place` here (reference, and the CPU resample path)
//   - `decompose.wgsl` (device, one work item per line)
//   - the basis weights below, shared by the free-form transform and
//     the B-spline interpolator on both CPU and GPU.
//
// Boundary handling: the causal pass is initialized from a truncated
// power series over the first samples of the line (the tail beyond
// |z|^28 ≈ 1e-16 is dropped); neighbor fetches at sampling time clamp
// to the volume edge.

/// The single pole of the cubic B-spline prefilter: √3 − 2.
pub const CUBIC_POLE: f32 = -0.267_949_19;

/// Per-axis gain of the cubic prefilter: (1 − z)(1 − 1/z) = 6.
pub const CUBIC_GAIN: f32 = 6.0;

/// Number of terms in the causal-initialization power series. |z|^28 is
/// below f32 resolution, so longer sums change nothing.
const INIT_HORIZON: usize = 28;

/// Cubic B-spline basis weights for a local parameter t ∈ [0, 1].
///
/// Returns the four weights applied to the support points at offsets
/// {−1, 0, +1, +2} from ⌊x⌋ (interpolation view), or equivalently to
/// the four control points of a mesh cell (free-form transform view).
/// The weights are non-negative and sum to 1 for any t.
#[inline]
pub fn cubic_weights(t: f32) -> [f32; 4] {
    let s = 1.0 - t;
    let t2 = t * t;
    let t3 = t2 * t;
    [
        s * s * s / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

/// Run the cubic prefilter over one line, in place.
///
/// `line[i * stride]` for i in 0..n addresses the samples; lines of a
/// volume along y or z are strided views of the flat buffer.
fn filter_line(data: &mut [f32], offset: usize, stride: usize, n: usize) {
    if n == 1 {
        return;
    }
    let idx = |i: usize| offset + i * stride;

    // Overall gain.
    for i in 0..n {
        data[idx(i)] *= CUBIC_GAIN;
    }

    // Causal initialization: truncated power series over the line head.
    let horizon = INIT_HORIZON.min(n);
    let mut sum = data[idx(0)];
    let mut zk = CUBIC_POLE;
    for k in 1..horizon {
        sum += zk * data[idx(k)];
        zk *= CUBIC_POLE;
    }
    data[idx(0)] = sum;

    // Causal pass.
    for i in 1..n {
        data[idx(i)] += CUBIC_POLE * data[idx(i - 1)];
    }

    // Anticausal initialization.
    let last = data[idx(n - 1)];
    let prev = data[idx(n - 2)];
    data[idx(n - 1)] = (CUBIC_POLE / (CUBIC_POLE * CUBIC_POLE - 1.0)) * (CUBIC_POLE * prev + last);

    // Anticausal pass.
    for i in (0..n - 1).rev() {
        data[idx(i)] = CUBIC_POLE * (data[idx(i + 1)] - data[idx(i)]);
    }
}

/// Decompose a flat x-fastest volume into cubic B-spline coefficients,
/// in place: one filtered pass per axis.
pub fn decompose_in_place(data: &mut [f32], size: [u32; 3]) {
    let [w, h, d] = [size[0] as usize, size[1] as usize, size[2] as usize];
    assert_eq!(data.len(), w * h * d, "buffer does not match size {size:?}");

    // Along x: lines indexed by (y, z), stride 1.
    for z in 0..d {
        for y in 0..h {
            filter_line(data, w * (y + h * z), 1, w);
        }
    }
    // Along y: lines indexed by (x, z), stride w.
    for z in 0..d {
        for x in 0..w {
            filter_line(data, x + w * h * z, w, h);
        }
    }
    // Along z: lines indexed by (x, y), stride w·h.
    for y in 0..h {
        for x in 0..w {
            filter_line(data, x + w * y, w * h, d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_partition_unity() {
        for k in 0..=20 {
            let t = k as f32 / 20.0;
            let w = cubic_weights(t);
            let sum: f32 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "t={t}: weights sum to {sum}");
            assert!(w.iter().all(|&x| x >= 0.0), "t={t}: negative weight");
        }
    }

    #[test]
    fn test_weights_at_grid_point() {
        // t = 0: the classic (1/6, 2/3, 1/6, 0) stencil.
        let w = cubic_weights(0.0);
        assert!((w[0] - 1.0 / 6.0).abs() < 1e-6);
        assert!((w[1] - 2.0 / 3.0).abs() < 1e-6);
        assert!((w[2] - 1.0 / 6.0).abs() < 1e-6);
        assert!(w[3].abs() < 1e-6);
    }

    #[test]
    fn test_constant_line_is_fixed_point() {
        // A constant signal's coefficients are the same constant: the
        // prefilter gain exactly cancels the basis overlap.
        let mut data = vec![5.0f32; 32];
        filter_line(&mut data, 0, 1, 32);
        for (i, &c) in data.iter().enumerate() {
            assert!((c - 5.0).abs() < 1e-3, "c[{i}] = {c}");
        }
    }

    /// Reconstruct the signal value at integer position j from
    /// coefficients using the (1/6, 2/3, 1/6) stencil with edge clamp.
    fn reconstruct(coeff: &[f32], j: usize) -> f32 {
        let n = coeff.len();
        let at = |i: isize| coeff[i.clamp(0, n as isize - 1) as usize];
        let j = j as isize;
        (at(j - 1) + 4.0 * at(j) + at(j + 1)) / 6.0
    }

    #[test]
    fn test_decomposition_interpolates_samples() {
        // The defining property: sampling the spline at the original
        // grid positions reproduces the original samples. Edges deviate
        // slightly (clamped neighbors), so check the interior.
        let original: Vec<f32> = (0..40)
            .map(|i| ((i as f32) * 0.3).sin() * 100.0 + (i as f32) * 2.0)
            .collect();
        let mut coeff = original.clone();
        filter_line(&mut coeff, 0, 1, 40);

        for j in 2..38 {
            let v = reconstruct(&coeff, j);
            assert!(
                (v - original[j]).abs() < 1e-2,
                "position {j}: reconstructed {v}, expected {}",
                original[j]
            );
        }
    }

    #[test]
    fn test_strided_line_matches_contiguous() {
        // Filtering a y-line through the strided path must equal
        // filtering the same samples packed contiguously.
        let samples: Vec<f32> = (0..16).map(|i| (i * i) as f32).collect();

        let mut contiguous = samples.clone();
        filter_line(&mut contiguous, 0, 1, 16);

        // Embed the samples as column x=1 of a 3-wide buffer.
        let mut strided = vec![0.0f32; 3 * 16];
        for (i, &v) in samples.iter().enumerate() {
            strided[1 + 3 * i] = v;
        }
        filter_line(&mut strided, 1, 3, 16);

        for i in 0..16 {
            assert!(
                (strided[1 + 3 * i] - contiguous[i]).abs() < 1e-4,
                "element {i}: strided {} vs contiguous {}",
                strided[1 + 3 * i],
                contiguous[i]
            );
        }
    }

    #[test]
    fn test_decompose_volume_constant() {
        let mut data = vec![7.0f32; 6 * 5 * 4];
        decompose_in_place(&mut data, [6, 5, 4]);
        for (i, &c) in data.iter().enumerate() {
            assert!((c - 7.0).abs() < 1e-2, "c[{i}] = {c}");
        }
    }

    #[test]
    fn test_single_sample_line_untouched() {
        let mut data = vec![3.0f32];
        filter_line(&mut data, 0, 1, 1);
        assert_eq!(data[0], 3.0);
    }
}
