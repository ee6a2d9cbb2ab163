// interpolation.rs — Intensity reconstruction at non-integer positions.
//
// Every sampler follows the same contract the device kernels implement:
//
//   1. `is_inside` gates sampling. A continuous index is inside when
//      every axis lies in [0, size−1] (buffer-local). Outside points
//      never reach a sampler — the resample loop writes the default
//      value instead.
//   2. Inside, neighbor fetches clamp to the volume edge, so the
//      support region of a sample sitting exactly on the boundary is
//      well defined without growing the buffer.
//
// Nearest-neighbor rounding is ⌊x + 0.5⌋ (round half up) rather than
// f32::round — WGSL's round() is round-to-even, and the two paths must
// agree bit-for-bit on half-integer positions.
//
// The B-spline sampler reads a *coefficient* volume produced by
// `bspline::decompose_in_place`, never raw samples; see bspline.rs for
// why direct sampling of raw data would not interpolate.

use crate::bspline::cubic_weights;
use crate::image::{Image3, Pixel};
use nalgebra::Vector3;

/// Interpolator discriminant; part of the kernel cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolatorKind {
    NearestNeighbor,
    Linear,
    BSpline,
}

impl std::fmt::Display for InterpolatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpolatorKind::NearestNeighbor => write!(f, "NearestNeighbor"),
            InterpolatorKind::Linear => write!(f, "Linear"),
            InterpolatorKind::BSpline => write!(f, "BSpline"),
        }
    }
}

/// Spline order used by the B-spline interpolator. Fixed: the kernels
/// and the decomposition prefilter are specialized for cubic.
pub const SPLINE_ORDER: u32 = 3;

/// Is a buffer-local continuous index within the sampleable region?
#[inline]
pub fn is_inside(ci: Vector3<f32>, size: [u32; 3]) -> bool {
    ci.x >= 0.0
        && ci.x <= (size[0] - 1) as f32
        && ci.y >= 0.0
        && ci.y <= (size[1] - 1) as f32
        && ci.z >= 0.0
        && ci.z <= (size[2] - 1) as f32
}

#[inline]
fn clamp_index(i: i64, size: u32) -> u32 {
    i.clamp(0, size as i64 - 1) as u32
}

/// Nearest-neighbor: round half up per axis.
#[inline]
pub fn sample_nearest<T: Pixel>(img: &Image3<T>, ci: Vector3<f32>) -> f32 {
    let size = img.size();
    let x = clamp_index((ci.x + 0.5).floor() as i64, size[0]);
    let y = clamp_index((ci.y + 0.5).floor() as i64, size[1]);
    let z = clamp_index((ci.z + 0.5).floor() as i64, size[2]);
    // SAFETY: clamped to bounds above.
    unsafe { img.get_unchecked(x, y, z) }.to_f32()
}

/// Trilinear: weighted sum over the 8 surrounding samples.
#[inline]
pub fn sample_linear<T: Pixel>(img: &Image3<T>, ci: Vector3<f32>) -> f32 {
    let size = img.size();
    let fx = ci.x.floor();
    let fy = ci.y.floor();
    let fz = ci.z.floor();
    let tx = ci.x - fx;
    let ty = ci.y - fy;
    let tz = ci.z - fz;

    let x0 = clamp_index(fx as i64, size[0]);
    let y0 = clamp_index(fy as i64, size[1]);
    let z0 = clamp_index(fz as i64, size[2]);
    let x1 = clamp_index(fx as i64 + 1, size[0]);
    let y1 = clamp_index(fy as i64 + 1, size[1]);
    let z1 = clamp_index(fz as i64 + 1, size[2]);

    // SAFETY: all six offsets clamped to bounds above.
    unsafe {
        let c000 = img.get_unchecked(x0, y0, z0).to_f32();
        let c100 = img.get_unchecked(x1, y0, z0).to_f32();
        let c010 = img.get_unchecked(x0, y1, z0).to_f32();
        let c110 = img.get_unchecked(x1, y1, z0).to_f32();
        let c001 = img.get_unchecked(x0, y0, z1).to_f32();
        let c101 = img.get_unchecked(x1, y0, z1).to_f32();
        let c011 = img.get_unchecked(x0, y1, z1).to_f32();
        let c111 = img.get_unchecked(x1, y1, z1).to_f32();

        let c00 = c000 * (1.0 - tx) + c100 * tx;
        let c10 = c010 * (1.0 - tx) + c110 * tx;
        let c01 = c001 * (1.0 - tx) + c101 * tx;
        let c11 = c011 * (1.0 - tx) + c111 * tx;
        let c0 = c00 * (1.0 - ty) + c10 * ty;
        let c1 = c01 * (1.0 - ty) + c11 * ty;
        c0 * (1.0 - tz) + c1 * tz
    }
}

/// Cubic B-spline: basis-weighted sum over the 4³ coefficient
/// neighborhood anchored at ⌊ci⌋ − 1 per axis, edge-clamped.
pub fn sample_bspline(coefficients: &[f32], size: [u32; 3], ci: Vector3<f32>) -> f32 {
    let fx = ci.x.floor();
    let fy = ci.y.floor();
    let fz = ci.z.floor();
    let wx = cubic_weights(ci.x - fx);
    let wy = cubic_weights(ci.y - fy);
    let wz = cubic_weights(ci.z - fz);

    let (w, h) = (size[0] as usize, size[1] as usize);
    let mut acc = 0.0f32;
    for (kz, &wkz) in wz.iter().enumerate() {
        let z = clamp_index(fz as i64 - 1 + kz as i64, size[2]) as usize;
        for (ky, &wky) in wy.iter().enumerate() {
            let y = clamp_index(fy as i64 - 1 + ky as i64, size[1]) as usize;
            let wyz = wky * wkz;
            let row = w * (y + h * z);
            for (kx, &wkx) in wx.iter().enumerate() {
                let x = clamp_index(fx as i64 - 1 + kx as i64, size[0]) as usize;
                acc += wkx * wyz * coefficients[x + row];
            }
        }
    }
    acc
}
