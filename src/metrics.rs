// metrics.rs — Output comparison for the CPU/GPU harness.

use crate::image::{Image3, Pixel};

/// Root-mean-square error between two equally-sized volumes.
///
/// # Panics
/// Panics if the voxel counts differ — comparing volumes of different
/// geometry is a harness bug, not a measurable error.
pub fn rmse<T: Pixel>(a: &Image3<T>, b: &Image3<T>) -> f64 {
    assert_eq!(
        a.num_voxels(),
        b.num_voxels(),
        "RMSE requires equally-sized volumes ({} vs {})",
        a.num_voxels(),
        b.num_voxels(),
    );
    let sum: f64 = a
        .as_slice()
        .iter()
        .zip(b.as_slice().iter())
        .map(|(&x, &y)| {
            let err = x.to_f32() as f64 - y.to_f32() as f64;
            err * err
        })
        .sum();
    (sum / a.num_voxels() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ImageGeometry;
    use nalgebra::Vector3;

    fn volume(data: Vec<i16>) -> Image3<i16> {
        let n = data.len() as u32;
        Image3::from_vec(
            ImageGeometry::new([n, 1, 1], Vector3::new(1.0, 1.0, 1.0), Vector3::zeros()),
            data,
        )
    }

    #[test]
    fn test_rmse_identical_is_zero() {
        let a = volume(vec![1, -2, 3, 4]);
        assert_eq!(rmse(&a, &a.clone()), 0.0);
    }

    #[test]
    fn test_rmse_known_value() {
        let a = volume(vec![0, 0, 0, 0]);
        let b = volume(vec![2, -2, 2, -2]);
        assert!((rmse(&a, &b) - 2.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "equally-sized")]
    fn test_rmse_size_mismatch() {
        let a = volume(vec![0, 0]);
        let b = volume(vec![0, 0, 0]);
        let _ = rmse(&a, &b);
    }
}
