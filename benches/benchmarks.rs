// benches/benchmarks.rs -- CPU resample benchmarks per configuration.
//
// Synthetic volumes only; always runnable:
//   cargo bench --bench benchmarks
//
// The GPU equivalents live in gpu_benchmarks.rs and self-skip when no
// adapter is present.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use nalgebra::Vector3;
use rewarp::geometry::ImageGeometry;
use rewarp::image::Image3;
use rewarp::interpolation::InterpolatorKind;
use rewarp::resample::ResampleFilter;
use rewarp::transform::{AffineTransform, BSplineTransform, Transform};

/// Structured synthetic volume: gradient plus bright blocks.
fn make_volume(size: [u32; 3]) -> Image3<i16> {
    let geometry = ImageGeometry::new(
        size,
        Vector3::new(1.0, 1.0, 1.2),
        Vector3::new(-10.0, 3.0, 0.0),
    );
    let mut img = Image3::new(geometry);
    let [w, h, d] = size;
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                img.set(x, y, z, (x * 255 / w) as i16 + (y * 80 / h) as i16 - (z * 60 / d) as i16);
            }
        }
    }
    img
}

fn bench_transform_group(transform: Transform, name: &str, c: &mut Criterion) {
    let input = make_volume([96, 96, 64]);
    let out_geom = ImageGeometry::new(
        [100, 90, 70],
        Vector3::new(0.95, 1.05, 1.1),
        Vector3::new(-9.0, 2.5, 0.5),
    );

    let mut group = c.benchmark_group(name);
    for interpolator in [
        InterpolatorKind::NearestNeighbor,
        InterpolatorKind::Linear,
        InterpolatorKind::BSpline,
    ] {
        let filter = ResampleFilter::new(
            out_geom.clone(),
            -1.0,
            transform.clone(),
            interpolator,
        );
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{interpolator}")),
            &filter,
            |b, filter| b.iter(|| filter.update(&input)),
        );
    }
    group.finish();
}

fn bench_affine_resample(c: &mut Criterion) {
    let transform = Transform::Affine(AffineTransform::from_parameters(&[
        1.03, 0.2, 0.0, -0.21, 1.12, 0.3, 0.0, 0.01, 0.8, -10.0, 5.1, 0.0,
    ]));
    bench_transform_group(transform, "cpu_resample/affine", c);
}

fn bench_bspline_resample(c: &mut Criterion) {
    let input_geom = ImageGeometry::new(
        [96, 96, 64],
        Vector3::new(1.0, 1.0, 1.2),
        Vector3::new(-10.0, 3.0, 0.0),
    );
    let mut t = BSplineTransform::over_image([4, 4, 4], &input_geom);
    let n = t.grid_len();
    let params: Vec<f32> = (0..3 * n).map(|i| ((i % 13) as f32 - 6.0) * 0.5).collect();
    t.set_parameters(&params);
    bench_transform_group(Transform::BSpline(t), "cpu_resample/bspline", c);
}

criterion_group!(benches, bench_affine_resample, bench_bspline_resample);
criterion_main!(benches);
