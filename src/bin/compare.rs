// compare.rs — CPU vs GPU resample comparison harness.
//
// Runs the same resample configuration through the CPU reference filter
// and the GPU orchestrator, `--runs` times each, and reports per-run
// mean wall time plus the RMSE between the two outputs. Exits nonzero
// when the RMSE exceeds the tolerance — the harness is a correctness
// gate first, a benchmark second.
//
//   rewarp-compare --interpolator bspline --transform affine
//   rewarp-compare -t bspline -p displacements.txt
//
// The input is a synthetic structured volume (gradient + bright blocks)
// rather than a file — decoding is someone else's job; the engine under
// test starts at host memory. Output geometry derives from the input's
// by jittering spacing, origin and size by a per-axis factor in
// [0.9, 1.1], seeded for reproducibility.

use clap::{Parser, ValueEnum};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use rewarp::geometry::ImageGeometry;
use rewarp::gpu::{explicit_sync, is_gpu_available, GpuDevice, GpuResampleFilter};
use rewarp::image::Image3;
use rewarp::interpolation::InterpolatorKind;
use rewarp::metrics::rmse;
use rewarp::params::load_broadcast_parameters;
use rewarp::resample::ResampleFilter;
use rewarp::transform::{AffineTransform, BSplineTransform, Transform};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InterpolatorArg {
    NearestNeighbor,
    Linear,
    Bspline,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransformArg {
    Affine,
    Bspline,
}

#[derive(Parser, Debug)]
#[command(
    name = "rewarp-compare",
    about = "Compare the CPU and GPU resample pipelines (timing + RMSE)"
)]
struct Args {
    /// Interpolator to bind on both paths.
    #[arg(short, long, value_enum, default_value_t = InterpolatorArg::NearestNeighbor)]
    interpolator: InterpolatorArg,

    /// Transform to bind on both paths.
    #[arg(short, long, value_enum, default_value_t = TransformArg::Affine)]
    transform: TransformArg,

    /// Control-point displacement file for the B-spline transform:
    /// one decimal per control node, broadcast across the three axes.
    /// Omitted: a smooth synthetic displacement field is generated.
    #[arg(short, long)]
    parameters: Option<PathBuf>,

    /// Input volume size, voxels per axis.
    #[arg(long, num_args = 3, default_values_t = [96usize, 80, 64])]
    size: Vec<usize>,

    /// Timed repetitions per path.
    #[arg(short, long, default_value_t = 5)]
    runs: u32,

    /// RMSE tolerance for the pass/fail verdict.
    #[arg(long, default_value_t = 0.03)]
    epsilon: f64,

    /// Seed for the output-geometry jitter.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Synthetic structured volume: intensity gradient plus bright blocks,
/// textured enough that every interpolator produces distinct values.
fn make_volume(size: [u32; 3]) -> Image3<i16> {
    let geometry = ImageGeometry::new(
        size,
        Vector3::new(1.1, 0.9, 1.3),
        Vector3::new(-12.0, 4.0, 7.5),
    );
    let mut img = Image3::new(geometry);
    let [w, h, d] = size;
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let base = (x * 300 / w) as i16 + (y * 90 / h) as i16 + (z * 150 / d) as i16;
                img.set(x, y, z, base - 200);
            }
        }
    }
    for block in 0..5u32 {
        let bx = (w / 6) * (block + 1) % w;
        let by = (h / 5) * (block + 1) % h;
        let bz = (d / 4) * (block % 3) % d;
        for z in bz..(bz + d / 5 + 1).min(d) {
            for y in by..(by + h / 6 + 1).min(h) {
                for x in bx..(bx + w / 7 + 1).min(w) {
                    img.set(x, y, z, 500 + 40 * block as i16);
                }
            }
        }
    }
    img
}

/// Output geometry: the input's, jittered per axis by [0.9, 1.1].
fn jittered_output_geometry(input: &ImageGeometry, rng: &mut StdRng) -> ImageGeometry {
    let mut spacing = input.spacing;
    let mut origin = input.origin;
    let mut size = input.size;
    for axis in 0..3 {
        spacing[axis] *= rng.gen_range(0.9..1.1);
        origin[axis] *= rng.gen_range(0.9..1.1);
        size[axis] = (size[axis] as f64 * rng.gen_range(0.9..1.1)).round() as u32;
    }
    ImageGeometry::with_direction(size, input.start_index, spacing, origin, input.direction)
}

fn build_transform(args: &Args, input_geometry: &ImageGeometry) -> Result<Transform, String> {
    match args.transform {
        TransformArg::Affine => Ok(Transform::Affine(AffineTransform::from_parameters(&[
            1.03, 0.2, 0.0, //
            -0.21, 1.12, 0.3, //
            0.0, 0.01, 0.8, //
            -10.0, 5.1, 0.0,
        ]))),
        TransformArg::Bspline => {
            let mut t = BSplineTransform::over_image([4, 4, 4], input_geometry);
            let nodes = t.grid_len();
            let params = match &args.parameters {
                Some(path) => load_broadcast_parameters(path, nodes)
                    .map_err(|e| format!("cannot load {}: {e}", path.display()))?,
                None => {
                    // Smooth synthetic field: a few millimetres of
                    // low-frequency displacement.
                    let mut p = vec![0.0f32; 3 * nodes];
                    for (i, v) in p.iter_mut().enumerate() {
                        *v = (((i % nodes) as f32) * 0.37).sin() * 2.5;
                    }
                    p
                }
            };
            t.set_parameters(&params);
            Ok(Transform::BSpline(t))
        }
    }
}

fn interpolator_kind(arg: InterpolatorArg) -> InterpolatorKind {
    match arg {
        InterpolatorArg::NearestNeighbor => InterpolatorKind::NearestNeighbor,
        InterpolatorArg::Linear => InterpolatorKind::Linear,
        InterpolatorArg::Bspline => InterpolatorKind::BSpline,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.runs == 0 {
        eprintln!("[rewarp] ERROR: --runs must be at least 1");
        return ExitCode::FAILURE;
    }

    // Pre-flight: no device, no comparison. Never a silent CPU-only run.
    if !is_gpu_available() {
        eprintln!("[rewarp] ERROR: no compute-capable GPU is present");
        return ExitCode::FAILURE;
    }

    let size = [
        args.size[0] as u32,
        args.size[1] as u32,
        args.size[2] as u32,
    ];
    let input = make_volume(size);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let out_geometry = jittered_output_geometry(input.geometry(), &mut rng);

    let transform = match build_transform(&args, input.geometry()) {
        Ok(t) => t,
        Err(msg) => {
            eprintln!("[rewarp] ERROR: {msg}");
            return ExitCode::FAILURE;
        }
    };
    let interpolator = interpolator_kind(args.interpolator);

    println!("Comparing the resample pipeline, CPU vs GPU:");
    println!("CPU/GPU transform interpolator #threads time RMSE");

    // --- CPU reference path ---
    let cpu_filter = ResampleFilter::new(
        out_geometry.clone(),
        -1.0,
        transform.clone(),
        interpolator,
    );
    let cpu_start = Instant::now();
    let mut cpu_output = cpu_filter.update(&input);
    for _ in 1..args.runs {
        cpu_output = cpu_filter.update(&input);
    }
    let cpu_mean = cpu_start.elapsed().as_secs_f64() / args.runs as f64;
    println!(
        "CPU {} {} {} {cpu_mean:.4}",
        transform.kind(),
        interpolator,
        rayon::current_num_threads(),
    );

    // --- GPU path ---
    let gpu = match GpuDevice::new() {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("[rewarp] ERROR: device initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    eprintln!("[rewarp] {gpu}");

    let mut gpu_filter = GpuResampleFilter::new(
        input,
        out_geometry,
        -1.0,
        transform.clone(),
        interpolator,
    );

    let gpu_start = Instant::now();
    for run in 0..args.runs {
        if let Err(e) = gpu_filter.dispatch(&gpu) {
            eprintln!("[rewarp] ERROR: dispatch failed on run {run}: {e}");
            return ExitCode::FAILURE;
        }
        // Each timed run includes the download, matching what a
        // consumer of the output would pay.
        explicit_sync(&gpu, &mut gpu_filter, false, false);
    }
    let gpu_mean = gpu_start.elapsed().as_secs_f64() / args.runs as f64;

    let gpu_output = match gpu_filter.output() {
        Ok(out) => out,
        Err(e) => {
            eprintln!("[rewarp] ERROR: output unavailable: {e}");
            return ExitCode::FAILURE;
        }
    };

    let err = rmse(&cpu_output, gpu_output);
    println!(
        "GPU {} {} x {gpu_mean:.4} {err:.5}",
        transform.kind(),
        interpolator,
    );

    if err > args.epsilon {
        eprintln!(
            "[rewarp] ERROR: RMSE {err:.5} between CPU and GPU exceeds tolerance {}",
            args.epsilon
        );
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
