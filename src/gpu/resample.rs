// gpu/resample.rs — GPU resample orchestrator and explicit sync gate.
//
// Mirrors the CPU `ResampleFilter` in resample.rs; that implementation
// is the correctness reference and the two paths carry out the same
// arithmetic per output voxel. This one owns the device-side state:
//
//   input/output/coefficient DeviceBuffers   (gpu/buffer.rs)
//   the kernel looked up per configuration   (gpu/registry.rs)
//   a state machine over the run lifecycle:
//
//     Configured ──dispatch──► Dispatched ──ok──► Complete
//         ▲                        │
//         │ mark_modified          └──error──► Failed
//         └──── (any state)
//
// `dispatch` is a blocking call: it submits the kernel (preceded by the
// coefficient decomposition when the B-spline interpolator's
// coefficients are stale) and waits for the device, which keeps repeat
// timing measurements honest. On success the output buffer is
// DeviceDirty — host-side output access stays refused until `sync`
// downloads it. Synchronization is deliberately explicit and mandatory;
// there is no lazy download on first read.
//
// Coefficient staleness is tracked by generation: `mark_modified` bumps
// the input generation, and dispatch re-runs the device decomposition
// whenever the coefficient generation lags. Skipping that re-run would
// silently sample outdated coefficients — a correctness bug, which is
// why the generation check is the one piece of bookkeeping dispatch
// never skips.

use wgpu::util::DeviceExt;

use crate::geometry::ImageGeometry;
use crate::gpu::buffer::{Coherence, DeviceBuffer};
use crate::gpu::decompose::run_decomposition;
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::registry::KernelKey;
use crate::image::{Image3, Pixel};
use crate::interpolation::InterpolatorKind;
use crate::transform::Transform;

/// Lifecycle of one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    /// Geometry, transform and interpolator are bound; no device work
    /// has happened since construction or the last `mark_modified`.
    Configured,
    /// A dispatch is executing (transient — `dispatch` blocks).
    Dispatched,
    /// The last dispatch finished; output is device-resident.
    Complete,
    /// The last dispatch failed; output contents are undefined.
    Failed,
}

/// Uniform block for the resample kernel. Layout must match `Params`
/// in resample.wgsl: 144 bytes.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ResampleParams {
    out_size: [u32; 4],
    in_size: [u32; 4],
    o2p: [[f32; 4]; 3],
    p2i: [[f32; 4]; 3],
    default_value: f32,
    _pad: [f32; 3],
}

/// GPU resample orchestrator: configure once, `dispatch` + `sync` per
/// run.
///
/// Owns its input and output volumes and their device mirrors. Buffers
/// are created lazily on first dispatch and live until the orchestrator
/// drops or `sync(.., release_device_memory: true)` frees them.
pub struct GpuResampleFilter<T: Pixel> {
    input: Image3<T>,
    output: Image3<T>,
    default_value: f32,
    transform: Transform,
    interpolator: InterpolatorKind,
    state: FilterState,

    input_buf: DeviceBuffer,
    output_buf: DeviceBuffer,
    /// Prefiltered B-spline coefficients, device-only derived data.
    /// Validity is tracked by generation, not coherence state.
    coeff_buf: DeviceBuffer,

    /// f32 mirror of the input samples, refreshed when the host marks
    /// the input modified. What `resolve` uploads.
    input_f32: Vec<f32>,
    input_f32_stale: bool,

    /// Bumped by `mark_modified`; compared against `coeff_generation`
    /// to decide whether the decomposition must re-run.
    input_generation: u64,
    coeff_generation: Option<u64>,
}

impl<T: Pixel> GpuResampleFilter<T> {
    /// Bind input, output geometry, transform and interpolator.
    ///
    /// No device work happens here — buffers and kernels materialize on
    /// the first `dispatch`, so construction is valid even before the
    /// caller has decided which `GpuDevice` to run on.
    pub fn new(
        input: Image3<T>,
        output_geometry: ImageGeometry,
        default_value: f32,
        transform: Transform,
        interpolator: InterpolatorKind,
    ) -> Self {
        let output = Image3::new(output_geometry);
        GpuResampleFilter {
            input,
            output,
            default_value,
            transform,
            interpolator,
            state: FilterState::Configured,
            input_buf: DeviceBuffer::new("rewarp input"),
            output_buf: DeviceBuffer::new("rewarp output"),
            coeff_buf: DeviceBuffer::new("rewarp coefficients"),
            input_f32: Vec::new(),
            input_f32_stale: true,
            input_generation: 0,
            coeff_generation: None,
        }
    }

    #[inline]
    pub fn state(&self) -> FilterState {
        self.state
    }

    #[inline]
    pub fn input(&self) -> &Image3<T> {
        &self.input
    }

    /// Mutable access to the input volume. Marks the input modified —
    /// there is no way to observe whether the caller actually wrote, so
    /// handing out the reference is the modification event.
    pub fn input_mut(&mut self) -> &mut Image3<T> {
        self.mark_modified();
        &mut self.input
    }

    /// Record that the input samples changed on the host: the device
    /// copy and the B-spline coefficients are now stale, and the filter
    /// returns to `Configured` for re-dispatch.
    pub fn mark_modified(&mut self) {
        self.input_buf.mark_host_dirty();
        self.input_f32_stale = true;
        self.input_generation += 1;
        self.state = FilterState::Configured;
    }

    /// Execute the resample on the device. Blocks until the kernel
    /// completes.
    ///
    /// Re-dispatch after `mark_modified` re-uploads the input and
    /// re-runs the coefficient decomposition; re-dispatch without it
    /// reuses every resident buffer and the cached kernel, so repeat
    /// timing loops measure kernel execution, not setup.
    ///
    /// # Errors
    /// `KernelCompilation` if this configuration's program cannot be
    /// built (fatal for the configuration — no CPU fallback), or
    /// `Dispatch` if the device rejects or fails the run. Either way
    /// the filter lands in `Failed` and the output is undefined.
    pub fn dispatch(&mut self, gpu: &GpuDevice) -> Result<(), GpuError> {
        self.state = FilterState::Dispatched;
        match self.dispatch_inner(gpu) {
            Ok(()) => {
                self.output_buf.mark_device_dirty();
                self.state = FilterState::Complete;
                Ok(())
            }
            Err(e) => {
                // The kernel may have partially written the output;
                // nothing downstream may trust it.
                self.output_buf.mark_host_dirty();
                self.state = FilterState::Failed;
                Err(e)
            }
        }
    }

    fn dispatch_inner(&mut self, gpu: &GpuDevice) -> Result<(), GpuError> {
        // Kernel first: a compilation failure must leave the buffers
        // exactly as they were (consistent pre-dispatch state).
        let key = KernelKey {
            transform: self.transform.kind(),
            interpolator: self.interpolator,
            pixel: T::FORMAT,
            dims: 3,
        };
        let pipeline = gpu
            .registry
            .get_or_compile(&gpu.device, gpu.workgroup_size, key)?;
        if self.interpolator == InterpolatorKind::BSpline {
            // Pre-warm the decomposition program too, so every
            // compilation failure surfaces here, before the error scope
            // below and before any buffer is touched.
            gpu.registry.get_or_compile_decompose(&gpu.device)?;
        }

        if self.input_f32_stale || self.input_f32.is_empty() {
            self.input_f32 = self.input.samples_to_f32();
            self.input_f32_stale = false;
        }

        // Everything from here runs under one validation error scope so
        // buffer/bind/dispatch failures surface as a Dispatch error.
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let in_size = self.input.size();
        let out_size = self.output.size();

        let input_buf = self.input_buf.resolve(gpu, &self.input_f32);

        // Refresh coefficients when the bound interpolator needs them
        // and they lag the input generation (or were released).
        let source_binding: &wgpu::Buffer = if self.interpolator == InterpolatorKind::BSpline {
            let coeff_buf = self
                .coeff_buf
                .resolve_uninitialized(gpu, self.input.num_voxels());
            if self.coeff_generation != Some(self.input_generation) {
                run_decomposition(gpu, input_buf, coeff_buf, in_size)?;
                self.coeff_generation = Some(self.input_generation);
            }
            coeff_buf
        } else {
            input_buf
        };

        let output_buf = self
            .output_buf
            .resolve_uninitialized(gpu, self.output.num_voxels());

        let params = ResampleParams {
            out_size: [out_size[0], out_size[1], out_size[2], 0],
            in_size: [in_size[0], in_size[1], in_size[2], 0],
            o2p: self.output.geometry().index_to_physical_rows(),
            p2i: self.input.geometry().physical_to_index_rows(),
            default_value: self.default_value,
            _pad: [0.0; 3],
        };
        let params_buf = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("ResampleParams"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        // Copy-on-bind: the transform serializes into a fresh block per
        // dispatch, so mutating it afterwards cannot race a running
        // kernel.
        let tdata = self.transform.device_params();
        let tdata_buf = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("rewarp transform block"),
                contents: bytemuck::cast_slice(&tdata),
                usage: wgpu::BufferUsages::STORAGE,
            });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rewarp resample bind group"),
            layout: gpu.registry.resample_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: source_binding.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: tdata_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("GpuResampleFilter::dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("resample"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (dx, dy, dz) = gpu.dispatch_size(out_size);
            pass.dispatch_workgroups(dx, dy, dz);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        // Blocking wait: determinism for timing loops beats overlap.
        gpu.device.poll(wgpu::Maintain::Wait);

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(GpuError::Dispatch(err.to_string()));
        }
        Ok(())
    }

    /// The explicit synchronization gate.
    ///
    /// Downloads the output buffer into the host output volume if it is
    /// device-dirty (idempotent — a second call transfers nothing).
    /// With `include_input`, does the same for the input buffer; no
    /// kernel in this engine writes the input, so that download only
    /// triggers if a caller marked it device-dirty through some path of
    /// their own. With `release_device_memory`, frees all device
    /// allocations afterwards — the next dispatch re-resolves from host
    /// and re-runs the coefficient decomposition.
    pub fn sync(&mut self, gpu: &GpuDevice, include_input: bool, release_device_memory: bool) {
        if self.output_buf.state().needs_download() {
            let mut staging = vec![0.0f32; self.output.num_voxels()];
            self.output_buf.sync_to_host(gpu, &mut staging);
            self.output.fill_from_f32(&staging);
        }

        if include_input && self.input_buf.state().needs_download() {
            let mut staging = vec![0.0f32; self.input.num_voxels()];
            self.input_buf.sync_to_host(gpu, &mut staging);
            self.input.fill_from_f32(&staging);
            self.input_f32_stale = true;
        }

        if release_device_memory {
            self.input_buf.release();
            self.output_buf.release();
            self.coeff_buf.release();
            // Released coefficients no longer exist anywhere; force the
            // decomposition to re-run on the next dispatch.
            self.coeff_generation = None;
        }
    }

    /// The resampled volume, valid only once synchronized.
    ///
    /// # Errors
    /// `OutputNotSynchronized` while the output buffer is device-dirty
    /// (call `sync` first), or `Dispatch` if the last dispatch failed —
    /// never stale data.
    pub fn output(&self) -> Result<&Image3<T>, GpuError> {
        if self.state == FilterState::Failed {
            return Err(GpuError::Dispatch(
                "previous dispatch failed; output is undefined".into(),
            ));
        }
        if self.output_buf.state() == Coherence::DeviceDirty {
            return Err(GpuError::OutputNotSynchronized);
        }
        Ok(&self.output)
    }
}

/// Free-function form of the synchronization gate, for call sites that
/// read like a pipeline: run, sync, compare.
pub fn explicit_sync<T: Pixel>(
    gpu: &GpuDevice,
    filter: &mut GpuResampleFilter<T>,
    include_input: bool,
    release_device_memory: bool,
) {
    filter.sync(gpu, include_input, release_device_memory);
}

// ============================================================
// Tests
// ============================================================
