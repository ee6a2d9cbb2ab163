// gpu/decompose.rs — Device-side B-spline coefficient decomposition.
//
// Prepares the coefficient volume the B-spline interpolation kernel
// samples from, without round-tripping the source through host memory:
//
//   1. copy source buffer → coefficient buffer (device-to-device)
//   2. filter along x, then y, then z (decompose.wgsl, in place)
//
// Each pass dispatches one invocation per line; the recursion along a
// line is serial, the lines are independent. Passes are encoded as
// separate compute passes in one command buffer, so wgpu orders the
// read-after-write hazards between axes.
//
// The filtered buffer matches `bspline::decompose_in_place` on the same
// input up to f32 rounding — the CPU function is the reference the GPU
// tests compare against.

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};

/// Uniform block for one axis pass. Layout must match `DecomposeParams`
/// in decompose.wgsl: 32 bytes.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DecomposeParams {
    size: [u32; 4],
    axis: u32,
    num_lines: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Workgroup width of the decompose kernel; fixed in decompose.wgsl.
const LINE_WORKGROUP: u32 = 64;

/// Fill `coefficients` with the cubic-spline decomposition of `source`.
///
/// Both buffers must hold `size` voxels of f32. The copy and all three
/// filter passes are submitted in one command buffer; completion is
/// whenever the queue reaches it — callers that need the result on the
/// device only (the resample kernel) can just keep encoding against the
/// same queue.
pub fn run_decomposition(
    gpu: &GpuDevice,
    source: &wgpu::Buffer,
    coefficients: &wgpu::Buffer,
    size: [u32; 3],
) -> Result<(), GpuError> {
    let pipeline = gpu.registry.get_or_compile_decompose(&gpu.device)?;
    let layout = gpu.registry.decompose_layout();

    let total = size[0] as u64 * size[1] as u64 * size[2] as u64;
    let byte_len = total * std::mem::size_of::<f32>() as u64;

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("bspline decompose"),
        });

    encoder.copy_buffer_to_buffer(source, 0, coefficients, 0, byte_len);

    for axis in 0..3u32 {
        let num_lines = (total / size[axis as usize] as u64) as u32;
        let params = DecomposeParams {
            size: [size[0], size[1], size[2], 0],
            axis,
            num_lines,
            _pad0: 0,
            _pad1: 0,
        };
        let params_buf = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("DecomposeParams"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("decompose bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: coefficients.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("decompose axis"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(num_lines.div_ceil(LINE_WORKGROUP), 1, 1);
    }

    gpu.queue.submit(std::iter::once(encoder.finish()));
    Ok(())
}
