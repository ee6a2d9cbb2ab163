// gpu/mod.rs — device execution layer.
//
// wgpu-based compute kernels mirroring the CPU resample path in the
// parent crate. The CPU implementation remains the authoritative
// reference — the GPU orchestrator is validated against it, and the
// comparison harness reports the RMSE between the two.
//
// Layer map, leaf to root:
//
//   device.rs    — adapter selection, availability probe, workgroups;
//                  owns the kernel registry
//   buffer.rs    — host/device mirrors with Clean/HostDirty/DeviceDirty
//                  coherence tracking
//   registry.rs  — compile-once pipeline cache keyed by
//                  (transform, interpolator, pixel, dims)
//   decompose.rs — B-spline coefficient prefilter passes on the device
//   resample.rs  — the orchestrator: dispatch + explicit sync gate
//
// The boundary with the host is explicit: a dispatch leaves the output
// device-resident, and nothing reaches host memory until the caller
// syncs. All downloads go through the sync gate; there is no implicit
// transfer anywhere in this module.

pub mod buffer;
pub mod decompose;
pub mod device;
pub mod registry;
pub mod resample;

pub use buffer::{Coherence, DeviceBuffer};
pub use device::{is_gpu_available, GpuDevice, GpuError, WorkgroupSize};
pub use registry::{KernelHandle, KernelKey, KernelRegistry};
pub use resample::{explicit_sync, FilterState, GpuResampleFilter};
