// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Probe for device availability (`is_gpu_available`) — callers must
//     check before constructing anything; a missing device is a hard
//     startup failure, never a silent CPU fallback.
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Own the process-wide kernel registry. The registry's lifetime is
//     the device context's lifetime: dropping and recreating `GpuDevice`
//     discards every cached pipeline with it.
//   - Provide `WorkgroupSize` — a 3-D workgroup configuration validated
//     against the device limits and used when specializing kernels.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe where the software renderer appears as a
// valid Vulkan device. We enumerate explicitly and prefer real hardware,
// falling back to whatever exists (the adapter name is logged so the
// operator can tell).

use std::fmt;

use crate::gpu::registry::KernelRegistry;

/// A workgroup size configuration for 3-D compute dispatches.
///
/// The product of the three dimensions must not exceed the device's
/// `max_compute_invocations_per_workgroup` limit.
///
/// The default 8×8×4 = 256 invocations fits every Vulkan implementation
/// wgpu targets (256 is the minimum any driver may report for the
/// limit) and keeps the x-dimension wide enough for coalesced reads of
/// x-fastest volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x · y · z).
    pub fn total(&self) -> u32 {
        self.x * self.y * self.z
    }

    fn default_3d() -> Self {
        WorkgroupSize { x: 8, y: 8, z: 4 }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}×{}×{} ({} invocations)",
            self.x,
            self.y,
            self.z,
            self.total()
        )
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// Pre-flight availability probe: does any Vulkan adapter exist?
///
/// Cheap enough to call once at startup. A `false` here means no
/// orchestrator can be constructed — callers should abort with a clear
/// message rather than quietly running CPU-only.
pub fn is_gpu_available() -> bool {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        flags: wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER,
        ..Default::default()
    });
    !instance.enumerate_adapters(wgpu::Backends::VULKAN).is_empty()
}

/// The core GPU context: adapter, device, queue, and the kernel
/// registry bound to them.
///
/// Create via `GpuDevice::new()`. Hold one `GpuDevice` for the lifetime
/// of the application — it is expensive to create (Vulkan instance +
/// device initialization) and every orchestrator borrows it per call.
///
/// # Field drop order
/// Rust drops struct fields in declaration order (top → bottom).
/// `_instance` is declared last so the `wgpu::Instance` outlives
/// `device` and `queue`; some Vulkan layers crash when the instance is
/// destroyed while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    /// Compiled-kernel cache. Shared by every orchestrator using this
    /// context; discarded with it.
    pub registry: KernelRegistry,
    /// Keeps the `wgpu::Instance` alive until `device` and `queue` are
    /// dropped. Never accessed directly.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` using the best available Vulkan adapter.
    ///
    /// # Errors
    /// `GpuError::DeviceUnavailable` when no adapter exists;
    /// `GpuError::DeviceRequest` when device creation fails.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        // Compute-only workload: Vulkan backend, no surface. The
        // noncompliant-adapter flag lets layered implementations
        // (e.g. D3D12-to-Vulkan) through; they run storage-buffer
        // compute fine.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::DeviceUnavailable);
        }

        for a in &all_adapters {
            let info = a.get_info();
            eprintln!(
                "[rewarp] Vulkan adapter: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type
            );
        }

        // Tier 1: real hardware. Tier 2: take whatever exists, even a
        // software rasterizer — the name was logged above.
        let adapter = all_adapters
            .into_iter()
            .find(|a| {
                matches!(
                    a.get_info().device_type,
                    wgpu::DeviceType::DiscreteGpu
                        | wgpu::DeviceType::IntegratedGpu
                        | wgpu::DeviceType::VirtualGpu
                        | wgpu::DeviceType::Other
                )
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::DeviceUnavailable)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rewarp"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        let registry = KernelRegistry::new(&device);

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::default_3d(),
            registry,
            _instance: instance,
        })
    }

    /// Override the default workgroup size, validated against the
    /// device's invocation limit.
    ///
    /// Cached kernels are specialized for the workgroup size at compile
    /// time, so this must be called before the first dispatch; changing
    /// it afterwards would require a fresh device context.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32, z: u32) -> Result<(), GpuError> {
        let total = x * y * z;
        let max = self.device.limits().max_compute_invocations_per_workgroup;
        if total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y, z };
        Ok(())
    }

    /// Workgroup counts needed to cover an output volume of the given
    /// size, by ceiling division per axis.
    ///
    /// The kernel must guard against out-of-bounds global IDs — the last
    /// workgroup along each axis overhangs unless the size is an exact
    /// multiple.
    pub fn dispatch_size(&self, size: [u32; 3]) -> (u32, u32, u32) {
        let ws = self.workgroup_size;
        (
            size[0].div_ceil(ws.x),
            size[1].div_ceil(ws.y),
            size[2].div_ceil(ws.z),
        )
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {} }}",
            self.adapter_info, self.workgroup_size
        )
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from the GPU execution path.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found. Fatal at startup — there is no CPU
    /// fallback on this path by design.
    DeviceUnavailable,
    /// wgpu device request failed (driver issue, unsupported limits).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Requested workgroup size exceeds the device invocation limit.
    WorkgroupTooLarge { total: u32, max: u32 },
    /// Device program compilation failed for one kernel configuration.
    /// Fatal for that configuration; the caller may retry with a
    /// different transform/interpolator pair or abort.
    KernelCompilation(String),
    /// The device rejected or failed a dispatch. Output buffer contents
    /// are undefined for that run.
    Dispatch(String),
    /// Host read attempted while the output buffer is device-dirty.
    /// Call `sync` first — synchronization is explicit and mandatory.
    OutputNotSynchronized,
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::DeviceUnavailable => write!(
                f,
                "no Vulkan adapter found (check that Vulkan is installed and \
                 `vulkaninfo` lists a device)"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::WorkgroupTooLarge { total, max } => write!(
                f,
                "workgroup size {total} exceeds device limit of {max} invocations"
            ),
            GpuError::KernelCompilation(msg) => {
                write!(f, "kernel compilation failed: {msg}")
            }
            GpuError::Dispatch(msg) => write!(f, "kernel dispatch failed: {msg}"),
            GpuError::OutputNotSynchronized => write!(
                f,
                "output buffer is device-dirty; call sync() before reading on the host"
            ),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Pure tests run everywhere; tests that need an actual Vulkan
    // device are behind `#[ignore]` so `cargo test` passes in CI.
    // Run with: cargo test -- --include-ignored

    #[test]
    fn test_workgroup_total() {
        let ws = WorkgroupSize { x: 8, y: 8, z: 4 };
        assert_eq!(ws.total(), 256);
        assert_eq!(WorkgroupSize::default_3d().total(), 256);
    }

    #[test]
    fn test_dispatch_size_covers_volume() {
        // dispatch_size is a pure function of the workgroup config;
        // exercise the ceiling division without a device.
        let ws = WorkgroupSize::default_3d();
        let cover = |size: [u32; 3]| {
            (
                size[0].div_ceil(ws.x),
                size[1].div_ceil(ws.y),
                size[2].div_ceil(ws.z),
            )
        };
        assert_eq!(cover([64, 64, 32]), (8, 8, 8));
        // Non-multiples round up; the kernel guards the overhang.
        assert_eq!(cover([65, 63, 1]), (9, 8, 1));
        assert_eq!(cover([1, 1, 1]), (1, 1, 1));
    }

    #[test]
    #[ignore = "requires a Vulkan GPU"]
    fn test_device_init() {
        assert!(is_gpu_available(), "probe should see an adapter");
        let gpu = GpuDevice::new().expect("should initialise a Vulkan device");
        println!("{gpu}");
    }

    #[test]
    #[ignore = "requires a Vulkan GPU"]
    fn test_workgroup_size_validation() {
        let mut gpu = GpuDevice::new().unwrap();
        // 256 invocations is the guaranteed minimum limit — always valid.
        gpu.set_workgroup_size(16, 16, 1).expect("256 should fit");
        // Absurd size must be rejected.
        let err = gpu.set_workgroup_size(1024, 1024, 64).unwrap_err();
        assert!(matches!(err, GpuError::WorkgroupTooLarge { .. }));
    }
}
