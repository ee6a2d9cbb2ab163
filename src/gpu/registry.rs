// gpu/registry.rs — Compiled-kernel cache.
//
// Device program compilation is the expensive part of first dispatch
// (WGSL parse + backend codegen + driver compile), so compiled pipelines
// are cached per `KernelKey` and shared by every orchestrator on the
// same device context. Two lookups with the same key return the same
// `Arc` — pointer equality is the cache-hit contract and is what the
// tests assert.
//
// SOURCE ASSEMBLY:
// There is one WGSL template (resample.wgsl) with splice points for the
// transform and interpolator functions. The registry substitutes the
// matching snippet per key plus the workgroup dimensions, the same
// string-substitution scheme the shader sources document. The
// specialized source is what gets compiled — no runtime branching on
// kind inside the kernel.
//
// FAILURE:
// Compilation errors are captured via a wgpu validation error scope and
// surfaced as `GpuError::KernelCompilation`. Nothing is inserted into
// the cache on failure, and there is deliberately no CPU fallback — a
// benchmark that silently fell back would report fiction.
//
// LOCKING:
// Lookups take a read lock; compilation takes the write lock and
// re-checks (double-checked insert), so concurrent requests for one key
// compile exactly once. Compiles of distinct keys also serialize, which
// is harmless: there are at most 2×3 resample keys per pixel format.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::gpu::device::{GpuError, WorkgroupSize};
use crate::image::PixelFormat;
use crate::interpolation::InterpolatorKind;
use crate::transform::TransformKind;

/// Cache identity of one specialized resample kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub transform: TransformKind,
    pub interpolator: InterpolatorKind,
    pub pixel: PixelFormat,
    /// Image dimensionality. This engine compiles 3-D kernels only, but
    /// the field stays in the key so a future 2-D specialization cannot
    /// collide with cached 3-D programs.
    pub dims: u32,
}

/// An opaque handle to a compiled device program. Cloning is cheap;
/// handle identity (Arc pointer) identifies the cached program.
pub type KernelHandle = Arc<wgpu::ComputePipeline>;

pub struct KernelRegistry {
    resample_layout: wgpu::BindGroupLayout,
    decompose_layout: wgpu::BindGroupLayout,
    kernels: RwLock<HashMap<KernelKey, KernelHandle>>,
    decompose: Mutex<Option<KernelHandle>>,
}

impl KernelRegistry {
    /// Create an empty registry with the fixed bind group layouts.
    ///
    /// Every resample kernel shares one layout (source, dest, params,
    /// transform block) regardless of specialization; likewise all
    /// decomposition passes.
    pub fn new(device: &wgpu::Device) -> Self {
        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let resample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rewarp resample BGL"),
            entries: &[
                storage_entry(0, true),  // source samples / coefficients
                storage_entry(1, false), // dest
                uniform_entry(2),        // Params
                storage_entry(3, true),  // transform block
            ],
        });

        let decompose_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rewarp decompose BGL"),
            entries: &[
                storage_entry(0, false), // coefficients, filtered in place
                uniform_entry(1),        // DecomposeParams
            ],
        });

        KernelRegistry {
            resample_layout,
            decompose_layout,
            kernels: RwLock::new(HashMap::new()),
            decompose: Mutex::new(None),
        }
    }

    pub fn resample_layout(&self) -> &wgpu::BindGroupLayout {
        &self.resample_layout
    }

    pub fn decompose_layout(&self) -> &wgpu::BindGroupLayout {
        &self.decompose_layout
    }

    /// Number of compiled resample kernels currently cached.
    pub fn cached_kernels(&self) -> usize {
        self.kernels.read().expect("registry lock poisoned").len()
    }

    /// Look up or compile the resample kernel for `key`.
    ///
    /// O(1) on a hit. On a miss, compiles under the write lock so a
    /// racing request for the same key waits and then hits the cache.
    pub fn get_or_compile(
        &self,
        device: &wgpu::Device,
        workgroup: WorkgroupSize,
        key: KernelKey,
    ) -> Result<KernelHandle, GpuError> {
        if let Some(handle) = self
            .kernels
            .read()
            .expect("registry lock poisoned")
            .get(&key)
        {
            return Ok(Arc::clone(handle));
        }

        let mut kernels = self.kernels.write().expect("registry lock poisoned");
        // Double-check: another thread may have compiled while we
        // waited for the write lock.
        if let Some(handle) = kernels.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let source = assemble_resample_source(key, workgroup)?;
        let label = format!(
            "resample {} {} {} {}d",
            key.transform, key.interpolator, key.pixel, key.dims
        );
        let pipeline = compile(device, &self.resample_layout, &source, &label, "resample")?;
        let handle: KernelHandle = Arc::new(pipeline);
        kernels.insert(key, Arc::clone(&handle));
        eprintln!("[rewarp] compiled kernel: {label}");
        Ok(handle)
    }

    /// Look up or compile the coefficient-decomposition kernel. One
    /// program serves all three axis passes (the axis is a uniform).
    pub fn get_or_compile_decompose(
        &self,
        device: &wgpu::Device,
    ) -> Result<KernelHandle, GpuError> {
        let mut slot = self.decompose.lock().expect("registry lock poisoned");
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }
        let source = include_str!("../shaders/decompose.wgsl");
        let pipeline = compile(
            device,
            &self.decompose_layout,
            source,
            "bspline decompose",
            "decompose",
        )?;
        let handle: KernelHandle = Arc::new(pipeline);
        *slot = Some(Arc::clone(&handle));
        eprintln!("[rewarp] compiled kernel: bspline decompose");
        Ok(handle)
    }
}

/// Splice the variant snippets and workgroup dimensions into the
/// resample template.
///
/// The pixel format does not change the source — device arithmetic is
/// always f32 — but distinct formats still get distinct cache entries
/// via the key.
fn assemble_resample_source(key: KernelKey, workgroup: WorkgroupSize) -> Result<String, GpuError> {
    if key.dims != 3 {
        return Err(GpuError::KernelCompilation(format!(
            "no {}-d kernel specialization exists (3-d only)",
            key.dims
        )));
    }

    let transform_fn = match key.transform {
        TransformKind::Affine => include_str!("../shaders/transform_affine.wgsl"),
        TransformKind::BSpline => include_str!("../shaders/transform_bspline.wgsl"),
    };
    let interp_fn = match key.interpolator {
        InterpolatorKind::NearestNeighbor => include_str!("../shaders/interp_nearest.wgsl"),
        InterpolatorKind::Linear => include_str!("../shaders/interp_linear.wgsl"),
        InterpolatorKind::BSpline => include_str!("../shaders/interp_bspline.wgsl"),
    };

    Ok(include_str!("../shaders/resample.wgsl")
        .replace("{{TRANSFORM_FN}}", transform_fn)
        .replace("{{INTERP_FN}}", interp_fn)
        .replace("{{WG_X}}", &workgroup.x.to_string())
        .replace("{{WG_Y}}", &workgroup.y.to_string())
        .replace("{{WG_Z}}", &workgroup.z.to_string()))
}

/// Compile one WGSL source into a compute pipeline, converting wgpu
/// validation errors into `KernelCompilation`.
fn compile(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    source: &str,
    label: &str,
    entry_point: &str,
) -> Result<wgpu::ComputePipeline, GpuError> {
    // wgpu reports WGSL and pipeline validation failures through error
    // scopes rather than return values; everything between push and pop
    // is attributed to this compilation.
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(GpuError::KernelCompilation(format!("{label}: {err}")));
    }
    Ok(pipeline)
}
