// image.rs — Runtime-sized volume container, generic over sample type.
//
// `Image3<T>` is a flat, x-fastest (row-major in 3-D) sample buffer plus
// the `ImageGeometry` that places it in physical space:
//
//   linear index = x + width · (y + height · z)
//
// where (x, y, z) are *buffer-local* offsets in [0, size). The
// geometry's start index only matters when converting to and from
// physical coordinates; the buffer itself is always dense with no
// padding — device storage buffers have no row-alignment requirement,
// so the host layout and the device layout are element-compatible after
// sample conversion.
//
// Device kernels compute in f32 regardless of the host sample type, so
// the `Pixel` trait carries raw (not normalized) conversions in both
// directions: i16 -203 → f32 -203.0 → i16 -203.

use crate::geometry::ImageGeometry;
use nalgebra::Vector3;
use std::fmt;

// ---------------------------------------------------------------------------
// Pixel trait
// ---------------------------------------------------------------------------

/// Sample formats a kernel can be specialized for. Part of the kernel
/// cache key: two volumes with different host sample types must never
/// share a compiled program entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    U8,
    I16,
    F32,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::U8 => write!(f, "u8"),
            PixelFormat::I16 => write!(f, "i16"),
            PixelFormat::F32 => write!(f, "f32"),
        }
    }
}

/// Trait for types that can serve as sample values in an `Image3`.
///
/// `to_f32`/`from_f32` are raw conversions — integer sample values map
/// to the same numeric value in f32, with clamping and rounding on the
/// way back. Signed 16-bit is the native format of most CT/MR volumes.
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    const FORMAT: PixelFormat;

    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    const FORMAT: PixelFormat = PixelFormat::U8;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for i16 {
    const FORMAT: PixelFormat = PixelFormat::I16;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(i16::MIN as f32, i16::MAX as f32).round() as i16
    }
}

impl Pixel for f32 {
    const FORMAT: PixelFormat = PixelFormat::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Image3<T>
// ---------------------------------------------------------------------------

/// A 3-D volume with runtime dimensions, generic over sample type `T`.
pub struct Image3<T: Pixel> {
    geometry: ImageGeometry,
    /// Sample data, x-fastest. Length = size[0] · size[1] · size[2].
    data: Vec<T>,
}

impl<T: Pixel> Clone for Image3<T> {
    // Deep copy of the heap buffer; potentially hundreds of MiB for a
    // full CT volume, so kept explicit rather than derived.
    fn clone(&self) -> Self {
        Image3 {
            geometry: self.geometry.clone(),
            data: self.data.clone(),
        }
    }
}

impl<T: Pixel> Image3<T> {
    /// Zero-initialized volume with the given geometry.
    pub fn new(geometry: ImageGeometry) -> Self {
        let n = geometry.num_voxels();
        Image3 {
            geometry,
            data: vec![T::default(); n],
        }
    }

    /// Volume from an existing sample vector.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the geometry's voxel count.
    pub fn from_vec(geometry: ImageGeometry, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            geometry.num_voxels(),
            "sample count ({}) must match geometry ({} voxels)",
            data.len(),
            geometry.num_voxels(),
        );
        Image3 { geometry, data }
    }

    #[inline]
    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    #[inline]
    pub fn size(&self) -> [u32; 3] {
        self.geometry.size
    }

    #[inline]
    pub fn num_voxels(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn linear(&self, x: u32, y: u32, z: u32) -> usize {
        let [w, h, _] = self.geometry.size;
        x as usize + w as usize * (y as usize + h as usize * z as usize)
    }

    /// Sample at buffer-local (x, y, z).
    ///
    /// # Panics
    /// Panics if the offset is out of bounds.
    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> T {
        self.bounds_check(x, y, z);
        self.data[self.linear(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, z: u32, value: T) {
        self.bounds_check(x, y, z);
        let idx = self.linear(x, y, z);
        self.data[idx] = value;
    }

    /// Sample without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee x/y/z are within the volume size. Used in
    /// the interpolation inner loops where neighbor offsets are clamped
    /// before fetching.
    #[inline(always)]
    pub unsafe fn get_unchecked(&self, x: u32, y: u32, z: u32) -> T {
        debug_assert!(
            x < self.geometry.size[0] && y < self.geometry.size[1] && z < self.geometry.size[2],
            "get_unchecked({x},{y},{z}) out of bounds for {:?}",
            self.geometry.size
        );
        *self.data.get_unchecked(self.linear(x, y, z))
    }

    /// Physical position of the voxel at buffer-local (x, y, z).
    #[inline]
    pub fn voxel_to_physical(&self, x: u32, y: u32, z: u32) -> Vector3<f32> {
        let s = self.geometry.start_index;
        self.geometry.index_to_physical(Vector3::new(
            x as f32 + s[0] as f32,
            y as f32 + s[1] as f32,
            z as f32 + s[2] as f32,
        ))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Convert all samples to f32, the device compute format.
    pub fn samples_to_f32(&self) -> Vec<f32> {
        self.data.iter().map(|&v| v.to_f32()).collect()
    }

    /// Overwrite all samples from an f32 slice (device readback).
    ///
    /// # Panics
    /// Panics on length mismatch.
    pub fn fill_from_f32(&mut self, samples: &[f32]) {
        assert_eq!(
            samples.len(),
            self.data.len(),
            "readback length ({}) must match voxel count ({})",
            samples.len(),
            self.data.len(),
        );
        for (dst, &src) in self.data.iter_mut().zip(samples.iter()) {
            *dst = T::from_f32(src);
        }
    }

    /// Iterate over all samples as `(x, y, z, value)` tuples, x-fastest.
    pub fn voxels(&self) -> impl Iterator<Item = (u32, u32, u32, T)> + '_ {
        let [w, h, d] = self.geometry.size;
        (0..d).flat_map(move |z| {
            (0..h).flat_map(move |y| {
                (0..w).map(move |x| (x, y, z, self.data[self.linear(x, y, z)]))
            })
        })
    }

    #[inline]
    fn bounds_check(&self, x: u32, y: u32, z: u32) {
        let [w, h, d] = self.geometry.size;
        assert!(
            x < w && y < h && z < d,
            "voxel ({x},{y},{z}) out of bounds for volume {w}×{h}×{d}"
        );
    }
}

impl<T: Pixel + fmt::Debug> fmt::Debug for Image3<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [w, h, d] = self.geometry.size;
        write!(
            f,
            "Image3<{}> {{ {}×{}×{}, spacing {:?}, origin {:?} }}",
            std::any::type_name::<T>(),
            w,
            h,
            d,
            self.geometry.spacing,
            self.geometry.origin,
        )
    }
}
