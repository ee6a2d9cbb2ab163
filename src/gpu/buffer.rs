// gpu/buffer.rs — Device-resident mirrors of host sample arrays.
//
// Each `DeviceBuffer` shadows one host image's samples as an f32
// storage buffer and tracks which side holds the truth:
//
//            resolve (upload)
//   HostDirty ────────────────► Clean ◄──────────────┐
//       ▲                         │                  │ sync_to_host
//       │ mark_host_dirty         │ mark_device_dirty│   (download)
//       └──────── any state ◄─────┴──► DeviceDirty ──┘
//
// The state machine is always-correct by construction: `resolve` is the
// only way to hand a buffer to a kernel, and it uploads exactly when the
// host side is dirty; `sync_to_host` downloads exactly when the device
// side is dirty and is idempotent. What it does NOT do is run
// automatically — a caller that reads host samples without syncing gets
// whatever the host last held. The orchestrator guards its own output
// accessor against that; anything else is on the caller.
//
// One `DeviceBuffer` exists per (image, orchestrator) pair. There is no
// sharing across orchestrators and no implicit duplication: resolving
// twice reuses the same allocation as long as the element count fits.

use crate::gpu::device::GpuDevice;

/// Which side of the host/device mirror holds the current data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coherence {
    /// Both sides agree; no transfer needed in either direction.
    Clean,
    /// Host samples changed since the last upload (or nothing was ever
    /// uploaded). The next `resolve` uploads.
    HostDirty,
    /// A kernel wrote the device side. The next `sync_to_host`
    /// downloads; host reads before that see stale data.
    DeviceDirty,
}

impl Coherence {
    /// Would `resolve` transfer data in this state?
    #[inline]
    pub fn needs_upload(self) -> bool {
        matches!(self, Coherence::HostDirty)
    }

    /// Would `sync_to_host` transfer data in this state?
    #[inline]
    pub fn needs_download(self) -> bool {
        matches!(self, Coherence::DeviceDirty)
    }
}

/// An f32 storage buffer mirroring one host sample array.
pub struct DeviceBuffer {
    buffer: Option<wgpu::Buffer>,
    /// Element (f32) capacity of the current allocation.
    len: usize,
    state: Coherence,
    label: &'static str,
}

impl DeviceBuffer {
    /// A buffer that has never been uploaded: allocation is deferred to
    /// the first `resolve`.
    pub fn new(label: &'static str) -> Self {
        DeviceBuffer {
            buffer: None,
            len: 0,
            state: Coherence::HostDirty,
            label,
        }
    }

    #[inline]
    pub fn state(&self) -> Coherence {
        self.state
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.buffer.is_some()
    }

    /// Element capacity of the device allocation (0 when not resident).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A kernel wrote this buffer: the device side is now the truth.
    pub fn mark_device_dirty(&mut self) {
        self.state = Coherence::DeviceDirty;
    }

    /// The mirrored host samples were mutated: the host side is now the
    /// truth and the next `resolve` re-uploads.
    pub fn mark_host_dirty(&mut self) {
        self.state = Coherence::HostDirty;
    }

    /// Make the buffer resident and current, uploading `host` when the
    /// host side is dirty. Returns the buffer for bind-group
    /// construction.
    ///
    /// Reallocates only when the element count changed; a same-size
    /// re-resolve after `mark_host_dirty` reuses the allocation via
    /// `queue.write_buffer`.
    pub fn resolve(&mut self, gpu: &GpuDevice, host: &[f32]) -> &wgpu::Buffer {
        self.ensure_allocated(gpu, host.len());
        if self.state.needs_upload() {
            let buffer = self.buffer.as_ref().expect("allocated above");
            gpu.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(host));
            self.state = Coherence::Clean;
        }
        self.buffer.as_ref().expect("allocated above")
    }

    /// Make the buffer resident without any upload — for outputs whose
    /// contents a kernel will fully overwrite.
    pub fn resolve_uninitialized(&mut self, gpu: &GpuDevice, len: usize) -> &wgpu::Buffer {
        self.ensure_allocated(gpu, len);
        self.buffer.as_ref().expect("allocated above")
    }

    fn ensure_allocated(&mut self, gpu: &GpuDevice, len: usize) {
        let byte_len = (len * std::mem::size_of::<f32>()) as u64;
        let needs_alloc = match &self.buffer {
            Some(_) => self.len != len,
            None => true,
        };
        if needs_alloc {
            self.buffer = Some(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(self.label),
                size: byte_len.max(4),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }));
            self.len = len;
            // Fresh allocation holds garbage; whatever the previous
            // state was, the host copy is the one that counts.
            if self.state == Coherence::Clean {
                self.state = Coherence::HostDirty;
            }
        }
    }

    /// Download into `host` if the device side is dirty; no-op and
    /// idempotent otherwise.
    ///
    /// Blocking: stalls until the GPU timeline reaches the copy. Fine
    /// for the explicit sync points this engine uses; never called on a
    /// per-voxel path.
    ///
    /// # Panics
    /// Panics if `host` does not match the resident element count, or
    /// if the buffer was never made resident while device-dirty (a
    /// state-machine bug, not a caller error).
    pub fn sync_to_host(&mut self, gpu: &GpuDevice, host: &mut [f32]) {
        if !self.state.needs_download() {
            return;
        }
        let buffer = self
            .buffer
            .as_ref()
            .expect("device-dirty buffer must be resident");
        assert_eq!(
            host.len(),
            self.len,
            "sync_to_host: host slice ({}) does not match device allocation ({})",
            host.len(),
            self.len,
        );

        let byte_len = (self.len * std::mem::size_of::<f32>()) as u64;
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rewarp readback staging"),
            size: byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("DeviceBuffer::sync_to_host"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, byte_len);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        // Map the staging buffer — async in wgpu's API, blocked on here
        // via device.poll(Wait).
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).expect("readback channel closed");
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .expect("readback map callback never fired")
            .expect("readback map failed");

        let mapped = slice.get_mapped_range();
        host.copy_from_slice(bytemuck::cast_slice(&mapped));
        drop(mapped);
        staging.unmap();

        self.state = Coherence::Clean;
    }

    /// Free the device allocation. The next `resolve` re-allocates and
    /// re-uploads from host.
    ///
    /// # Panics
    /// Panics if the buffer is device-dirty — releasing would discard
    /// data that exists nowhere else. Sync first.
    pub fn release(&mut self) {
        assert!(
            self.state != Coherence::DeviceDirty,
            "releasing a device-dirty buffer would lose data; sync_to_host first"
        );
        self.buffer = None;
        self.len = 0;
        self.state = Coherence::HostDirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The transfer paths need a device; the state machine does not.

    #[test]
    fn test_coherence_transfer_predicates() {
        assert!(Coherence::HostDirty.needs_upload());
        assert!(!Coherence::Clean.needs_upload());
        assert!(!Coherence::DeviceDirty.needs_upload());

        assert!(Coherence::DeviceDirty.needs_download());
        assert!(!Coherence::Clean.needs_download());
        assert!(!Coherence::HostDirty.needs_download());
    }

    #[test]
    fn test_new_buffer_starts_host_dirty() {
        let buf = DeviceBuffer::new("test");
        assert_eq!(buf.state(), Coherence::HostDirty);
        assert!(!buf.is_resident());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_dirty_marks_override_any_state() {
        let mut buf = DeviceBuffer::new("test");
        buf.mark_device_dirty();
        assert_eq!(buf.state(), Coherence::DeviceDirty);
        buf.mark_host_dirty();
        assert_eq!(buf.state(), Coherence::HostDirty);
    }

    #[test]
    #[should_panic(expected = "device-dirty")]
    fn test_release_refuses_to_lose_device_data() {
        let mut buf = DeviceBuffer::new("test");
        buf.mark_device_dirty();
        buf.release();
    }

    #[test]
    fn test_release_resets_to_host_dirty() {
        let mut buf = DeviceBuffer::new("test");
        // Never resident: release is a no-op state-wise but must leave
        // the buffer re-resolvable.
        buf.release();
        assert_eq!(buf.state(), Coherence::HostDirty);
        assert!(!buf.is_resident());
    }

    #[test]
    #[ignore = "requires a Vulkan GPU"]
    fn test_upload_download_round_trip() {
        use crate::gpu::device::GpuDevice;

        let gpu = GpuDevice::new().expect("need a Vulkan device");
        let host: Vec<f32> = (0..1000).map(|i| i as f32 * 0.5 - 17.0).collect();

        let mut buf = DeviceBuffer::new("round-trip");
        buf.resolve(&gpu, &host);
        assert_eq!(buf.state(), Coherence::Clean);
        assert!(buf.is_resident());

        // Pretend a kernel wrote it, then read it back: contents must
        // be exactly what was uploaded.
        buf.mark_device_dirty();
        let mut readback = vec![0.0f32; 1000];
        buf.sync_to_host(&gpu, &mut readback);
        assert_eq!(readback, host);
        assert_eq!(buf.state(), Coherence::Clean);

        // Idempotent: a second sync transfers nothing and changes nothing.
        let mut again = vec![9.0f32; 1000];
        buf.sync_to_host(&gpu, &mut again);
        assert!(again.iter().all(|&v| v == 9.0), "clean sync must not write");
    }
}
