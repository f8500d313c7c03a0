// cpu.rs - Reference compute device in host memory.
//
// `CpuBackend` implements the same `Backend` / `ComputeDevice` traits as the
// wgpu backend, so every strategy runs unchanged on it. It is the
// authoritative implementation: GPU output is validated against it.
//
// What it models:
//   - Build:   the kernel source goes through naga's WGSL front end and
//              validator for every flavor, and must export the configured
//              compute entry point. Compiler diagnostics become the build
//              log, exactly like a failed device build.
//   - Limits:  configurable memory-object limit and offset alignment, so a
//              laptop-sized test can exercise the chunking paths that only
//              trigger on real hardware with multi-GB scenes.
//   - Kernel:  `object_wave_sample`, the host version of
//              shaders/object_wave.wgsl, computed in f64.
//   - Counters: live buffers, writes, launches (with their ranges), reads
//              and open sessions, shared through an `Arc` so they can be
//              inspected after the session is gone.
//   - Faults:  optionally fail the n-th launch of a session.
//
// Buffers are stored as `Vec<u32>` so they can be reinterpreted as point
// records or complex samples (both 4-byte aligned) without copying.

use std::f64::consts::TAU;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use num_complex::{Complex, Complex32};

use crate::device::{
    Backend, BufferKind, ComputeDevice, DeviceLimits, GpuPointSource, KernelFlavor, Launch,
    SessionOptions, POINT_BYTES,
};
use crate::error::{RenderError, Result};
use crate::field::{sample_position, OpticalField};
use crate::point_cloud::PointSource;
use crate::source::{BuildLog, KernelSource, Severity};

// ---------------------------------------------------------------------------
// Reference kernel
// ---------------------------------------------------------------------------

/// Sum of all point contributions at (x, y, z):
///   Σ a / r · exp(i (k r + φ))
pub fn object_wave_sample<'a, I>(points: I, x: f64, y: f64, z: f64, wavenumber: f64, native: bool) -> Complex<f64>
where
    I: IntoIterator<Item = &'a GpuPointSource>,
{
    let mut acc = Complex::new(0.0, 0.0);
    for p in points {
        let dx = x - p.x as f64;
        let dy = y - p.y as f64;
        let dz = z - p.z as f64;
        let r = (dx * dx + dy * dy + dz * dz).sqrt();
        let mut arg = wavenumber * r + p.phase as f64;
        if native {
            arg = arg.rem_euclid(TAU);
        }
        acc += Complex::from_polar(p.amplitude as f64 / r, arg);
    }
    acc
}

/// Render the object wave directly on the host, no device involved.
/// Overwrites every sample of `field`.
pub fn render_reference(points: &[PointSource], field: &mut OpticalField, hologram_z: f64) {
    let records: Vec<GpuPointSource> = points.iter().map(GpuPointSource::from).collect();
    let (rows, cols, pitch, k) = (field.rows(), field.cols(), field.pitch(), field.wavenumber());
    for (idx, sample) in field.as_mut_slice().iter_mut().enumerate() {
        let (x, y) = sample_position(idx, rows, cols, pitch);
        let v = object_wave_sample(&records, x, y, hologram_z, k, false);
        *sample = Complex32::new(v.re as f32, v.im as f32);
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// A launch as seen by the reference device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub flavor: KernelFlavor,
    pub samples: Range<usize>,
    pub points: Range<usize>,
}

/// Resource and operation counters of a `CpuBackend`.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    open_sessions: AtomicUsize,
    live_buffers: AtomicUsize,
    buffers_created: AtomicUsize,
    writes: AtomicUsize,
    reads: AtomicUsize,
    launch_log: Mutex<Vec<LaunchRecord>>,
}

impl DeviceCounters {
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every successful launch so far, in submission order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launch_log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Allocations + writes + launches + reads.
    pub fn device_operations(&self) -> usize {
        self.buffers_created() + self.writes() + self.reads() + self.launches().len()
    }

    /// Forget recorded operations (live resources are kept).
    pub fn reset_operations(&self) {
        self.buffers_created.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.reads.store(0, Ordering::SeqCst);
        self.launch_log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

// ---------------------------------------------------------------------------
// CpuBackend
// ---------------------------------------------------------------------------

/// Host-memory compute device.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    limits: DeviceLimits,
    counters: Arc<DeviceCounters>,
    fail_on_launch: Option<usize>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        CpuBackend::new()
    }
}

impl CpuBackend {
    /// Default limits mirror wgpu's defaults (256 MiB buffers, 128 MiB
    /// storage bindings, 256-byte offset alignment).
    pub fn new() -> Self {
        CpuBackend::with_limits(DeviceLimits::from(&wgpu::Limits::default()))
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        CpuBackend { limits, counters: Arc::new(DeviceCounters::default()), fail_on_launch: None }
    }

    /// Limit every memory object to `bytes`, keeping the other limits.
    pub fn with_max_object_size(mut self, bytes: u64) -> Self {
        self.limits.max_buffer_size = bytes;
        self.limits.max_storage_buffer_binding_size = bytes;
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.limits.storage_offset_alignment = alignment;
        self
    }

    /// Make launch number `n` (0-based, counted per session) fail.
    pub fn fail_on_launch(mut self, n: usize) -> Self {
        self.fail_on_launch = Some(n);
        self
    }

    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    pub fn counters(&self) -> Arc<DeviceCounters> {
        Arc::clone(&self.counters)
    }
}

/// Compile one flavor of the kernel with naga.
fn build_flavor(source: &KernelSource, options: &SessionOptions, flavor: KernelFlavor) -> Result<()> {
    let text = source.instantiate(options.workgroup_size_for(flavor), flavor.native_math());
    let label = format!("{} ({} flavor)", source.origin(), flavor.label());

    let module = naga::front::wgsl::parse_str(&text).map_err(|e| {
        let mut log = BuildLog::new(&label);
        log.error(e.emit_to_string(&text));
        log.into_error()
    })?;

    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| {
            let mut log = BuildLog::new(&label);
            log.error(e.emit_to_string(&text));
            log.into_error()
        })?;

    let has_entry = module
        .entry_points
        .iter()
        .any(|ep| ep.name == options.entry_point && ep.stage == naga::ShaderStage::Compute);
    if !has_entry {
        let mut log = BuildLog::new(&label);
        log.push(
            Severity::Error,
            None,
            format!("compute entry point `{}` not found", options.entry_point),
        );
        return Err(log.into_error());
    }
    Ok(())
}

impl Backend for CpuBackend {
    type Session = CpuSession;

    fn describe(&self) -> String {
        format!(
            "reference CPU device (max object {} B, alignment {} B)",
            self.limits.max_memory_object_size(),
            self.limits.storage_offset_alignment
        )
    }

    fn is_cpu(&self) -> bool {
        true
    }

    fn open_session(&self, source: &KernelSource, options: &SessionOptions) -> Result<CpuSession> {
        for flavor in KernelFlavor::ALL {
            build_flavor(source, options, flavor)?;
        }
        self.counters.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(CpuSession {
            limits: self.limits,
            counters: Arc::clone(&self.counters),
            launches: 0,
            fail_on_launch: self.fail_on_launch,
        })
    }
}

// ---------------------------------------------------------------------------
// CpuSession
// ---------------------------------------------------------------------------

/// An open session on the reference device.
#[derive(Debug)]
pub struct CpuSession {
    limits: DeviceLimits,
    counters: Arc<DeviceCounters>,
    launches: usize,
    fail_on_launch: Option<usize>,
}

impl Drop for CpuSession {
    fn drop(&mut self) {
        self.counters.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Host buffer. Released (and uncounted) on drop.
#[derive(Debug)]
pub struct CpuBuffer {
    kind: BufferKind,
    words: Vec<u32>,
    counters: Arc<DeviceCounters>,
}

impl Drop for CpuBuffer {
    fn drop(&mut self) {
        self.counters.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ComputeDevice for CpuSession {
    type Buffer = CpuBuffer;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<CpuBuffer> {
        let max = self.limits.max_memory_object_size();
        if size > max {
            return Err(RenderError::device(
                "create buffer",
                format!("{size} bytes requested, device memory object limit is {max} bytes"),
            ));
        }
        self.counters.buffers_created.fetch_add(1, Ordering::SeqCst);
        self.counters.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(CpuBuffer {
            kind,
            words: vec![0u32; size.div_ceil(4) as usize],
            counters: Arc::clone(&self.counters),
        })
    }

    fn buffer_size(&self, buffer: &CpuBuffer) -> u64 {
        buffer.words.len() as u64 * 4
    }

    fn write_buffer(&mut self, buffer: &mut CpuBuffer, data: &[u8]) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut buffer.words);
        if data.len() > bytes.len() {
            return Err(RenderError::device(
                "write buffer",
                format!("{} bytes written into a {} byte buffer", data.len(), bytes.len()),
            ));
        }
        bytes[..data.len()].copy_from_slice(data);
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn launch(&mut self, launch: &Launch, points: &CpuBuffer, field: &mut CpuBuffer) -> Result<()> {
        let n = self.launches;
        self.launches += 1;
        if self.fail_on_launch == Some(n) {
            return Err(RenderError::device("launch", format!("injected fault on launch {n}")));
        }

        let point_count = launch.points.len();
        // Same parameter range as the GPU kernel.
        launch.kernel_params(0)?;

        // wgpu would reject these through the buffer usage flags.
        if points.kind != BufferKind::Points || field.kind != BufferKind::Field {
            return Err(RenderError::device(
                "launch",
                format!("bound {:?} buffer as points and {:?} buffer as field", points.kind, field.kind),
            ));
        }

        let sample_count = launch.samples.len();
        let point_words = point_count * (POINT_BYTES as usize / 4);
        if point_words > points.words.len() || sample_count * 2 > field.words.len() {
            return Err(RenderError::device("launch", "bound buffers are smaller than the launch range"));
        }

        let records: &[GpuPointSource] = bytemuck::cast_slice(&points.words[..point_words]);
        let samples: &mut [Complex32] = bytemuck::cast_slice_mut(&mut field.words[..sample_count * 2]);

        let g = &launch.geometry;
        let native = launch.flavor.native_math();
        for (slot, sample) in samples.iter_mut().enumerate() {
            let (x, y) = sample_position(launch.samples.start + slot, g.rows, g.cols, g.pitch);
            let v = object_wave_sample(records, x, y, g.hologram_z, g.wavenumber, native);
            *sample += Complex32::new(v.re as f32, v.im as f32);
        }

        self.counters
            .launch_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LaunchRecord {
                flavor: launch.flavor,
                samples: launch.samples.clone(),
                points: launch.points.clone(),
            });
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &CpuBuffer, out: &mut [u8]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(&buffer.words);
        if out.len() > bytes.len() {
            return Err(RenderError::device(
                "read buffer",
                format!("{} bytes requested from a {} byte buffer", out.len(), bytes.len()),
            ));
        }
        out.copy_from_slice(&bytes[..out.len()]);
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
