// device.rs - Compute device abstraction.
//
// The render strategies are written against two small traits instead of
// wgpu directly:
//
//   Backend        - a device handle that has already been chosen by the
//                    caller. `open_session` compiles the kernel and returns
//                    a live session (context + queue + program + kernels).
//   ComputeDevice  - the session's primitive operations: create a buffer,
//                    write it, launch the kernel, read a buffer back.
//
// `gpu::GpuBackend` implements them on wgpu; `cpu::CpuBackend` implements
// them in host memory and is the reference every GPU result is checked
// against. Every operation blocks until the device has finished it.
//
// BINARY LAYOUTS
// ──────────────
// `GpuPointSource` and `KernelParams` are `#[repr(C)]` + `Pod` and must
// match the WGSL structs in shaders/object_wave.wgsl field for field:
//
//   PointSource : 8 x f32 = 32 bytes  (5 used, 3 padding)
//   Params      : 8 x u32 + 4 x f32 = 48 bytes (uniform, 16-byte multiple)
//
// Field samples are `vec2<f32>` on the device and `Complex32` on the host;
// both are two packed f32s, so readback is a plain byte copy.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::error::{RenderError, Result};
use crate::field::OpticalField;
use crate::point_cloud::PointSource;
use crate::source::KernelSource;

/// Device-side point record.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct GpuPointSource {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub amplitude: f32,
    pub phase: f32,
    pub _pad: [f32; 3],
}

impl From<&PointSource> for GpuPointSource {
    fn from(p: &PointSource) -> Self {
        GpuPointSource {
            x: p.x,
            y: p.y,
            z: p.z,
            amplitude: p.amplitude,
            phase: p.phase,
            _pad: [0.0; 3],
        }
    }
}

/// Uniform block passed to every launch.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    /// Flat index of the first sample covered by the bound field buffer.
    pub field_offset: u32,
    /// Number of samples in the bound field buffer that the launch writes.
    pub field_count: u32,
    /// Number of valid records in the bound point buffer.
    pub point_count: u32,
    pub cols: u32,
    pub rows: u32,
    /// Invocations per dispatch row (`groups_x * workgroup_size`).
    pub dispatch_width: u32,
    pub _pad0: [u32; 2],
    pub pitch: f32,
    pub wavenumber: f32,
    pub hologram_z: f32,
    pub _pad1: f32,
}

/// Bytes per point record on the device.
pub const POINT_BYTES: u64 = std::mem::size_of::<GpuPointSource>() as u64;
/// Bytes per field sample on the device.
pub const SAMPLE_BYTES: u64 = std::mem::size_of::<num_complex::Complex32>() as u64;

/// Geometry of the field being rendered, in the units the kernel needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldGeometry {
    pub rows: usize,
    pub cols: usize,
    pub pitch: f64,
    pub wavenumber: f64,
    pub hologram_z: f64,
}

impl FieldGeometry {
    pub fn of(field: &OpticalField, hologram_z: f64) -> Self {
        FieldGeometry {
            rows: field.rows(),
            cols: field.cols(),
            pitch: field.pitch(),
            wavenumber: field.wavenumber(),
            hologram_z,
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which compiled variant of the kernel a launch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelFlavor {
    /// GPU workgroup size, plain math.
    Standard,
    /// Small workgroups for CPU devices.
    Cpu,
    /// GPU workgroup size, range-reduced ("native") math.
    Native,
}

impl KernelFlavor {
    pub const ALL: [KernelFlavor; 3] = [KernelFlavor::Standard, KernelFlavor::Cpu, KernelFlavor::Native];

    pub fn native_math(self) -> bool {
        matches!(self, KernelFlavor::Native)
    }

    pub fn label(self) -> &'static str {
        match self {
            KernelFlavor::Standard => "standard",
            KernelFlavor::Cpu => "cpu",
            KernelFlavor::Native => "native",
        }
    }
}

/// What a device buffer is used for. Decides its usage flags on wgpu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Read-only point records.
    Points,
    /// Read-write field samples, copied back to the host.
    Field,
}

/// Options taken from the renderer configuration when a session opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub entry_point: String,
    /// Workgroup size of the Standard and Native flavors.
    pub workgroup_size: u32,
    /// Workgroup size of the Cpu flavor.
    pub cpu_workgroup_size: u32,
}

impl SessionOptions {
    pub fn workgroup_size_for(&self, flavor: KernelFlavor) -> u32 {
        match flavor {
            KernelFlavor::Cpu => self.cpu_workgroup_size,
            KernelFlavor::Standard | KernelFlavor::Native => self.workgroup_size,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions { entry_point: "object_wave".into(), workgroup_size: 64, cpu_workgroup_size: 4 }
    }
}

/// Device limits relevant to chunking and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_buffer_size: u64,
    pub max_storage_buffer_binding_size: u64,
    /// Alignment required for storage buffer offsets (and therefore for
    /// chunk buffers of the aligned multi-pass variant).
    pub storage_offset_alignment: u64,
    pub max_workgroups_per_dimension: u32,
}

impl DeviceLimits {
    /// Largest single buffer that can be allocated AND bound as storage.
    pub fn max_memory_object_size(&self) -> u64 {
        self.max_buffer_size.min(self.max_storage_buffer_binding_size)
    }
}

impl From<&wgpu::Limits> for DeviceLimits {
    fn from(l: &wgpu::Limits) -> Self {
        DeviceLimits {
            max_buffer_size: l.max_buffer_size,
            max_storage_buffer_binding_size: l.max_storage_buffer_binding_size as u64,
            storage_offset_alignment: l.min_storage_buffer_offset_alignment as u64,
            max_workgroups_per_dimension: l.max_compute_workgroups_per_dimension,
        }
    }
}

/// One kernel launch: which samples of the field the bound field buffer
/// covers, and which points the bound point buffer holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    pub flavor: KernelFlavor,
    pub geometry: FieldGeometry,
    /// Flat indices (into the whole field) covered by the field buffer.
    pub samples: Range<usize>,
    /// Indices (into the whole point cloud) held by the point buffer.
    pub points: Range<usize>,
}

impl Launch {
    /// Uniform block for this launch given the dispatch row width. Fails
    /// when an index or count does not fit the kernel's u32 parameters.
    pub fn kernel_params(&self, dispatch_width: u32) -> Result<KernelParams> {
        kernel_u32("last sample index", self.samples.end)?;
        Ok(KernelParams {
            field_offset: kernel_u32("first sample index", self.samples.start)?,
            field_count: kernel_u32("sample count", self.samples.len())?,
            point_count: kernel_u32("point count", self.points.len())?,
            cols: kernel_u32("column count", self.geometry.cols)?,
            rows: kernel_u32("row count", self.geometry.rows)?,
            dispatch_width,
            pitch: self.geometry.pitch as f32,
            wavenumber: self.geometry.wavenumber as f32,
            hologram_z: self.geometry.hologram_z as f32,
            ..KernelParams::zeroed()
        })
    }
}

/// Narrow a host index or count to a u32 kernel parameter.
pub fn kernel_u32(what: &str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RenderError::device("launch", format!("{what} {value} does not fit a u32 kernel parameter")))
}

/// Workgroup grid for a 1-D workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub groups_x: u32,
    pub groups_y: u32,
    /// Invocations per grid row; the kernel's linear index is
    /// `gid.x + gid.y * width`.
    pub width: u32,
}

/// Lay `count` invocations out on a 2-D grid of workgroups.
///
/// A single dimension is limited to `max_per_dim` workgroups (65535 on most
/// adapters), which caps a 1-D dispatch at ~4M invocations with 64-wide
/// groups. Larger workloads wrap onto further rows. Returns `None` when
/// even a square grid cannot cover `count`.
pub fn dispatch_grid(count: u32, workgroup_size: u32, max_per_dim: u32) -> Option<DispatchGrid> {
    if workgroup_size == 0 || max_per_dim == 0 {
        return None;
    }
    let groups = count.div_ceil(workgroup_size).max(1);
    let groups_x = groups.min(max_per_dim);
    let groups_y = groups.div_ceil(groups_x);
    if groups_y > max_per_dim {
        return None;
    }
    Some(DispatchGrid { groups_x, groups_y, width: groups_x * workgroup_size })
}

/// Round `bytes` up to a multiple of `alignment` (a power of two or any
/// positive value).
pub fn align_up(bytes: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return bytes;
    }
    bytes.div_ceil(alignment) * alignment
}

/// Primitive operations of an open device session.
///
/// Buffers are released when dropped. All operations complete before they
/// return; there is no overlap between calls.
pub trait ComputeDevice {
    type Buffer;

    fn limits(&self) -> DeviceLimits;

    /// Allocate a zero-initialised buffer of `size` bytes.
    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<Self::Buffer>;

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    /// Copy `data` to the start of `buffer`.
    fn write_buffer(&mut self, buffer: &mut Self::Buffer, data: &[u8]) -> Result<()>;

    /// Run the kernel once and wait for it to finish. The kernel adds its
    /// contribution onto the current contents of `field`.
    fn launch(&mut self, launch: &Launch, points: &Self::Buffer, field: &mut Self::Buffer) -> Result<()>;

    /// Copy the first `out.len()` bytes of `buffer` to `out`.
    fn read_buffer(&mut self, buffer: &Self::Buffer, out: &mut [u8]) -> Result<()>;
}

/// A compute device handle chosen by the caller.
pub trait Backend {
    type Session: ComputeDevice;

    /// Human-readable device name for logs.
    fn describe(&self) -> String;

    /// True when the device executes kernels on the host CPU.
    fn is_cpu(&self) -> bool {
        false
    }

    /// Compile `source` and create a session. Nothing is left allocated
    /// when this fails.
    fn open_session(&self, source: &KernelSource, options: &SessionOptions) -> Result<Self::Session>;
}
