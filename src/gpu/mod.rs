// gpu/mod.rs - wgpu compute backend.
//
// Implements `device::Backend` / `device::ComputeDevice` on wgpu so the
// render strategies run on real hardware. The reference device in `cpu.rs`
// stays authoritative: every GPU result is checked against it within f32
// tolerance.
//
//   adapter  - caller-side adapter lookup (the renderer never picks one)
//   session  - device/queue, kernel build, buffers, launches, readback

pub mod adapter;
pub mod session;

pub use adapter::{select_adapter, AdapterInfo, AdapterPreference};
pub use session::{GpuBackend, GpuSession};
