// gpu/adapter.rs - Adapter lookup for callers.
//
// The renderer never picks a device: it is handed a `wgpu::Adapter` through
// `GpuBackend::new`. This module is the convenience front ends, tests and
// benches use to get one.
//
// ADAPTER PREFERENCE
// ──────────────────
// `enumerate_adapters` lists everything the instance can see. We rank by
// device type instead of trusting `request_adapter`'s power heuristics,
// which happily return llvmpipe on machines where a software Vulkan driver
// is installed next to the real one:
//
//   Gpu preference:  DiscreteGpu > IntegratedGpu > VirtualGpu > Other > Cpu
//   Cpu preference:  Cpu first, then the Gpu order
//
// The Cpu preference exists for the CPU-targeted multi-pass algorithm.

use std::fmt;

/// Which kind of adapter the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterPreference {
    Gpu,
    Cpu,
}

/// Cached adapter information for logging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(info: wgpu::AdapterInfo) -> Self {
        AdapterInfo { name: info.name, device_type: info.device_type, backend: info.backend }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

fn rank(device_type: wgpu::DeviceType, pref: AdapterPreference) -> u8 {
    let gpu_rank = match device_type {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Other => 3,
        wgpu::DeviceType::Cpu => 4,
    };
    match (pref, device_type) {
        (AdapterPreference::Cpu, wgpu::DeviceType::Cpu) => 0,
        (AdapterPreference::Cpu, _) => gpu_rank + 1,
        (AdapterPreference::Gpu, _) => gpu_rank,
    }
}

/// Pick the best adapter on all native backends. `None` if the machine has
/// no usable adapter at all.
pub fn select_adapter(pref: AdapterPreference) -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let mut adapters = instance.enumerate_adapters(wgpu::Backends::PRIMARY);
    for a in &adapters {
        log::debug!("found adapter: {}", AdapterInfo::from(a.get_info()));
    }
    adapters.sort_by_key(|a| rank(a.get_info().device_type, pref));
    let adapter = adapters.into_iter().next()?;
    log::info!("selected adapter: {}", AdapterInfo::from(adapter.get_info()));
    Some(adapter)
}
