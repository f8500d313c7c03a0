// gpu/session.rs - wgpu device session.
//
// `GpuBackend` wraps the adapter the caller picked. `open_session` turns it
// into a `GpuSession`:
//
//   1. request a device + queue with the adapter's own limits (not wgpu's
//      conservative defaults), so the memory-object limit the planner sees
//      is the hardware's;
//   2. compile one shader module per kernel flavor inside a validation
//      error scope and collect the compilation messages as the build log;
//   3. create one compute pipeline per flavor (the kernel handles).
//
// ERROR CAPTURE
// ─────────────
// wgpu reports most failures asynchronously to an error sink; by default an
// uncaptured error panics. Every fallible call here is wrapped in
// OutOfMemory + Validation error scopes and the popped error is converted
// into a `RenderError`. Anything that still escapes goes to the uncaptured
// error handler, which logs instead of panicking.
//
// SYNCHRONISATION
// ───────────────
// Every operation submits and then blocks with `device.poll(Maintain::Wait)`
// so the session behaves like a blocking command queue: when a call returns,
// the device work it issued has finished.

use std::collections::HashMap;
use std::fmt;

use wgpu::util::DeviceExt;

use crate::device::{
    dispatch_grid, Backend, BufferKind, ComputeDevice, DeviceLimits, KernelFlavor, Launch, SessionOptions,
};
use crate::error::{RenderError, Result};
use crate::gpu::adapter::AdapterInfo;
use crate::source::{BuildLog, KernelSource, Severity};

// ---------------------------------------------------------------------------
// GpuBackend
// ---------------------------------------------------------------------------

/// A caller-selected wgpu adapter.
pub struct GpuBackend {
    adapter: wgpu::Adapter,
    info: AdapterInfo,
}

impl GpuBackend {
    pub fn new(adapter: wgpu::Adapter) -> Self {
        let info = AdapterInfo::from(adapter.get_info());
        GpuBackend { adapter, info }
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn info(&self) -> &AdapterInfo {
        &self.info
    }
}

impl fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuBackend").field("adapter", &self.info).finish()
    }
}

impl Backend for GpuBackend {
    type Session = GpuSession;

    fn describe(&self) -> String {
        self.info.to_string()
    }

    fn is_cpu(&self) -> bool {
        self.info.device_type == wgpu::DeviceType::Cpu
    }

    fn open_session(&self, source: &KernelSource, options: &SessionOptions) -> Result<GpuSession> {
        let required_limits = self.adapter.limits();
        let (device, queue): (wgpu::Device, wgpu::Queue) = pollster::block_on(self.adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("holoren-gpu"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| RenderError::device("request device", e.to_string()))?;

        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured wgpu error: {err}");
        }));

        let layout = create_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("object_wave pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        // Any early return below drops what was created so far, device last.
        let mut programs = Vec::with_capacity(KernelFlavor::ALL.len());
        let mut kernels = HashMap::with_capacity(KernelFlavor::ALL.len());
        for flavor in KernelFlavor::ALL {
            let workgroup_size = options.workgroup_size_for(flavor);
            let program = compile(&device, source, flavor, workgroup_size)?;
            let pipeline = create_pipeline(&device, &pipeline_layout, &program, source, flavor, &options.entry_point)?;
            kernels.insert(flavor, Kernel { pipeline, workgroup_size });
            programs.push(program);
        }

        let limits = DeviceLimits::from(&device.limits());
        log::info!(
            "opened {} with kernel {}: max memory object {} B, storage alignment {} B",
            self.info,
            source.origin(),
            limits.max_memory_object_size(),
            limits.storage_offset_alignment
        );

        Ok(GpuSession { kernels, layout, programs, queue, device, limits })
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("object_wave BGL"),
        entries: &[
            // 0 - point records
            storage(0, true),
            // 1 - field samples, accumulated into
            storage(1, false),
            // 2 - params uniform
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

fn build_label(source: &KernelSource, flavor: KernelFlavor) -> String {
    format!("{} ({} flavor)", source.origin(), flavor.label())
}

/// Compile one flavor. The compiler's messages become the build log.
fn compile(
    device: &wgpu::Device,
    source: &KernelSource,
    flavor: KernelFlavor,
    workgroup_size: u32,
) -> Result<wgpu::ShaderModule> {
    let label = build_label(source, flavor);
    let text = source.instantiate(workgroup_size, flavor.native_math());

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label.as_str()),
        source: wgpu::ShaderSource::Wgsl(text.into()),
    });
    let info = pollster::block_on(module.get_compilation_info());
    let scope_error = pollster::block_on(device.pop_error_scope());

    let mut log = BuildLog::new(label);
    for msg in &info.messages {
        let severity = match msg.message_type {
            wgpu::CompilationMessageType::Error => Severity::Error,
            wgpu::CompilationMessageType::Warning => Severity::Warning,
            wgpu::CompilationMessageType::Info => Severity::Info,
        };
        let location = msg.location.map(|l| (l.line_number, l.line_position));
        log.push(severity, location, msg.message.clone());
    }
    if let Some(err) = scope_error {
        log.error(err.to_string());
    }

    if log.has_errors() {
        return Err(log.into_error());
    }
    if !log.is_empty() {
        log::warn!("{log}");
    }
    Ok(module)
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    source: &KernelSource,
    flavor: KernelFlavor,
    entry_point: &str,
) -> Result<wgpu::ComputePipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(layout),
        module,
        entry_point,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(pipeline),
        Some(err) => {
            let mut log = BuildLog::new(build_label(source, flavor));
            log.error(format!("pipeline for entry point `{entry_point}`: {err}"));
            Err(log.into_error())
        }
    }
}

// ---------------------------------------------------------------------------
// GpuSession
// ---------------------------------------------------------------------------

/// A compiled kernel flavor.
struct Kernel {
    pipeline: wgpu::ComputePipeline,
    workgroup_size: u32,
}

/// An open wgpu session: device (context), queue, shader modules
/// (program) and compute pipelines (kernels).
///
/// # Field drop order
/// Fields drop top to bottom: kernels and the bind group layout first, then
/// the shader modules, then the queue and finally the device they all
/// belong to.
pub struct GpuSession {
    kernels: HashMap<KernelFlavor, Kernel>,
    layout: wgpu::BindGroupLayout,
    programs: Vec<wgpu::ShaderModule>,
    queue: wgpu::Queue,
    device: wgpu::Device,
    limits: DeviceLimits,
}

impl GpuSession {
    /// Run `f` inside OutOfMemory + Validation error scopes.
    fn scoped<T>(&self, operation: &'static str, f: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            None => Ok(value),
            Some(err) => Err(RenderError::device(operation, err.to_string())),
        }
    }

    fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Compiled shader modules, one per kernel flavor.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }
}

impl ComputeDevice for GpuSession {
    type Buffer = wgpu::Buffer;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<wgpu::Buffer> {
        let (label, usage) = match kind {
            BufferKind::Points => ("points", wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST),
            BufferKind::Field => (
                "field",
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            ),
        };
        // wgpu copies work in 4-byte units.
        let size = crate::device::align_up(size, wgpu::COPY_BUFFER_ALIGNMENT);
        self.scoped("create buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        })
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn write_buffer(&mut self, buffer: &mut wgpu::Buffer, data: &[u8]) -> Result<()> {
        self.scoped("write buffer", || {
            self.queue.write_buffer(buffer, 0, data);
            self.queue.submit(std::iter::empty());
        })?;
        self.wait();
        Ok(())
    }

    fn launch(&mut self, launch: &Launch, points: &wgpu::Buffer, field: &mut wgpu::Buffer) -> Result<()> {
        let kernel = self
            .kernels
            .get(&launch.flavor)
            .ok_or_else(|| RenderError::device("launch", format!("no {} kernel", launch.flavor.label())))?;

        let count = crate::device::kernel_u32("sample count", launch.samples.len())?;
        let grid = dispatch_grid(count, kernel.workgroup_size, self.limits.max_workgroups_per_dimension)
            .ok_or_else(|| {
                RenderError::device("launch", format!("{count} samples exceed the device dispatch limits"))
            })?;
        let params = launch.kernel_params(grid.width)?;

        self.scoped("launch", || {
            let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("object_wave params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("object_wave BG"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: points.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: field.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: params_buf.as_entire_binding() },
                ],
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("object_wave dispatch") });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("object_wave"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(grid.groups_x, grid.groups_y, 1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
        })?;
        self.wait();
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &wgpu::Buffer, out: &mut [u8]) -> Result<()> {
        let size = out.len() as u64;
        if size == 0 {
            return Ok(());
        }
        let staging_size = crate::device::align_up(size, wgpu::COPY_BUFFER_ALIGNMENT);

        let staging = self.scoped("read back", || {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("field readback"),
                size: staging_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("field readback") });
            encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, staging_size);
            self.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            // The receiver outlives the poll below; a send error is unreachable.
            let _ = tx.send(r);
        });
        self.wait();
        rx.recv()
            .map_err(|e| RenderError::device("read back", e.to_string()))?
            .map_err(|e| RenderError::device("read back", e.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(&mapped[..out.len()]);
        }
        staging.unmap();
        Ok(())
    }
}
