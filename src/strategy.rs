// strategy.rs - Rendering strategies.
//
// A `Strategy` is what an `Algorithm` tag becomes once it is known to be
// executable. All strategies share one entry point, `execute`, and are
// generic over `ComputeDevice`, so they run the same on wgpu and on the
// reference device.
//
// SINGLE PASS
// ───────────
//   points buffer <- whole cloud
//   field buffer  (zeroed)
//   launch once over every sample
//   read back into the field
//
// MULTI PASS
// ──────────
// Follows the `ChunkPlan` from the planner; passes run strictly one after
// another in ascending order and each pass drops its buffers before the
// next one starts, so at most one chunk is resident at a time.
//
//   Field axis:  for each sample chunk
//                  field buffer (zeroed)
//                  for each point batch: fill points, launch (accumulate)
//                  read back -> overwrite that slice of the field
//   Points axis: zero the field, then for each point chunk
//                  fill points
//                  for each sample batch: field buffer, launch, read back,
//                                         add into the field
//
// When a pass fails the loop stops and the error is `RenderError::Partial`;
// callers must treat the field as untrustworthy on any `Err`. What is left:
//
//   Field axis:  slices of passes before the failed one are final, the
//                failed slice and later ones are untouched.
//   Points axis: every sample holds the sum over the points of earlier
//                passes; sample batches of the failed pass that finished
//                before the failure also include that pass's points.
//
// The variants (plain, CPU, native, aligned) only change the kernel flavor
// and whether the planner aligns chunk sizes; the control flow is shared.

use num_complex::Complex32;

use crate::algorithm::Algorithm;
use crate::device::{BufferKind, ComputeDevice, FieldGeometry, GpuPointSource, KernelFlavor, Launch, POINT_BYTES};
use crate::error::{RenderError, Result};
use crate::planner::{self, ChunkAxis, ChunkPlan, Pass};
use crate::point_cloud::PointSource;

/// Inputs of one render that do not change between passes.
#[derive(Debug, Clone, Copy)]
pub struct RenderJob<'a> {
    pub points: &'a [PointSource],
    pub geometry: FieldGeometry,
}

/// Flavors of the multi-pass strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiPassVariant {
    Plain,
    Cpu,
    Native,
    Aligned,
}

/// An executable rendering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SinglePass,
    MultiPass(MultiPassVariant),
}

impl Strategy {
    /// Map an algorithm tag to its strategy. Fails for `Invalid`.
    pub fn for_algorithm(alg: Algorithm) -> Result<Self> {
        match alg {
            Algorithm::SinglePass => Ok(Strategy::SinglePass),
            Algorithm::MultiPass => Ok(Strategy::MultiPass(MultiPassVariant::Plain)),
            Algorithm::MultiPassCpu => Ok(Strategy::MultiPass(MultiPassVariant::Cpu)),
            Algorithm::MultiPassNative => Ok(Strategy::MultiPass(MultiPassVariant::Native)),
            Algorithm::MultiPassAligned => Ok(Strategy::MultiPass(MultiPassVariant::Aligned)),
            Algorithm::Invalid => Err(RenderError::InvalidAlgorithm(alg)),
        }
    }

    pub fn kernel_flavor(self) -> KernelFlavor {
        match self {
            Strategy::SinglePass | Strategy::MultiPass(MultiPassVariant::Plain) => KernelFlavor::Standard,
            Strategy::MultiPass(MultiPassVariant::Aligned) => KernelFlavor::Standard,
            Strategy::MultiPass(MultiPassVariant::Cpu) => KernelFlavor::Cpu,
            Strategy::MultiPass(MultiPassVariant::Native) => KernelFlavor::Native,
        }
    }

    pub fn aligned(self) -> bool {
        matches!(self, Strategy::MultiPass(MultiPassVariant::Aligned))
    }

    /// Plan the passes for `job`.
    pub fn plan<D: ComputeDevice>(self, device: &D, job: &RenderJob<'_>, chunk_size: usize) -> Result<ChunkPlan> {
        match self {
            Strategy::SinglePass => Ok(ChunkPlan::whole(job.points.len(), job.geometry.len())),
            Strategy::MultiPass(_) => planner::plan(
                job.points.len(),
                job.geometry.len(),
                chunk_size,
                &device.limits(),
                self.aligned(),
            ),
        }
    }

    /// Render `job` into `field` (one sample per field element).
    pub fn execute<D: ComputeDevice>(
        self,
        device: &mut D,
        job: &RenderJob<'_>,
        plan: &ChunkPlan,
        field: &mut [Complex32],
    ) -> Result<()> {
        match self {
            Strategy::SinglePass => single_pass(device, job, field),
            Strategy::MultiPass(_) => multi_pass(device, job, plan, self.kernel_flavor(), field),
        }
    }
}

// ---------------------------------------------------------------------------
// Buffer helpers
// ---------------------------------------------------------------------------

/// Serialise `points` into the device point layout and write them to the
/// start of `buffer`. Any bytes past the records keep their zero fill.
pub fn fill_point_buffer<D: ComputeDevice>(
    device: &mut D,
    buffer: &mut D::Buffer,
    points: &[PointSource],
) -> Result<()> {
    let needed = points.len() as u64 * POINT_BYTES;
    let capacity = device.buffer_size(buffer);
    if needed > capacity {
        return Err(RenderError::device(
            "fill point buffer",
            format!("{} points need {needed} bytes, buffer holds {capacity}", points.len()),
        ));
    }
    let records: Vec<GpuPointSource> = points.iter().map(GpuPointSource::from).collect();
    device.write_buffer(buffer, bytemuck::cast_slice(&records))
}

fn read_samples<D: ComputeDevice>(device: &mut D, buffer: &D::Buffer, out: &mut [Complex32]) -> Result<()> {
    device.read_buffer(buffer, bytemuck::cast_slice_mut(out))
}

// ---------------------------------------------------------------------------
// Single pass
// ---------------------------------------------------------------------------

fn single_pass<D: ComputeDevice>(device: &mut D, job: &RenderJob<'_>, field: &mut [Complex32]) -> Result<()> {
    let n = job.points.len();
    let m = field.len();

    let mut points = device.create_buffer(BufferKind::Points, n as u64 * POINT_BYTES)?;
    fill_point_buffer(device, &mut points, job.points)?;

    let mut samples = device.create_buffer(BufferKind::Field, m as u64 * ChunkAxis::Field.element_bytes())?;

    let launch = Launch {
        flavor: KernelFlavor::Standard,
        geometry: job.geometry,
        samples: 0..m,
        points: 0..n,
    };
    device.launch(&launch, &points, &mut samples)?;

    read_samples(device, &samples, field)
}

// ---------------------------------------------------------------------------
// Multi pass
// ---------------------------------------------------------------------------

fn multi_pass<D: ComputeDevice>(
    device: &mut D,
    job: &RenderJob<'_>,
    plan: &ChunkPlan,
    flavor: KernelFlavor,
    field: &mut [Complex32],
) -> Result<()> {
    let total = plan.pass_count();
    log::debug!(
        "multi-pass render: {} passes along the {:?} axis, chunk {} elements, {} launches",
        total,
        plan.axis,
        plan.chunk_size,
        plan.launch_count()
    );

    if plan.axis == ChunkAxis::Points {
        field.fill(Complex32::new(0.0, 0.0));
    }

    for pass in &plan.passes {
        let result = match plan.axis {
            ChunkAxis::Field => field_pass(device, job, plan, pass, flavor, field),
            ChunkAxis::Points => points_pass(device, job, plan, pass, flavor, field),
        };
        if let Err(cause) = result {
            log::warn!(
                "pass {} of {} failed, field left partially rendered: {cause}",
                pass.index + 1,
                total
            );
            return Err(RenderError::Partial {
                completed: pass.index,
                failed: pass.index + 1,
                total,
                cause: Box::new(cause),
            });
        }
        log::debug!("pass {}/{} done ({:?})", pass.index + 1, total, pass.chunk);
    }
    Ok(())
}

/// One chunk of samples, all point batches accumulated on the device.
fn field_pass<D: ComputeDevice>(
    device: &mut D,
    job: &RenderJob<'_>,
    plan: &ChunkPlan,
    pass: &Pass,
    flavor: KernelFlavor,
    field: &mut [Complex32],
) -> Result<()> {
    let mut samples = device.create_buffer(BufferKind::Field, plan.buffer_bytes(ChunkAxis::Field, pass.chunk.len()))?;

    for batch in &pass.batches {
        let mut points = device.create_buffer(BufferKind::Points, plan.buffer_bytes(ChunkAxis::Points, batch.len()))?;
        fill_point_buffer(device, &mut points, &job.points[batch.clone()])?;

        let launch = Launch {
            flavor,
            geometry: job.geometry,
            samples: pass.chunk.clone(),
            points: batch.clone(),
        };
        device.launch(&launch, &points, &mut samples)?;
    }

    read_samples(device, &samples, &mut field[pass.chunk.clone()])
}

/// One chunk of points, added into every sample batch of the field.
fn points_pass<D: ComputeDevice>(
    device: &mut D,
    job: &RenderJob<'_>,
    plan: &ChunkPlan,
    pass: &Pass,
    flavor: KernelFlavor,
    field: &mut [Complex32],
) -> Result<()> {
    let mut points = device.create_buffer(BufferKind::Points, plan.buffer_bytes(ChunkAxis::Points, pass.chunk.len()))?;
    fill_point_buffer(device, &mut points, &job.points[pass.chunk.clone()])?;

    let mut scratch: Vec<Complex32> = Vec::new();
    for batch in &pass.batches {
        let mut samples = device.create_buffer(BufferKind::Field, plan.buffer_bytes(ChunkAxis::Field, batch.len()))?;
        let launch = Launch {
            flavor,
            geometry: job.geometry,
            samples: batch.clone(),
            points: pass.chunk.clone(),
        };
        device.launch(&launch, &points, &mut samples)?;

        scratch.clear();
        scratch.resize(batch.len(), Complex32::new(0.0, 0.0));
        read_samples(device, &samples, &mut scratch)?;
        for (dst, src) in field[batch.clone()].iter_mut().zip(&scratch) {
            *dst += *src;
        }
    }
    Ok(())
}
