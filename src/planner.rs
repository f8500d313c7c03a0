// planner.rs - Capacity planner.
//
// Two jobs:
//
// 1. `Capacity` decides the chunk size (elements per pass) once per
//    `open()`. A caller-fixed size is used as-is; otherwise it is the
//    device's largest memory object divided by the larger per-element
//    footprint (a 32-byte point record), so a chunk along either axis fits.
//
// 2. `plan()` turns a workload into an ordered list of passes.
//
// CHUNK AXIS
// ──────────
// The side with the larger total footprint is chunked:
//
//   points_bytes = N * 32      field_bytes = M * 8
//
//   Field axis  (field_bytes >= points_bytes): pass i covers samples
//               [i*C, (i+1)*C). Each pass owns its slice of the field
//               outright, so a failure leaves later slices untouched.
//   Points axis (points_bytes >  field_bytes): pass i covers points
//               [i*C, (i+1)*C) and adds its contribution to the field.
//
// If the other side on its own is bigger than one memory object it is cut
// into batches of `limit / element_bytes`, launched in ascending order
// inside every pass.
//
// The aligned variant rounds both the chunk and the batch size down to a
// whole number of alignment units, never up: a count below one unit is
// kept. Every buffer is also padded to a multiple of the storage offset
// alignment, so short chunks stay aligned without growing.

use std::ops::Range;

use crate::device::{DeviceLimits, POINT_BYTES, SAMPLE_BYTES};
use crate::error::{RenderError, Result};

/// Per-element footprint that drives automatic chunk sizing.
pub const ELEMENT_BYTES: u64 = if POINT_BYTES > SAMPLE_BYTES { POINT_BYTES } else { SAMPLE_BYTES };

/// Chunk size for a device whose largest memory object is `max_object_bytes`.
pub fn auto_chunk_size(max_object_bytes: u64) -> usize {
    (max_object_bytes / ELEMENT_BYTES) as usize
}

/// Chunk-size state held by the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    /// 0 means "compute at open()".
    requested: usize,
    effective: usize,
    max_memory_object_size: u64,
}

impl Capacity {
    pub fn new(requested: usize) -> Self {
        Capacity { requested, effective: requested, max_memory_object_size: 0 }
    }

    /// Fix the chunk size (or return to automatic sizing with 0).
    pub fn set_requested(&mut self, chunk_size: usize) {
        self.requested = chunk_size;
        self.effective = chunk_size;
    }

    pub fn is_fixed(&self) -> bool {
        self.requested != 0
    }

    /// Effective chunk size; 0 until first computed.
    pub fn chunk_size(&self) -> usize {
        self.effective
    }

    pub fn max_memory_object_size(&self) -> u64 {
        self.max_memory_object_size
    }

    /// Called from `open()` with the new session's limits.
    pub fn resolve(&mut self, limits: &DeviceLimits) -> usize {
        self.max_memory_object_size = limits.max_memory_object_size();
        self.effective = if self.is_fixed() {
            self.requested
        } else {
            auto_chunk_size(self.max_memory_object_size)
        };
        self.effective
    }

    /// True when a fixed chunk cannot fit in one memory object.
    pub fn exceeds_limit(&self) -> bool {
        self.max_memory_object_size > 0
            && self.effective as u64 * ELEMENT_BYTES > self.max_memory_object_size
    }
}

/// Which dimension of the workload is split into passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAxis {
    Field,
    Points,
}

impl ChunkAxis {
    pub fn element_bytes(self) -> u64 {
        match self {
            ChunkAxis::Field => SAMPLE_BYTES,
            ChunkAxis::Points => POINT_BYTES,
        }
    }

    pub fn other(self) -> ChunkAxis {
        match self {
            ChunkAxis::Field => ChunkAxis::Points,
            ChunkAxis::Points => ChunkAxis::Field,
        }
    }
}

/// One pass: a chunk of the primary axis plus the batches of the other
/// axis launched against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    pub index: usize,
    pub chunk: Range<usize>,
    pub batches: Vec<Range<usize>>,
}

/// Ordered passes for one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub axis: ChunkAxis,
    pub chunk_size: usize,
    /// Buffer sizes are rounded up to this many bytes (1 = unaligned).
    pub alignment: u64,
    pub passes: Vec<Pass>,
}

impl ChunkPlan {
    /// The whole workload as a single pass with a single launch.
    pub fn whole(points: usize, samples: usize) -> Self {
        ChunkPlan {
            axis: ChunkAxis::Field,
            chunk_size: samples,
            alignment: 1,
            passes: vec![Pass { index: 0, chunk: 0..samples, batches: vec![0..points] }],
        }
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn launch_count(&self) -> usize {
        self.passes.iter().map(|p| p.batches.len()).sum()
    }

    /// Bytes for a buffer of `elements` elements of `axis`.
    pub fn buffer_bytes(&self, axis: ChunkAxis, elements: usize) -> u64 {
        crate::device::align_up(elements as u64 * axis.element_bytes(), self.alignment)
    }
}

/// Pick the chunk axis for a workload.
pub fn chunk_axis(points: usize, samples: usize) -> ChunkAxis {
    let points_bytes = points as u64 * POINT_BYTES;
    let field_bytes = samples as u64 * SAMPLE_BYTES;
    if points_bytes > field_bytes {
        ChunkAxis::Points
    } else {
        ChunkAxis::Field
    }
}

/// Smallest element count whose byte size is a multiple of `alignment`.
fn alignment_unit(element_bytes: u64, alignment: u64) -> usize {
    if alignment <= 1 {
        return 1;
    }
    (alignment / gcd(alignment, element_bytes)) as usize
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Largest multiple of `unit` not above `n`. Counts below one unit are kept
/// as they are; their buffers are padded up to the alignment instead.
fn round_down_to_unit(n: usize, unit: usize) -> usize {
    if n < unit {
        n
    } else {
        n / unit * unit
    }
}

fn split(len: usize, step: usize) -> Vec<Range<usize>> {
    (0..len).step_by(step).map(|start| start..(start + step).min(len)).collect()
}

/// Build the multi-pass plan for `points` points and `samples` field
/// samples with the given chunk size.
pub fn plan(
    points: usize,
    samples: usize,
    chunk_size: usize,
    limits: &DeviceLimits,
    aligned: bool,
) -> Result<ChunkPlan> {
    if chunk_size == 0 {
        return Err(RenderError::Config(
            "chunk size is 0: open the renderer or set a chunk size first".into(),
        ));
    }

    let axis = chunk_axis(points, samples);
    let other = axis.other();
    let (primary_len, other_len) = match axis {
        ChunkAxis::Field => (samples, points),
        ChunkAxis::Points => (points, samples),
    };

    let alignment = if aligned { limits.storage_offset_alignment.max(1) } else { 1 };

    let chunk = if aligned {
        round_down_to_unit(chunk_size, alignment_unit(axis.element_bytes(), alignment))
    } else {
        chunk_size
    };

    let limit = limits.max_memory_object_size();
    let other_bytes = other_len as u64 * other.element_bytes();
    let batch = if other_bytes <= limit {
        other_len.max(1)
    } else {
        let raw = ((limit / other.element_bytes()) as usize).max(1);
        if aligned {
            round_down_to_unit(raw, alignment_unit(other.element_bytes(), alignment))
        } else {
            raw
        }
    };

    let batches = split(other_len, batch);
    let passes = split(primary_len, chunk)
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| Pass { index, chunk, batches: batches.clone() })
        .collect();

    Ok(ChunkPlan { axis, chunk_size: chunk, alignment, passes })
}
