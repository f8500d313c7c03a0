// field.rs - OpticalField: a 2-D grid of complex samples.
//
// Layout is row-major and tightly packed (no stride padding, unlike
// `Image<T>` style buffers): sample (row, col) lives at `row * cols + col`.
// The flat index is what the kernels and the chunk planner work with.
//
// Geometry: the grid is centred on the optical axis. Sample (row, col)
// sits at
//
//   x = (col - cols/2) * pitch
//   y = (row - rows/2) * pitch
//
// on the hologram plane. The kernel uses exactly the same formula.

use num_complex::Complex32;

/// A sampled complex wavefront (object wave or recorded hologram).
#[derive(Debug, Clone, PartialEq)]
pub struct OpticalField {
    rows: usize,
    cols: usize,
    /// Sample spacing in metres.
    pitch: f64,
    /// Light wavelength in metres.
    wavelength: f64,
    samples: Vec<Complex32>,
}

impl OpticalField {
    /// Create a zero-filled field.
    pub fn new(rows: usize, cols: usize, pitch: f64, wavelength: f64) -> Self {
        assert!(pitch > 0.0, "pitch must be positive (got {pitch})");
        assert!(wavelength > 0.0, "wavelength must be positive (got {wavelength})");
        OpticalField {
            rows,
            cols,
            pitch,
            wavelength,
            samples: vec![Complex32::new(0.0, 0.0); rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    /// Wavenumber k = 2π / λ.
    pub fn wavenumber(&self) -> f64 {
        std::f64::consts::TAU / self.wavelength
    }

    /// Number of samples (rows * cols).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Complex32 {
        self.samples[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: Complex32) {
        self.samples[row * self.cols + col] = v;
    }

    pub fn as_slice(&self) -> &[Complex32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex32] {
        &mut self.samples
    }

    /// Set every sample to `v`.
    pub fn fill(&mut self, v: Complex32) {
        self.samples.fill(v);
    }

    /// Position (x, y) in metres of the sample with flat index `idx`.
    #[inline]
    pub fn sample_position(&self, idx: usize) -> (f64, f64) {
        sample_position(idx, self.rows, self.cols, self.pitch)
    }
}

/// Shared by the field and the reference kernel so both agree on geometry.
#[inline]
pub(crate) fn sample_position(idx: usize, rows: usize, cols: usize, pitch: f64) -> (f64, f64) {
    let col = idx % cols;
    let row = idx / cols;
    let x = (col as f64 - cols as f64 * 0.5) * pitch;
    let y = (row as f64 - rows as f64 * 0.5) * pitch;
    (x, y)
}
