// hologram.rs - Recording an object wave as a hologram.
//
// The object wave O is recorded against an off-axis plane reference wave
//
//   R(x, y) = A · exp(i k (x sin ξx + y sin ξy))
//
// where ξx, ξy are the reference tilt angles. Two recording methods:
//
//   Interference:  H = |O + R|²
//   Bipolar:       H = 2 Re(O R*)        (interference minus the DC terms)
//
// The result is a real intensity; it is stored in the real part of each
// sample and the imaginary part is cleared.

use num_complex::{Complex, Complex32};
use serde::{Deserialize, Serialize};

use crate::field::OpticalField;

/// Plane reference wave.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceWave {
    pub amplitude: f64,
    /// Tilt around the y axis, degrees.
    pub angle_x_deg: f64,
    /// Tilt around the x axis, degrees.
    pub angle_y_deg: f64,
}

impl Default for ReferenceWave {
    fn default() -> Self {
        ReferenceWave { amplitude: 1.0, angle_x_deg: 0.0, angle_y_deg: 0.0 }
    }
}

impl ReferenceWave {
    /// Complex value of the reference wave at (x, y) for wavenumber `k`.
    pub fn at(&self, x: f64, y: f64, k: f64) -> Complex<f64> {
        let sx = self.angle_x_deg.to_radians().sin();
        let sy = self.angle_y_deg.to_radians().sin();
        Complex::from_polar(self.amplitude, k * (x * sx + y * sy))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HologramMethod {
    #[default]
    Interference,
    Bipolar,
}

/// Replace the object wave in `field` with its recorded hologram.
pub fn record(field: &mut OpticalField, reference: &ReferenceWave, method: HologramMethod) {
    let k = field.wavenumber();
    let (rows, cols, pitch) = (field.rows(), field.cols(), field.pitch());
    for (idx, sample) in field.as_mut_slice().iter_mut().enumerate() {
        let (x, y) = crate::field::sample_position(idx, rows, cols, pitch);
        let r = reference.at(x, y, k);
        let o = Complex::new(sample.re as f64, sample.im as f64);
        let h = match method {
            HologramMethod::Interference => (o + r).norm_sqr(),
            HologramMethod::Bipolar => 2.0 * (o * r.conj()).re,
        };
        *sample = Complex32::new(h as f32, 0.0);
    }
}
