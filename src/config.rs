// config.rs - Renderer configuration.
//
// Everything a front end may want to set before `open()`, serialisable so
// it can live in a JSON settings file next to the kernel source. Missing
// keys fall back to `RendererConfig::default()`.
//
//   {
//     "hologram_z": 0.0,
//     "kernel_path": "kernels/object_wave.wgsl",
//     "algorithm": "multi_pass",
//     "chunk_size": 0,
//     "reference": { "amplitude": 1.0, "angle_x_deg": 2.0 },
//     "hologram_method": "bipolar"
//   }

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::device::SessionOptions;
use crate::error::{RenderError, Result};
use crate::hologram::{HologramMethod, ReferenceWave};

/// Renderer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// z coordinate of the hologram plane, metres.
    pub hologram_z: f64,

    /// Kernel source used when `open()` gets no explicit path. `None`
    /// means the built-in kernel.
    pub kernel_path: Option<PathBuf>,

    /// Compute entry point inside the kernel source.
    pub entry_point: String,

    /// Initial algorithm; can be changed later with `set_algorithm`.
    pub algorithm: Algorithm,

    /// Elements per pass. 0 = derive from the device limits at `open()`.
    pub chunk_size: usize,

    /// Workgroup size of the GPU kernel flavors.
    pub workgroup_size: u32,

    /// Workgroup size of the CPU kernel flavor.
    pub cpu_workgroup_size: u32,

    /// Reference wave used by `render_hologram`.
    pub reference: ReferenceWave,

    pub hologram_method: HologramMethod,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let session = SessionOptions::default();
        RendererConfig {
            hologram_z: 0.0,
            kernel_path: None,
            entry_point: session.entry_point,
            algorithm: Algorithm::SinglePass,
            chunk_size: 0,
            workgroup_size: session.workgroup_size,
            cpu_workgroup_size: session.cpu_workgroup_size,
            reference: ReferenceWave::default(),
            hologram_method: HologramMethod::Interference,
        }
    }
}

impl RendererConfig {
    /// Settings for scenes that do not fit in one device buffer.
    pub fn large_scene() -> Self {
        RendererConfig { algorithm: Algorithm::MultiPass, ..Default::default() }
    }

    /// Settings for a CPU compute device.
    pub fn cpu_device() -> Self {
        RendererConfig { algorithm: Algorithm::MultiPassCpu, ..Default::default() }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: RendererConfig =
            serde_json::from_str(json).map_err(|e| RenderError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RenderError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RenderError::Config(e.to_string()))
    }

    /// Reject values no kernel launch could use.
    pub fn validate(&self) -> Result<()> {
        if self.entry_point.trim().is_empty() {
            return Err(RenderError::Config("entry_point must not be empty".into()));
        }
        if self.workgroup_size == 0 || self.cpu_workgroup_size == 0 {
            return Err(RenderError::Config("workgroup sizes must be at least 1".into()));
        }
        if !self.hologram_z.is_finite() {
            return Err(RenderError::Config(format!("hologram_z must be finite (got {})", self.hologram_z)));
        }
        let r = &self.reference;
        if !(r.amplitude.is_finite() && r.angle_x_deg.is_finite() && r.angle_y_deg.is_finite()) {
            return Err(RenderError::Config("reference wave parameters must be finite".into()));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            entry_point: self.entry_point.clone(),
            workgroup_size: self.workgroup_size,
            cpu_workgroup_size: self.cpu_workgroup_size,
        }
    }
}
