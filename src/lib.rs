// holoren-gpu: point-cloud hologram renderer on wgpu
//
// Computes the complex object wave of a cloud of point light sources on a
// sampled hologram plane, splitting the work into passes when the scene or
// the field does not fit in one device buffer. A host-memory reference
// device (`cpu`) implements the same device traits and validates the GPU
// path.

pub mod algorithm;
pub mod config;
pub mod cpu;
pub mod device;
pub mod error;
pub mod field;
pub mod gpu;
pub mod hologram;
pub mod planner;
pub mod point_cloud;
pub mod renderer;
pub mod source;
pub mod strategy;

pub use algorithm::Algorithm;
pub use config::RendererConfig;
pub use error::{ErrorCode, RenderError, Result};
pub use field::OpticalField;
pub use hologram::{HologramMethod, ReferenceWave};
pub use point_cloud::{PointCloud, PointSource};
pub use renderer::Renderer;
