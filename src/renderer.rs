// renderer.rs - The point-cloud renderer.
//
// `Renderer` owns one device session at a time and routes every render
// through the selected strategy:
//
//   open(path)          load kernel source -> build session -> size chunks
//   render_object_wave  validate algorithm -> plan passes -> execute
//   render_hologram     render_object_wave -> record against reference wave
//   close()             drop the session (kernels, program, queue, device)
//
// DIAGNOSTICS
// ───────────
// Every fallible call returns `Result` and also stores its outcome: the
// error on failure, nothing on success. `error_message()` / `last_error()`
// / `error_code()` read that stored outcome without side effects, for
// front ends that query after the fact.
//
// CHUNK SIZE
// ──────────
// A chunk size set with `set_chunk_size(n > 0)` is used verbatim, before or
// after `open()`. With 0 the size is derived from the session's memory
// object limit at `open()` (or immediately, if a session is already open).

use std::path::Path;

use num_complex::Complex32;

use crate::algorithm::Algorithm;
use crate::config::RendererConfig;
use crate::device::{Backend, ComputeDevice, FieldGeometry};
use crate::error::{ErrorCode, RenderError, Result};
use crate::field::OpticalField;
use crate::hologram;
use crate::planner::Capacity;
use crate::point_cloud::PointCloud;
use crate::source;
use crate::strategy::{RenderJob, Strategy};

/// Point-cloud to optical-field renderer on a caller-chosen device.
///
/// Not `Clone`: the renderer owns its session exclusively. Dropping it
/// closes the session.
pub struct Renderer<B: Backend> {
    session: Option<B::Session>,
    backend: B,
    config: RendererConfig,
    capacity: Capacity,
    last_error: Option<RenderError>,
}

impl<B: Backend> Renderer<B> {
    /// A closed renderer with default settings.
    pub fn new(backend: B) -> Self {
        Renderer::with_config(backend, RendererConfig::default())
    }

    /// A closed renderer. The configured algorithm and chunk size behave
    /// as if set with `set_algorithm` / `set_chunk_size`.
    pub fn with_config(backend: B, config: RendererConfig) -> Self {
        Renderer {
            session: None,
            backend,
            capacity: Capacity::new(config.chunk_size),
            config,
            last_error: None,
        }
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Load the kernel source and open a device session.
    ///
    /// `None` uses the configured `kernel_path`, or the built-in kernel when
    /// that is unset too. An already open session is closed first. On
    /// failure the renderer is left closed.
    pub fn open(&mut self, source_path: Option<&Path>) -> Result<()> {
        self.close();
        let result = self.open_session(source_path);
        self.record(result)
    }

    fn open_session(&mut self, source_path: Option<&Path>) -> Result<()> {
        self.config.validate()?;
        self.capacity.set_requested(self.config.chunk_size);
        let source = source::resolve(source_path, self.config.kernel_path.as_ref())?;
        let session = self.backend.open_session(&source, &self.config.session_options())?;

        let chunk = self.capacity.resolve(&session.limits());
        if self.capacity.exceeds_limit() {
            log::warn!(
                "chunk size {} exceeds the device memory object limit of {} B; multi-pass renders will fail",
                chunk,
                self.capacity.max_memory_object_size()
            );
        }
        log::info!(
            "renderer open on {}: kernel {}, chunk size {}{}",
            self.backend.describe(),
            source.origin(),
            chunk,
            if self.capacity.is_fixed() { " (fixed)" } else { "" }
        );

        self.session = Some(session);
        Ok(())
    }

    /// Release the device session. Does nothing when already closed.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            log::info!("renderer closed on {}", self.backend.describe());
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Message of the last fallible call; empty when it succeeded.
    pub fn error_message(&self) -> String {
        self.last_error.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<&RenderError> {
        self.last_error.as_ref()
    }

    pub fn error_code(&self) -> ErrorCode {
        self.last_error.as_ref().map_or(ErrorCode::Ok, RenderError::code)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                log::error!("{e}");
                self.last_error = Some(e.clone());
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Select the algorithm for subsequent renders. Any value is accepted;
    /// `Algorithm::Invalid` makes every render fail.
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        log::debug!("algorithm set to {}", algorithm);
        self.config.algorithm = algorithm;
    }

    pub fn algorithm(&self) -> Algorithm {
        self.config.algorithm
    }

    /// Fix the multi-pass chunk size in elements; 0 returns to automatic
    /// sizing from the device limits.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.config.chunk_size = chunk_size;
        self.capacity.set_requested(chunk_size);
        if let Some(session) = &self.session {
            self.capacity.resolve(&session.limits());
        }
    }

    /// Effective chunk size; 0 before it was first computed.
    pub fn chunk_size(&self) -> usize {
        self.capacity.chunk_size()
    }

    /// Largest device buffer, known after a successful `open()`.
    pub fn max_memory_object_size(&self) -> u64 {
        self.capacity.max_memory_object_size()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The algorithm, `hologram_z` and the hologram settings are read on
    /// every render. Everything else, including `chunk_size`, takes effect
    /// at the next `open()`.
    pub fn config_mut(&mut self) -> &mut RendererConfig {
        &mut self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session(&self) -> Option<&B::Session> {
        self.session.as_ref()
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Compute the object wave of `points` on the plane of `field`,
    /// overwriting every sample.
    ///
    /// On `Err` the field contents are unspecified. A multi-pass render
    /// that fails mid-way keeps what the completed passes produced: when
    /// the field is chunked, the slices of earlier passes; when the points
    /// are chunked, the sum over earlier passes' points plus whatever
    /// sample batches of the failed pass finished.
    pub fn render_object_wave(&mut self, points: &PointCloud, field: &mut OpticalField) -> Result<()> {
        let result = self.object_wave(points, field);
        self.record(result)
    }

    /// Compute the object wave and record it as a hologram against the
    /// configured reference wave.
    pub fn render_hologram(&mut self, points: &PointCloud, field: &mut OpticalField) -> Result<()> {
        let result = self.object_wave(points, field).map(|()| {
            hologram::record(field, &self.config.reference, self.config.hologram_method);
        });
        self.record(result)
    }

    fn object_wave(&mut self, points: &PointCloud, field: &mut OpticalField) -> Result<()> {
        // Fails for `Invalid` before the device is touched.
        let strategy = Strategy::for_algorithm(self.config.algorithm)?;
        let session = self.session.as_mut().ok_or(RenderError::NotOpen)?;

        if field.is_empty() {
            return Ok(());
        }
        if points.is_empty() {
            field.fill(Complex32::new(0.0, 0.0));
            return Ok(());
        }
        let algorithm = self.config.algorithm;
        if algorithm == Algorithm::MultiPassCpu && !self.backend.is_cpu() {
            log::warn!("{} selected on a non-CPU device: {}", algorithm, self.backend.describe());
        }

        let job = RenderJob {
            points: points.as_slice(),
            geometry: FieldGeometry::of(field, self.config.hologram_z),
        };
        let plan = strategy.plan(&*session, &job, self.capacity.chunk_size())?;
        log::debug!(
            "{}: {} points -> {}x{} field, {} pass(es)",
            algorithm,
            points.len(),
            field.rows(),
            field.cols(),
            plan.pass_count()
        );
        strategy.execute(session, &job, &plan, field.as_mut_slice())
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.close();
    }
}
