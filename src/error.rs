// error.rs - Diagnostics: classified render errors.
//
// Every public call on the renderer returns `Result<_, RenderError>`. The
// renderer also keeps the last error around so front ends written against
// the query-after-call pattern (`open()` then `error_message()`) keep
// working.
//
// `ErrorCode` is the flat classification callers switch on; `RenderError`
// carries the detail (paths, build logs, device messages).

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Flat error classification, one per failure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The last fallible operation succeeded.
    Ok,
    /// The kernel source file could not be opened.
    SourceOpen,
    /// The kernel source file was empty.
    SourceEmpty,
    /// Reading the kernel source failed part way through.
    SourceRead,
    /// The kernel source failed to compile or link into a pipeline.
    Build,
    /// Allocation, transfer or launch failed on the device (unclassified).
    Device,
    /// The `Invalid` algorithm sentinel was selected for execution.
    InvalidAlgorithm,
    /// A render was requested on a closed renderer.
    NotOpen,
    /// Configuration could not be loaded or is inconsistent.
    Config,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "no error",
            ErrorCode::SourceOpen => "kernel source could not be opened",
            ErrorCode::SourceEmpty => "kernel source is empty",
            ErrorCode::SourceRead => "kernel source read error",
            ErrorCode::Build => "kernel build failed",
            ErrorCode::Device => "device error",
            ErrorCode::InvalidAlgorithm => "invalid algorithm",
            ErrorCode::NotOpen => "renderer not open",
            ErrorCode::Config => "configuration error",
        };
        f.write_str(s)
    }
}

/// Errors from opening a device session or rendering.
///
/// `Clone` so the renderer can hand the error to the caller and keep a copy
/// for `error_message()`; I/O sources are shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("failed to open kernel source {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("kernel source {path} is empty")]
    SourceEmpty { path: PathBuf },

    #[error("failed to read kernel source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// `log` holds the compiler output verbatim.
    #[error("failed to build kernel:\n{log}")]
    Build { log: String },

    #[error("{operation} failed: {message}")]
    Device {
        operation: &'static str,
        message: String,
    },

    /// A multi-pass render stopped after `completed` of `total` passes.
    /// The field keeps whatever the completed passes wrote.
    #[error("pass {failed} of {total} failed ({completed} completed, field is partial): {cause}")]
    Partial {
        completed: usize,
        failed: usize,
        total: usize,
        #[source]
        cause: Box<RenderError>,
    },

    #[error("algorithm {0:?} cannot be executed")]
    InvalidAlgorithm(crate::algorithm::Algorithm),

    #[error("renderer is not open")]
    NotOpen,

    #[error("configuration error: {0}")]
    Config(String),
}

impl RenderError {
    /// Shorthand for an unclassified device failure.
    pub fn device(operation: &'static str, message: impl Into<String>) -> Self {
        RenderError::Device { operation, message: message.into() }
    }

    /// The classification of this error. Partial failures report the code
    /// of the pass that failed.
    pub fn code(&self) -> ErrorCode {
        match self {
            RenderError::SourceOpen { .. } => ErrorCode::SourceOpen,
            RenderError::SourceEmpty { .. } => ErrorCode::SourceEmpty,
            RenderError::SourceRead { .. } => ErrorCode::SourceRead,
            RenderError::Build { .. } => ErrorCode::Build,
            RenderError::Device { .. } => ErrorCode::Device,
            RenderError::Partial { cause, .. } => cause.code(),
            RenderError::InvalidAlgorithm(_) => ErrorCode::InvalidAlgorithm,
            RenderError::NotOpen => ErrorCode::NotOpen,
            RenderError::Config(_) => ErrorCode::Config,
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RenderError>;
