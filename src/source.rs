// source.rs - Kernel source loading and build logs.
//
// The kernel is an external WGSL artifact. It is read once per `open()`
// and specialised per kernel flavor by substituting two placeholders
// (the same string-template approach the other compute shaders use,
// since `@workgroup_size` cannot take a pipeline override here):
//
//   {{WORKGROUP_SIZE}}  -> threads per workgroup (u32 literal)
//   {{NATIVE_MATH}}     -> `true` / `false`
//
// A kernel without the placeholders is accepted; its flavors are then
// simply identical.
//
// READ FAILURES
// ─────────────
// The three read failures are kept apart on purpose so a front end can tell
// "wrong path" from "empty file" from "file vanished mid-read":
//   - open fails                 -> RenderError::SourceOpen
//   - zero bytes                 -> RenderError::SourceEmpty
//   - read or UTF-8 decode fails -> RenderError::SourceRead

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RenderError, Result};

/// The built-in point-source kernel, used when no path is configured.
pub const BUILTIN_KERNEL: &str = include_str!("../shaders/object_wave.wgsl");

const WORKGROUP_PLACEHOLDER: &str = "{{WORKGROUP_SIZE}}";
const NATIVE_PLACEHOLDER: &str = "{{NATIVE_MATH}}";

/// Read a kernel source file into a string.
///
/// On error nothing is returned; there is no partially-read text to rely on.
pub fn read_kernel_source(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| RenderError::SourceOpen {
        path: path.to_path_buf(),
        source: Arc::new(e),
    })?;

    let read_err = |e| RenderError::SourceRead { path: path.to_path_buf(), source: Arc::new(e) };

    // Size hint only; the read below is authoritative.
    let hint = file.metadata().map_err(read_err)?.len() as usize;

    let mut bytes = Vec::with_capacity(hint);
    file.read_to_end(&mut bytes).map_err(read_err)?;

    if bytes.is_empty() {
        return Err(RenderError::SourceEmpty { path: path.to_path_buf() });
    }

    String::from_utf8(bytes).map_err(|e| {
        read_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

/// Kernel source text plus where it came from (for log messages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    text: String,
    origin: String,
}

impl KernelSource {
    /// The kernel shipped with the crate.
    pub fn builtin() -> Self {
        KernelSource { text: BUILTIN_KERNEL.to_string(), origin: "built-in object_wave.wgsl".into() }
    }

    /// Load from a file, see [`read_kernel_source`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = read_kernel_source(path)?;
        Ok(KernelSource { text, origin: path.display().to_string() })
    }

    /// Wrap an in-memory source. `origin` is only used in messages.
    pub fn from_text(text: impl Into<String>, origin: impl Into<String>) -> Self {
        KernelSource { text: text.into(), origin: origin.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Source text with the flavor placeholders filled in.
    pub fn instantiate(&self, workgroup_size: u32, native_math: bool) -> String {
        self.text
            .replace(WORKGROUP_PLACEHOLDER, &workgroup_size.to_string())
            .replace(NATIVE_PLACEHOLDER, if native_math { "true" } else { "false" })
    }
}

/// Resolve which kernel `open()` should load: explicit path first, then the
/// configured path, then the built-in kernel.
pub fn resolve(explicit: Option<&Path>, configured: Option<&PathBuf>) -> Result<KernelSource> {
    match explicit.or(configured.map(PathBuf::as_path)) {
        Some(path) => KernelSource::from_file(path),
        None => Ok(KernelSource::builtin()),
    }
}

// ---------------------------------------------------------------------------
// Build log
// ---------------------------------------------------------------------------

/// Severity of one compiler message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Info => f.write_str("info"),
        }
    }
}

/// One message from the kernel compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMessage {
    pub severity: Severity,
    /// 1-based (line, column), when the compiler reported one.
    pub location: Option<(u32, u32)>,
    pub text: String,
}

/// Everything the compiler said about one build attempt.
///
/// Backends fill this from their compiler (wgpu compilation info plus the
/// captured validation error, or naga diagnostics on the reference device)
/// and turn it into `RenderError::Build` when the build failed, so callers
/// see the exact compiler output instead of a bare failure flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildLog {
    /// Label of the build (kernel origin and flavor).
    pub label: String,
    pub messages: Vec<BuildMessage>,
}

impl BuildLog {
    pub fn new(label: impl Into<String>) -> Self {
        BuildLog { label: label.into(), messages: Vec::new() }
    }

    pub fn push(&mut self, severity: Severity, location: Option<(u32, u32)>, text: impl Into<String>) {
        self.messages.push(BuildMessage { severity, location, text: text.into() });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(Severity::Error, None, text);
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consume the log into a build error.
    pub fn into_error(self) -> RenderError {
        RenderError::Build { log: self.to_string() }
    }
}

impl fmt::Display for BuildLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "build log for {}:", self.label)?;
        for m in &self.messages {
            match m.location {
                Some((line, col)) => writeln!(f, "{line}:{col}: {}: {}", m.severity, m.text)?,
                None => writeln!(f, "{}: {}", m.severity, m.text)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn builtin_kernel_has_placeholders() {
        assert!(BUILTIN_KERNEL.contains(WORKGROUP_PLACEHOLDER));
        assert!(BUILTIN_KERNEL.contains(NATIVE_PLACEHOLDER));
    }

    #[test]
    fn instantiate_fills_placeholders() {
        let src = KernelSource::from_text(
            "const N: bool = {{NATIVE_MATH}};\n@workgroup_size({{WORKGROUP_SIZE}})",
            "inline",
        );
        let out = src.instantiate(32, true);
        assert_eq!(out, "const N: bool = true;\n@workgroup_size(32)");
        assert!(!src.instantiate(1, false).contains("{{"));
    }

    #[test]
    fn resolve_prefers_explicit_then_configured() {
        let src = resolve(None, None).unwrap();
        assert_eq!(src.text(), BUILTIN_KERNEL);

        let missing = PathBuf::from("/definitely/not/here.wgsl");
        let err = resolve(None, Some(&missing)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SourceOpen);
    }

    #[test]
    fn build_log_formats_locations() {
        let mut log = BuildLog::new("test.wgsl");
        log.push(Severity::Error, Some((3, 7)), "expected ';'");
        log.push(Severity::Warning, None, "unused variable");
        assert!(log.has_errors());
        let text = log.to_string();
        assert!(text.contains("3:7: error: expected ';'"), "{text}");
        assert!(text.contains("warning: unused variable"), "{text}");
        assert_eq!(log.into_error().code(), ErrorCode::Build);
    }

    #[test]
    fn warnings_alone_are_not_errors() {
        let mut log = BuildLog::new("w");
        log.push(Severity::Warning, None, "shadowed");
        assert!(!log.has_errors());
    }
}
