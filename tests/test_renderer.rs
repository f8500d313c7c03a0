// tests/test_renderer.rs - Session lifecycle, kernel loading and diagnostics.
//
// Everything here runs on the reference device (`CpuBackend`), which builds
// the kernel with naga and counts sessions, buffers and device operations.

use std::fs;

use holoren_gpu::cpu::CpuBackend;
use holoren_gpu::source::{self, BUILTIN_KERNEL};
use holoren_gpu::{Algorithm, ErrorCode, OpticalField, PointCloud, PointSource, Renderer, RendererConfig};

fn cloud(n: usize) -> PointCloud {
    (0..n)
        .map(|i| PointSource::new(i as f32 * 2e-5, -(i as f32) * 1e-5, -0.01 - i as f32 * 1e-4, 1.0, 0.0))
        .collect()
}

fn field(rows: usize, cols: usize) -> OpticalField {
    OpticalField::new(rows, cols, 8e-6, 633e-9)
}

// ===== open / close =====

#[test]
fn open_close_releases_everything() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);

    r.open(None).unwrap();
    assert!(r.is_open());
    assert_eq!(counters.open_sessions(), 1);

    let mut f = field(8, 8);
    r.render_object_wave(&cloud(3), &mut f).unwrap();
    assert_eq!(counters.live_buffers(), 0, "per-render buffers must not outlive the call");

    r.close();
    assert!(!r.is_open());
    assert_eq!(counters.open_sessions(), 0);
    assert_eq!(counters.live_buffers(), 0);
}

#[test]
fn close_is_idempotent() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.close();
    r.open(None).unwrap();
    r.close();
    r.close();
    assert_eq!(counters.open_sessions(), 0);
    assert_eq!(r.error_code(), ErrorCode::Ok);
}

#[test]
fn reopen_replaces_session() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    r.open(None).unwrap();
    assert_eq!(counters.open_sessions(), 1);
}

#[test]
fn drop_closes_session() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    {
        let mut r = Renderer::new(backend);
        r.open(None).unwrap();
        assert_eq!(counters.open_sessions(), 1);
    }
    assert_eq!(counters.open_sessions(), 0);
}

// ===== kernel source =====

#[test]
fn missing_source_is_source_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does_not_exist.wgsl");

    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    let err = r.open(Some(&path)).unwrap_err();

    assert_eq!(err.code(), ErrorCode::SourceOpen);
    assert_eq!(r.error_code(), ErrorCode::SourceOpen);
    assert!(r.error_message().contains("does_not_exist.wgsl"));
    assert!(!r.is_open());
    assert_eq!(counters.open_sessions(), 0);
}

#[test]
fn empty_source_is_source_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.wgsl");
    fs::write(&path, "").unwrap();

    let mut r = Renderer::new(CpuBackend::new());
    let err = r.open(Some(&path)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SourceEmpty);
    assert!(!r.is_open());
}

#[test]
fn invalid_utf8_is_source_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("binary.wgsl");
    fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();

    let err = source::read_kernel_source(&path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SourceRead);
}

#[test]
fn broken_source_is_build_error_with_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.wgsl");
    fs::write(&path, "@compute @workgroup_size(1)\nfn object_wave() {\n  let x: u32 = ;\n}\n").unwrap();

    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    let err = r.open(Some(&path)).unwrap_err();

    assert_eq!(err.code(), ErrorCode::Build);
    match r.last_error() {
        Some(holoren_gpu::RenderError::Build { log }) => {
            assert!(!log.is_empty());
            assert!(log.contains("broken.wgsl"), "log should name the source:\n{log}");
        }
        other => panic!("expected a build error, got {other:?}"),
    }
    assert!(!r.is_open());
    assert_eq!(counters.open_sessions(), 0);
}

#[test]
fn missing_entry_point_is_build_error() {
    let cfg = RendererConfig { entry_point: "render_points".into(), ..Default::default() };
    let mut r = Renderer::with_config(CpuBackend::new(), cfg);
    let err = r.open(None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Build);
    assert!(r.error_message().contains("render_points"));
}

#[test]
fn configured_kernel_path_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel.wgsl");
    fs::write(&path, BUILTIN_KERNEL).unwrap();

    let cfg = RendererConfig { kernel_path: Some(path.clone()), ..Default::default() };
    let mut r = Renderer::with_config(CpuBackend::new(), cfg);
    r.open(None).unwrap();

    // An explicit path wins over the configured one.
    fs::remove_file(&path).unwrap();
    let err = r.open(Some(&dir.path().join("other.wgsl"))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SourceOpen);
    assert!(r.error_message().contains("other.wgsl"));
}

// ===== algorithm and chunk size =====

#[test]
fn invalid_algorithm_touches_no_device() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    counters.reset_operations();

    r.set_algorithm(Algorithm::Invalid);
    let mut f = field(4, 4);
    let err = r.render_object_wave(&cloud(2), &mut f).unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidAlgorithm);
    assert_eq!(counters.device_operations(), 0);
    assert!(!r.error_message().is_empty());
}

#[test]
fn invalid_algorithm_fails_even_when_closed() {
    let mut r = Renderer::new(CpuBackend::new());
    r.set_algorithm(Algorithm::Invalid);
    let err = r.render_object_wave(&cloud(1), &mut field(2, 2)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidAlgorithm);
}

#[test]
fn chunk_size_set_before_open_is_kept() {
    let mut r = Renderer::new(CpuBackend::new().with_max_object_size(1 << 16));
    r.set_chunk_size(5);
    assert_eq!(r.chunk_size(), 5);
    r.open(None).unwrap();
    assert_eq!(r.chunk_size(), 5);
    r.open(None).unwrap();
    assert_eq!(r.chunk_size(), 5);
}

#[test]
fn config_chunk_size_and_algorithm_apply() {
    let cfg = RendererConfig { chunk_size: 12, ..RendererConfig::large_scene() };
    let mut r = Renderer::with_config(CpuBackend::new(), cfg);
    assert_eq!(r.algorithm(), Algorithm::MultiPass);
    r.open(None).unwrap();
    assert_eq!(r.chunk_size(), 12);
}

#[test]
fn config_edits_apply_on_reopen() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();

    r.config_mut().chunk_size = 7;
    r.config_mut().algorithm = Algorithm::MultiPass;
    assert_eq!(r.algorithm(), Algorithm::MultiPass);
    r.open(None).unwrap();
    assert_eq!(r.chunk_size(), 7);

    // 2 points against 4x4 samples: field axis, 16 samples in chunks of 7.
    r.render_object_wave(&cloud(2), &mut field(4, 4)).unwrap();
    assert_eq!(counters.launches().len(), 3);

    // set_chunk_size is kept in the config, so reopening does not undo it.
    r.set_chunk_size(5);
    r.open(None).unwrap();
    assert_eq!(r.chunk_size(), 5);
    assert_eq!(r.config().chunk_size, 5);
}

#[test]
fn oversize_fixed_chunk_fails_at_allocation() {
    // 3200 B objects hold 400 samples; a 1000-sample chunk cannot be
    // allocated.
    let mut r = Renderer::new(CpuBackend::new().with_max_object_size(3200));
    r.set_chunk_size(1000);
    r.open(None).unwrap();
    assert_eq!(r.chunk_size(), 1000);

    r.set_algorithm(Algorithm::MultiPass);
    let mut f = field(40, 50);
    let err = r.render_object_wave(&cloud(2), &mut f).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Device);
    assert!(matches!(err, holoren_gpu::RenderError::Partial { completed: 0, .. }));
}

#[test]
fn description_is_stable() {
    let mut seen = Vec::new();
    for alg in Algorithm::ALL {
        let d = alg.description();
        assert!(!d.is_empty());
        assert_eq!(d, alg.to_string());
        assert!(!seen.contains(&d));
        seen.push(d);
    }
}
