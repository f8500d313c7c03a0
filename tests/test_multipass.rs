// tests/test_multipass.rs - Strategy equivalence, pass ordering, partial
// failure and hologram recording, on the reference device.
//
// The reference device computes each launch in f64 and accumulates into f32
// buffers, so strategies that split the point cloud differently can differ
// by f32 rounding of the partial sums. Comparisons use a tolerance relative
// to the largest sample magnitude.

use holoren_gpu::cpu::{render_reference, CpuBackend};
use holoren_gpu::device::KernelFlavor;
use holoren_gpu::{
    hologram, Algorithm, ErrorCode, HologramMethod, OpticalField, PointCloud, PointSource, ReferenceWave,
    RenderError, Renderer, RendererConfig,
};
use num_complex::Complex32;

fn cloud(n: usize) -> PointCloud {
    (0..n)
        .map(|i| {
            let t = i as f32 / n.max(1) as f32;
            PointSource::new((t - 0.5) * 4e-4, (0.5 - t) * 2e-4, -5e-3 - t * 2e-3, 0.5 + t, 6.0 * t)
        })
        .collect()
}

fn field(rows: usize, cols: usize) -> OpticalField {
    OpticalField::new(rows, cols, 8e-6, 633e-9)
}

fn max_norm(f: &OpticalField) -> f32 {
    f.as_slice().iter().map(|c| c.norm()).fold(0.0, f32::max)
}

fn assert_fields_close(a: &OpticalField, b: &OpticalField) {
    let tol = 1e-4 * max_norm(b).max(1.0);
    for (i, (x, y)) in a.as_slice().iter().zip(b.as_slice()).enumerate() {
        assert!((x - y).norm() <= tol, "sample {i}: {x} vs {y} (tol {tol})");
    }
}

// ===== equivalence =====

#[test]
fn single_pass_matches_reference() {
    let points = cloud(20);
    let mut expected = field(16, 16);
    render_reference(points.as_slice(), &mut expected, 0.0);

    let mut r = Renderer::new(CpuBackend::new());
    r.open(None).unwrap();
    let mut got = field(16, 16);
    r.render_object_wave(&points, &mut got).unwrap();

    assert!(max_norm(&got) > 0.0);
    assert_fields_close(&got, &expected);
}

#[test]
fn all_strategies_agree_on_field_axis() {
    // 7 points (224 B) against 24x24 samples (4608 B): field axis.
    let points = cloud(7);
    let mut r = Renderer::new(CpuBackend::new());
    r.open(None).unwrap();

    let mut single = field(24, 24);
    r.render_object_wave(&points, &mut single).unwrap();

    r.set_chunk_size(50);
    for alg in Algorithm::ALL.into_iter().filter(|a| a.is_multi_pass()) {
        r.set_algorithm(alg);
        let mut f = field(24, 24);
        r.render_object_wave(&points, &mut f).unwrap_or_else(|e| panic!("{alg}: {e}"));
        assert_fields_close(&f, &single);
    }
}

#[test]
fn all_strategies_agree_on_points_axis() {
    // 40 points (1280 B) against 6x6 samples (288 B): points axis.
    let points = cloud(40);
    let mut r = Renderer::new(CpuBackend::new());
    r.open(None).unwrap();

    let mut single = field(6, 6);
    r.render_object_wave(&points, &mut single).unwrap();

    r.set_chunk_size(9);
    for alg in Algorithm::ALL.into_iter().filter(|a| a.is_multi_pass()) {
        r.set_algorithm(alg);
        let mut f = field(6, 6);
        f.fill(Complex32::new(9.0, 9.0));
        r.render_object_wave(&points, &mut f).unwrap_or_else(|e| panic!("{alg}: {e}"));
        assert_fields_close(&f, &single);
    }
}

// ===== pass structure =====

#[test]
fn points_axis_runs_ceil_n_over_c_ascending_passes() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    r.set_algorithm(Algorithm::MultiPass);
    r.set_chunk_size(3);

    // 10 points, 2x2 field.
    let mut f = field(2, 2);
    r.render_object_wave(&cloud(10), &mut f).unwrap();

    let launches = counters.launches();
    let point_ranges: Vec<_> = launches.iter().map(|l| l.points.clone()).collect();
    assert_eq!(point_ranges, vec![0..3, 3..6, 6..9, 9..10]);
    assert!(launches.iter().all(|l| l.samples == (0..4)));

    // Every point covered exactly once.
    let mut covered = vec![0; 10];
    for range in point_ranges {
        for i in range {
            covered[i] += 1;
        }
    }
    assert!(covered.iter().all(|&c| c == 1));
    assert_eq!(counters.live_buffers(), 0);
}

#[test]
fn variants_launch_their_kernel_flavor() {
    let backend = CpuBackend::new();
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    r.set_chunk_size(32);

    let cases = [
        (Algorithm::SinglePass, KernelFlavor::Standard),
        (Algorithm::MultiPass, KernelFlavor::Standard),
        (Algorithm::MultiPassCpu, KernelFlavor::Cpu),
        (Algorithm::MultiPassNative, KernelFlavor::Native),
        (Algorithm::MultiPassAligned, KernelFlavor::Standard),
    ];
    for (alg, flavor) in cases {
        counters.reset_operations();
        r.set_algorithm(alg);
        r.render_object_wave(&cloud(2), &mut field(8, 8)).unwrap();
        assert!(counters.launches().iter().all(|l| l.flavor == flavor), "{alg}");
    }
}

#[test]
fn aligned_variant_rounds_chunks_to_alignment() {
    // 256-byte alignment and 8-byte samples: chunks are whole multiples of
    // 32 samples.
    let backend = CpuBackend::new().with_alignment(256);
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    r.set_algorithm(Algorithm::MultiPassAligned);
    r.set_chunk_size(100);

    let mut f = field(10, 30);
    r.render_object_wave(&cloud(1), &mut f).unwrap();

    let starts: Vec<_> = counters.launches().iter().map(|l| l.samples.start).collect();
    assert_eq!(starts, vec![0, 96, 192, 288]);
}

#[test]
fn aligned_variant_keeps_chunk_below_one_unit() {
    let backend = CpuBackend::new().with_alignment(256);
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    r.set_algorithm(Algorithm::MultiPassAligned);
    r.set_chunk_size(5);

    let points = cloud(1);
    let mut f = field(10, 10);
    r.render_object_wave(&points, &mut f).unwrap();

    let launches = counters.launches();
    assert_eq!(launches.len(), 20);
    assert!(launches.iter().all(|l| l.samples.len() == 5));

    let mut expected = field(10, 10);
    render_reference(points.as_slice(), &mut expected, 0.0);
    assert_fields_close(&f, &expected);
}

#[test]
fn oversize_point_cloud_is_batched_per_pass() {
    // Objects of 128 B hold 4 points or 16 samples. 6 points (192 B) are
    // smaller than 64 samples (512 B), so the field is chunked and the
    // points are batched inside every pass.
    let backend = CpuBackend::new().with_max_object_size(128);
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    assert_eq!(r.chunk_size(), 4);
    r.set_chunk_size(16);
    r.set_algorithm(Algorithm::MultiPass);

    let points = cloud(6);
    let mut f = field(8, 8);
    r.render_object_wave(&points, &mut f).unwrap();

    let launches = counters.launches();
    assert_eq!(launches.len(), 4 * 2);
    assert_eq!(launches[0].points, 0..4);
    assert_eq!(launches[1].points, 4..6);

    let mut expected = field(8, 8);
    render_reference(points.as_slice(), &mut expected, 0.0);
    assert_fields_close(&f, &expected);
}

// ===== partial failure =====

#[test]
fn failure_on_pass_k_keeps_earlier_slices() {
    let sentinel = Complex32::new(-7.0, 3.0);
    let points = cloud(2);
    let mut expected = field(8, 8);
    render_reference(points.as_slice(), &mut expected, 0.0);

    // 64 samples in chunks of 16 -> 4 passes, one launch each.
    for k in 0..4 {
        let mut r = Renderer::new(CpuBackend::new().fail_on_launch(k));
        r.open(None).unwrap();
        r.set_algorithm(Algorithm::MultiPass);
        r.set_chunk_size(16);

        let mut f = field(8, 8);
        f.fill(sentinel);
        let err = r.render_object_wave(&points, &mut f).unwrap_err();

        match &err {
            RenderError::Partial { completed, failed, total, .. } => {
                assert_eq!(*completed, k);
                assert_eq!(*failed, k + 1);
                assert_eq!(*total, 4);
            }
            other => panic!("expected a partial failure, got {other:?}"),
        }
        assert_eq!(err.code(), ErrorCode::Device);
        assert_eq!(r.error_code(), ErrorCode::Device);

        let done = k * 16;
        for (i, (got, want)) in f.as_slice().iter().zip(expected.as_slice()).enumerate() {
            if i < done {
                assert!((got - want).norm() <= 1e-4 * want.norm().max(1.0), "sample {i} of pass < {k}");
            } else {
                assert_eq!(*got, sentinel, "sample {i} of pass >= {k} was written");
            }
        }
    }
}

#[test]
fn points_axis_failure_keeps_sum_of_earlier_passes() {
    // 40 points (1280 B) against 6x6 samples (288 B): points axis. Chunks
    // of 9 points -> 5 passes, each a single launch over all 36 samples.
    let points = cloud(40);

    for k in 0..5 {
        let backend = CpuBackend::new().fail_on_launch(k);
        let counters = backend.counters();
        let mut r = Renderer::new(backend);
        r.open(None).unwrap();
        r.set_algorithm(Algorithm::MultiPass);
        r.set_chunk_size(9);

        let mut f = field(6, 6);
        f.fill(Complex32::new(-7.0, 3.0));
        let err = r.render_object_wave(&points, &mut f).unwrap_err();

        match &err {
            RenderError::Partial { completed, total, .. } => {
                assert_eq!(*completed, k);
                assert_eq!(*total, 5);
            }
            other => panic!("expected a partial failure, got {other:?}"),
        }
        assert_eq!(counters.live_buffers(), 0);

        // Only the points of the completed passes contributed.
        let mut expected = field(6, 6);
        render_reference(&points.as_slice()[..9 * k], &mut expected, 0.0);
        assert_fields_close(&f, &expected);
    }
}

#[test]
fn failed_pass_releases_its_buffers() {
    let backend = CpuBackend::new().fail_on_launch(1);
    let counters = backend.counters();
    let mut r = Renderer::new(backend);
    r.open(None).unwrap();
    r.set_algorithm(Algorithm::MultiPassNative);
    r.set_chunk_size(10);
    r.render_object_wave(&cloud(1), &mut field(5, 5)).unwrap_err();
    assert_eq!(counters.live_buffers(), 0);
    assert_eq!(counters.open_sessions(), 1);
}

// ===== hologram =====

#[test]
fn hologram_records_object_wave_against_reference() {
    let reference = ReferenceWave { amplitude: 2.0, angle_x_deg: 1.0, angle_y_deg: -0.5 };
    let points = cloud(5);

    for method in [HologramMethod::Interference, HologramMethod::Bipolar] {
        let cfg = RendererConfig { reference, hologram_method: method, ..Default::default() };
        let mut r = Renderer::with_config(CpuBackend::new(), cfg);
        r.open(None).unwrap();

        let mut got = field(12, 12);
        r.render_hologram(&points, &mut got).unwrap();

        let mut expected = field(12, 12);
        render_reference(points.as_slice(), &mut expected, 0.0);
        hologram::record(&mut expected, &reference, method);

        assert!(got.as_slice().iter().all(|c| c.im == 0.0));
        assert_fields_close(&got, &expected);
    }
}

#[test]
fn hologram_failure_leaves_error() {
    let mut r = Renderer::new(CpuBackend::new());
    let err = r.render_hologram(&cloud(1), &mut field(2, 2)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotOpen);
    assert_eq!(r.error_code(), ErrorCode::NotOpen);
}
