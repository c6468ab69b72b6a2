//! Evaluation and rendering benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use vswr_core::core::chart::PngRenderer;
use vswr_core::core::vswr::vswr_from_return_loss;
use vswr_core::{evaluate_vswr_range, ScanResult, Verdict, VswrPlot, VswrWindow};

fn sweep(points: u32) -> ScanResult {
    let pairs: Vec<(u32, f64)> = (0..points)
        .map(|i| {
            let offset = f64::from(i) / f64::from(points) - 0.5;
            (1_600_000 + i * 100, vswr_from_return_loss(-20.0 + 30.0 * offset * offset))
        })
        .collect();
    ScanResult::from_pairs(&pairs).unwrap()
}

fn evaluate_benchmark(c: &mut Criterion) {
    let result = sweep(4_096);

    let mut group = c.benchmark_group("evaluate");
    group.throughput(Throughput::Elements(result.len() as u64));

    group.bench_function("window", |b| {
        b.iter(|| black_box(evaluate_vswr_range(black_box(&result), 1_700_000, 1_900_000, 1.5)))
    });

    group.bench_function("return_loss", |b| {
        b.iter(|| {
            let total: f64 = (0..1_000).map(|i| vswr_from_return_loss(black_box(-f64::from(i) / 50.0))).sum();
            black_box(total)
        })
    });

    group.finish();
}

fn render_benchmark(c: &mut Criterion) {
    let result = sweep(51);
    let plot = VswrPlot::new("bench", &result, VswrWindow::new(1_601_000, 1_604_000), 1.5, Verdict::Pass);
    let renderer = PngRenderer::default();

    c.bench_function("render_plot", |b| b.iter(|| black_box(renderer.render(black_box(&plot)))));
}

criterion_group!(benches, evaluate_benchmark, render_benchmark);
criterion_main!(benches);
