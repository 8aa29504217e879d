use std::{f64::consts::PI, hint::black_box};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nexus_core::{cic_ddc, encode_digital, fir_ddc, DownconversionPipeline};
use nexus_types::{AcquisitionParameter, DdcMethod, Gate};

const FS: f64 = 20e6;
const F0: f64 = 2e6;

fn tone(len: usize) -> Vec<f64> {
    (0..len)
        .map(|n| (2.0 * PI * F0 * n as f64 / FS + 0.3).cos() * 1000.0)
        .collect()
}

fn bench_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("ddc");

    for len in [4_000usize, 40_000, 400_000] {
        let raw = tone(len);
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("fir", len), &raw, |b, raw| {
            b.iter(|| black_box(fir_ddc(raw, 200, 4, F0, FS)));
        });
        group.bench_with_input(BenchmarkId::new("cic", len), &raw, |b, raw| {
            b.iter(|| black_box(cic_ddc(raw, 200, 5, F0, FS)));
        });
    }

    group.finish();
}

fn bench_process_gate(c: &mut Criterion) {
    let len = 40_000;
    let ch0: Vec<i16> = tone(len)
        .iter()
        .map(|&v| encode_digital((v * 8.0) as i16, v > 0.0))
        .collect();
    let gate = Gate {
        channels: vec![ch0, vec![0; len]],
        sample_count: len,
        ..Default::default()
    };

    let mut group = c.benchmark_group("process_gate");
    group.throughput(Throughput::Elements(len as u64));

    for method in [DdcMethod::Fir, DdcMethod::Cic] {
        let params = AcquisitionParameter {
            larmor_frequency: F0,
            ddc_method: method,
            ..Default::default()
        };
        let Ok(pipeline) = DownconversionPipeline::new(&params, FS, vec![200.0 / 32768.0; 2])
        else {
            continue;
        };

        group.bench_function(method.to_string(), |b| {
            b.iter(|| black_box(pipeline.process_gate(&gate)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_filters, bench_process_gate);
criterion_main!(benches);
