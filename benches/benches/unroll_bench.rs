use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nexus_core::{SequenceUnroller, UnrolledSequenceExt};
use nexus_types::{
    AcquisitionParameter, AdcEvent, Axis, BlockSequence, GradientEvent, RfEvent, SequenceBlock,
};

const DWELL: f64 = 5e-8;
const LIMITS: [f64; 4] = [200.0, 6000.0, 6000.0, 6000.0];

/// Спин-эхо: 90°, градиент чтения, 180°, окно АЦП.
fn spin_echo(repetitions: usize) -> BlockSequence {
    let mut seq = BlockSequence::default();

    for _ in 0..repetitions {
        seq.push(SequenceBlock::new(1e-4).with_rf(RfEvent::block_pulse(50.0, 5e-5)));
        seq.push(
            SequenceBlock::new(3e-4)
                .with_gradient(Axis::X, GradientEvent::trapezoid(500.0, 2e-5, 2e-4, 2e-5)),
        );
        seq.push(SequenceBlock::new(1e-4).with_rf(RfEvent::block_pulse(100.0, 5e-5)));
        seq.push(
            SequenceBlock::new(1.2e-3)
                .with_gradient(Axis::X, GradientEvent::trapezoid(500.0, 2e-5, 1.05e-3, 2e-5))
                .with_adc(AdcEvent::new(100, 1e-5)),
        );
    }

    seq
}

fn bench_unroll(c: &mut Criterion) {
    let params = AcquisitionParameter::default();
    let mut group = c.benchmark_group("unroll");

    for repetitions in [1usize, 8, 32] {
        let seq = spin_echo(repetitions);
        let mut unroller = SequenceUnroller::new(DWELL, 1.0, 1.0, LIMITS);
        let samples = unroller.unroll(&seq, &params).map_or(0, |u| u.sample_count);

        group.throughput(Throughput::Elements(samples));
        group.bench_with_input(
            BenchmarkId::from_parameter(repetitions),
            &seq,
            |b, seq| {
                b.iter(|| black_box(unroller.unroll(seq, &params)));
            },
        );
    }

    group.finish();
}

fn bench_to_le_bytes(c: &mut Criterion) {
    let params = AcquisitionParameter::default();
    let mut unroller = SequenceUnroller::new(DWELL, 1.0, 1.0, LIMITS);
    let Ok(unrolled) = unroller.unroll(&spin_echo(8), &params) else {
        return;
    };

    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Bytes(unrolled.total_bytes() as u64));
    group.bench_function("to_le_bytes", |b| {
        b.iter(|| black_box(unrolled.to_le_bytes()));
    });
    group.finish();
}

criterion_group!(benches, bench_unroll, bench_to_le_bytes);
criterion_main!(benches);
