use nexus_core::{
    copy_circular, decode_analog, decode_digital, encode_digital, fir_ddc, samples_to_le_bytes,
    RingBuffer, SequenceUnroller, UnrolledSequenceExt,
};
use nexus_types::{
    AcquisitionParameter, AdcEvent, Axis, BlockSequence, Complex64, ConsoleError, GradientEvent,
    RfEvent, SequenceBlock,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

// ===========================================================================
// Helpers
// ===========================================================================

const DWELL: f64 = 333e-9;

/// Блок 1 мкс с RF отсчётами [100, 200, 300] на несущей, равной частоте
/// дискретизации (несущая равна 1 на каждом отсчёте).
fn three_sample_block() -> (BlockSequence, AcquisitionParameter) {
    let signal = vec![
        Complex64::new(100.0, 0.0),
        Complex64::new(200.0, 0.0),
        Complex64::new(300.0, 0.0),
    ];
    let seq = BlockSequence::new(vec![
        SequenceBlock::new(1e-6).with_rf(RfEvent::new(signal, 1e-6))
    ]);
    let params = AcquisitionParameter {
        larmor_frequency: 1.0 / DWELL,
        ..Default::default()
    };
    (seq, params)
}

// ===========================================================================
// Развёртка
// ===========================================================================

#[test]
fn test_three_sample_block_end_to_end() {
    let (seq, params) = three_sample_block();
    let mut unroller = SequenceUnroller::new(DWELL, 1.0, 1.0, [32767.0; 4]);

    let out = unroller.unroll(&seq, &params).unwrap();

    assert_eq!(out.blocks.len(), 1);
    assert_eq!(out.blocks[0].len(), 12);

    let analog: Vec<i16> = out.blocks[0]
        .iter()
        .enumerate()
        .map(|(i, &v)| if i % 4 == 0 { v } else { decode_analog(v) })
        .collect();
    assert_eq!(analog, vec![100, 0, 0, 0, 200, 0, 0, 0, 300, 0, 0, 0]);

    // RF разблокировка на всё окно RF
    assert_eq!(out.digital(0, 3), vec![true; 3]);
    assert_eq!(
        out.blocks[0],
        vec![100, 0, 0, i16::MIN, 200, 0, 0, i16::MIN, 300, 0, 0, i16::MIN]
    );
    assert_eq!(out.sample_count, 3);
    assert_eq!(unroller.sample_count(), 3);
}

#[test]
fn test_amplitude_exceeded_is_reported() {
    let (seq, params) = three_sample_block();
    // Предел канала 0 ниже пика огибающей
    let mut unroller = SequenceUnroller::new(DWELL, 1.0, 1.0, [250.0, 1000.0, 1000.0, 1000.0]);

    match unroller.unroll(&seq, &params) {
        Err(ConsoleError::AmplitudeExceeded { channel, peak }) => {
            assert_eq!(channel, 0);
            assert!((peak - 1.2).abs() < 1e-12);
        }
        other => panic!("expected AmplitudeExceeded, got {other:?}"),
    }
}

#[test]
fn test_carrier_phase_continues_across_blocks() {
    // Один длинный импульс против двух половин подряд
    let whole = BlockSequence::new(vec![
        SequenceBlock::new(2e-6).with_rf(RfEvent::block_pulse(90.0, 2e-6))
    ]);
    let halves = BlockSequence::new(vec![
        SequenceBlock::new(1e-6).with_rf(RfEvent::block_pulse(90.0, 1e-6)),
        SequenceBlock::new(1e-6).with_rf(RfEvent::block_pulse(90.0, 1e-6)),
    ]);
    let params = AcquisitionParameter::default();
    let mut unroller = SequenceUnroller::new(5e-8, 1.0, 1.0, [200.0; 4]);

    let a = unroller.unroll(&whole, &params).unwrap();
    let b = unroller.unroll(&halves, &params).unwrap();

    let mut joined = b.analog(0, 0);
    joined.extend(b.analog(1, 0));
    assert_eq!(a.analog(0, 0), joined);
}

#[test]
fn test_sequence_bytes_match_blocks() {
    let seq = BlockSequence::new(vec![
        SequenceBlock::new(2e-6)
            .with_gradient(Axis::X, GradientEvent::trapezoid(50.0, 2e-7, 5e-7, 2e-7))
            .with_adc(AdcEvent::new(4, 1e-7)),
        SequenceBlock::new(1e-6),
    ]);
    let mut unroller = SequenceUnroller::new(5e-8, 1.0, 1.0, [200.0; 4]);

    let out = unroller
        .unroll(&seq, &AcquisitionParameter::default())
        .unwrap();
    let bytes = out.to_le_bytes();

    assert_eq!(bytes.len(), out.total_bytes());
    assert_eq!(bytes.len(), (40 + 20) * 4 * 2);
    assert_eq!(&bytes[..40 * 4 * 2], samples_to_le_bytes(&out.blocks[0]).as_slice());
    assert_eq!(out.adc_count, 1);
    assert_eq!(out.digital(0, 1).iter().filter(|&&b| b).count(), 8);
}

// ===========================================================================
// Цифровые сигналы
// ===========================================================================

#[test]
fn test_digital_roundtrip_random_samples() {
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..10_000 {
        let v: i16 = rng.gen();
        let bit: bool = rng.gen();
        let raw = encode_digital(v, bit);

        assert_eq!(decode_digital(raw), bit);
        assert_eq!(decode_analog(raw), v & !1);
    }
}

// ===========================================================================
// Кольцевой буфер
// ===========================================================================

#[test]
fn test_full_refill_pass_is_eight_chunks() {
    let source: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let mut ring = RingBuffer::new(1024, 128, 8).unwrap();
    let mut chunk = vec![0u8; ring.notify_size()];
    let mut chunks = 0;

    while ring.transferred() < ring.len() as u64 {
        copy_circular(&source, ring.transferred(), &mut chunk);
        let pos = ring.position();
        ring.write_at(pos, &chunk);
        ring.advance(chunk.len());
        chunks += 1;
    }

    assert_eq!(chunks, 8);
    assert_eq!(ring.transferred(), 1024);
    assert_eq!(ring.position(), 0);
    assert_eq!(ring.as_slice(), &source[..1024]);
}

// ===========================================================================
// DDC
// ===========================================================================

#[test]
fn test_fir_ddc_of_noisy_tone() {
    let mut rng = StdRng::seed_from_u64(42);
    let fs = 20e6;
    let f0 = 2e6;
    let raw: Vec<f64> = (0..8000)
        .map(|k| {
            (2.0 * std::f64::consts::PI * f0 * k as f64 / fs).cos() + rng.gen_range(-0.1..0.1)
        })
        .collect();

    let out = fir_ddc(&raw, 50, 4, f0, fs);
    assert_eq!(out.len(), 8000 / 50);

    // Без двух неполных окон с каждого края
    let full = &out[2..out.len() - 2];
    let gain = full.iter().map(|v| v.norm()).sum::<f64>() / full.len() as f64;

    assert!((gain - 1.0).abs() < 0.02, "gain {gain}");
}
