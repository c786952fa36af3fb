//! Pipeline micro-benchmark.
//!
//! Measures throughput of the individual stages and the full chain:
//! - CRC16 over an EVENT24 frame
//! - Frame decode (push_bytes + drain)
//! - Canonicalize one EVENT24 payload
//! - Full feed_event through cycles → tiles → compass → movement
//! - One gate evaluation

use criterion::{Criterion, criterion_group, criterion_main};

use rotor_common::types::{ActionIntent, LockState, PacketType};
use rotor_core::codec::crc16_ccitt_false;
use rotor_core::codec::event::canonicalize;
use rotor_core::codec::frame::{FrameCodec, encode_frame};
use rotor_core::gate::{ActionGate, GateInput};
use rotor_core::pipeline::Pipeline;
use rotor_common::config::GateConfig;

fn event24(sensor: u8, to_pool: u8, t_abs_us: u32) -> Vec<u8> {
    let mut p = vec![0u8; 17];
    p[0..2].copy_from_slice(&1000u16.to_le_bytes());
    p[2..6].copy_from_slice(&t_abs_us.to_le_bytes());
    p[6] = (sensor & 1) << 3;
    p[7] = (3 << 6) | ((to_pool & 3) << 4);
    p
}

fn bench_crc(c: &mut Criterion) {
    let frame = encode_frame(PacketType::Event24, 0, &event24(0, 1, 0)).unwrap();
    c.bench_function("crc16_event24_frame", |b| {
        b.iter(|| crc16_ccitt_false(std::hint::black_box(&frame[1..])))
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let frame = encode_frame(PacketType::Event24, 0, &event24(0, 1, 0)).unwrap();
    c.bench_function("frame_decode", |b| {
        let mut codec = FrameCodec::new();
        b.iter(|| {
            codec.push_bytes(std::hint::black_box(&frame));
            codec.drain().count()
        })
    });
}

fn bench_canonicalize(c: &mut Criterion) {
    let payload = event24(0, 1, 0);
    c.bench_function("canonicalize_event24", |b| {
        b.iter(|| canonicalize(std::hint::black_box(&payload)))
    });
}

fn bench_feed_event(c: &mut Criterion) {
    c.bench_function("pipeline_feed_event", |b| {
        let mut p = Pipeline::with_profile("bench").unwrap();
        let mut t = 0u32;
        let pools = [1u8, 0, 2];
        let mut i = 0usize;
        b.iter(|| {
            let payload = event24(0, pools[i % 3], t);
            i += 1;
            t = t.wrapping_add(1000);
            p.feed_event(std::hint::black_box(&payload))
        })
    });
}

fn bench_gate_evaluate(c: &mut Criterion) {
    c.bench_function("gate_evaluate", |b| {
        let mut gate = ActionGate::new(GateConfig::default());
        let input = GateInput {
            now_ms: 100,
            coherence_score: 0.8,
            lock_state: LockState::Locked,
            data_age_ms: 5,
            action_intent: ActionIntent::Hold,
            intent_source: "bench".to_string(),
            ..GateInput::default()
        };
        b.iter(|| gate.evaluate(std::hint::black_box(&input)))
    });
}

criterion_group!(
    benches,
    bench_crc,
    bench_frame_decode,
    bench_canonicalize,
    bench_feed_event,
    bench_gate_evaluate
);
criterion_main!(benches);
