//! End-to-end tests over the full chain: framed bytes in, gate decisions
//! out. Exercises the wire codec, the cycle/tile/compass/movement chain,
//! the tactile and awareness layers, and the execution gate together.

use rotor_common::config::CoreConfig;
use rotor_common::types::{
    ActionIntent, AwReason, AwState, CycleKind, GateDecision, GateState, LockState, PacketType,
    Pool, RejectReason, Sensor,
};
use rotor_core::codec::frame::{FrameCodec, encode_frame};
use rotor_core::pipeline::{Pipeline, TickInput};

/// EVENT24 payload with the given routing fields.
fn event24(sensor: u8, from_pool: u8, to_pool: u8, t_abs_us: u32, dt_us: u16) -> Vec<u8> {
    let mut p = vec![0u8; 17];
    p[0..2].copy_from_slice(&dt_us.to_le_bytes());
    p[2..6].copy_from_slice(&t_abs_us.to_le_bytes());
    p[6] = (sensor & 1) << 3;
    p[7] = ((from_pool & 3) << 6) | ((to_pool & 3) << 4);
    p
}

fn tick(now_s: f64, now_ms: u64) -> TickInput {
    TickInput {
        now_s,
        now_ms,
        data_age_ms: 5,
        ..TickInput::default()
    }
}

/// Stream steady CW rotation into the pipeline; returns the end time [µs].
fn drive_rotation(p: &mut Pipeline, start_us: u32, cycles: usize) -> u32 {
    let mut t = start_us;
    for _ in 0..cycles {
        for pool in [1u8, 0, 2] {
            p.feed_event(&event24(0, 3, pool, t, 1000));
            p.feed_event(&event24(1, 3, pool, t + 500, 1000));
            t += 2000;
        }
    }
    t
}

// ─── S1: valid cycle_up ─────────────────────────────────────────────

#[test]
fn s1_valid_cycle_up() {
    let mut p = Pipeline::with_profile("bench").unwrap();
    let r1 = p.feed_event(&event24(0, 3, 1, 0, 1000));
    let r2 = p.feed_event(&event24(0, 3, 0, 1000, 1000));
    let r3 = p.feed_event(&event24(0, 3, 2, 2000, 1000));

    assert!(r1.cycle.is_none());
    assert!(r2.cycle.is_none());
    let cycle = r3.cycle.expect("exactly one cycle after three events");
    assert_eq!(cycle.kind, CycleKind::Up);
    assert_eq!(cycle.sensor, Sensor::A);
    assert_eq!(cycle.dt_us, 2000);
    assert_eq!(cycle.t_center_us, 1000);

    let probe = p.cycle_probe();
    assert_eq!(probe.cycles_total, 1);
    assert_eq!(probe.events_total, 3);
    assert_eq!(probe.rejects.count(RejectReason::WindowNotReady), 2);
    assert_eq!(probe.rejects.total(), 2);
}

// ─── S2: CRC corruption resync ──────────────────────────────────────

#[test]
fn s2_crc_corruption_resync() {
    let frame_a = encode_frame(PacketType::Event24, 0, &event24(0, 3, 1, 0, 1000)).unwrap();
    let frame_b = encode_frame(PacketType::Event24, 0, &event24(0, 3, 0, 1000, 1000)).unwrap();

    // A candidate that starts with SYNC and parses a plausible LEN but
    // fails the CRC.
    let mut corrupted = encode_frame(PacketType::Event24, 0, &event24(1, 3, 2, 500, 1000)).unwrap();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0x5A;

    let mut stream = Vec::new();
    stream.extend_from_slice(&frame_a);
    stream.extend_from_slice(&corrupted);
    stream.extend_from_slice(&frame_b);

    let mut codec = FrameCodec::new();
    codec.push_bytes(&stream);
    let frames: Vec<_> = codec.drain().collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload, event24(0, 3, 1, 0, 1000));
    assert_eq!(frames[1].payload, event24(0, 3, 0, 1000, 1000));
    assert_eq!(codec.stats().crc_errors, 1);
}

// ─── S3–S5 are covered against the gate directly in src/gate.rs; here
// the same contracts are driven end-to-end through the pipeline. ─────

#[test]
fn s3_gate_activation_through_pipeline() {
    let mut p = Pipeline::with_profile("bench").unwrap();
    let t_end = drive_rotation(&mut p, 0, 150);
    let wall = t_end as f64 * 1e-6;

    let r = p.tick(&tick(wall, 100));
    assert_eq!(r.gate.state, GateState::Observe);
    assert!(r.coherence > 0.5, "steady rotation must be coherent");

    let r = p.tick(&TickInput {
        arm_signal: true,
        ..tick(wall + 0.01, 200)
    });
    assert_eq!(r.gate.state, GateState::Armed);

    let r = p.tick(&TickInput {
        action_intent: ActionIntent::Activate,
        intent_source: "host".to_string(),
        ..tick(wall + 0.02, 300)
    });
    assert_eq!(r.gate.state, GateState::Active);
    assert_eq!(r.gate.decision, GateDecision::AllowActive);
    assert!(r.gate.allowed);
    assert!(r.gate.intent_accepted);
}

#[test]
fn s4_release_dominates_from_active() {
    let mut p = Pipeline::with_profile("bench").unwrap();
    let t_end = drive_rotation(&mut p, 0, 150);
    let wall = t_end as f64 * 1e-6;

    p.tick(&tick(wall, 100));
    p.tick(&TickInput {
        arm_signal: true,
        ..tick(wall + 0.01, 200)
    });
    let r = p.tick(&TickInput {
        action_intent: ActionIntent::Activate,
        ..tick(wall + 0.02, 300)
    });
    assert_eq!(r.gate.state, GateState::Active);

    let r = p.tick(&TickInput {
        action_intent: ActionIntent::Release,
        ..tick(wall + 0.03, 400)
    });
    assert_eq!(r.gate.state, GateState::Fallback);
    assert_eq!(r.gate.decision, GateDecision::ForceFallback);
    assert!(!r.gate.allowed);
}

#[test]
fn s5_stale_data_forces_fallback() {
    let mut p = Pipeline::with_profile("bench").unwrap();
    let t_end = drive_rotation(&mut p, 0, 150);
    let wall = t_end as f64 * 1e-6;
    let stale = p.config().gate.stale_data_threshold_ms;

    p.tick(&tick(wall, 100));
    let r = p.tick(&TickInput {
        data_age_ms: stale + 1,
        ..tick(wall + 0.01, 200)
    });
    assert_eq!(r.gate.state, GateState::Fallback);
    assert_eq!(r.gate.reason, "data_stale");
}

// ─── S6: latch then drop ────────────────────────────────────────────

#[test]
fn s6_mdi_latch_then_drop() {
    let mut p = Pipeline::with_profile("bench").unwrap();

    // One pool change on sensor A latches mode C.
    p.feed_event(&event24(0, 3, 1, 0, 1000));
    p.feed_event(&event24(0, 3, 2, 1000, 1000));
    let r = p.tick(&tick(0.05, 50));
    assert!(r.origin.mdi_latch_set);
    assert_eq!(r.origin.aw_state, AwState::PreMovement);
    let acc = r.origin.mdi_micro_acc;
    assert!(acc >= 1.0);

    // Keep tactile events flowing (same pool, no change) and advance past
    // mdi_latch_drop_s without any confirmation.
    p.feed_event(&event24(0, 3, 2, 400_000, 1000));
    let r = p.tick(&tick(0.47, 470));
    assert!(!r.origin.mdi_latch_set);
    assert_eq!(r.origin.mdi_latch_reason, Some(AwReason::MdiLatchDropped));
    assert!((r.origin.mdi_micro_acc - acc * 0.5).abs() < 1e-9);
    assert!(matches!(r.origin.aw_state, AwState::Noise | AwState::Still));
}

// ─── Universal invariants ───────────────────────────────────────────

#[test]
fn framed_stream_end_to_end_matches_direct_feed() {
    // Feeding payloads through the frame codec must be equivalent to
    // feeding them directly.
    let mut direct = Pipeline::with_profile("bench").unwrap();
    let mut framed = Pipeline::with_profile("bench").unwrap();

    let mut stream = Vec::new();
    let mut payloads = Vec::new();
    let mut t = 0u32;
    for _ in 0..30 {
        for pool in [1u8, 0, 2] {
            let p = event24(0, 3, pool, t, 1000);
            stream.extend_from_slice(&encode_frame(PacketType::Event24, 0, &p).unwrap());
            payloads.push(p);
            t += 2000;
        }
    }

    for p in &payloads {
        direct.feed_event(p);
    }

    let mut codec = FrameCodec::new();
    // Ragged chunk boundaries.
    for chunk in stream.chunks(7) {
        codec.push_bytes(chunk);
        for frame in codec.drain() {
            framed.feed_frame(&frame);
        }
    }

    assert_eq!(direct.snapshot(), framed.snapshot());
}

#[test]
fn total_cycles_monotone_across_arbitrary_feeds() {
    let mut p = Pipeline::with_profile("bench").unwrap();
    let mut prev = 0.0;
    let mut t = 0u32;
    // Mix of valid cycles, repeats and rejects.
    let pools: [u8; 10] = [1, 1, 0, 2, 3, 2, 0, 1, 0, 2];
    for round in 0..50u32 {
        for (i, pool) in pools.iter().enumerate() {
            let res = p.feed_event(&event24((i % 2) as u8, 3, *pool, t, 1000));
            t += 1500 + (round % 7) * 100;
            assert!(res.movement_state.total_cycles_physical >= prev);
            prev = res.movement_state.total_cycles_physical;
        }
    }
}

#[test]
fn wire_round_trip_preserves_field_set() {
    let payload = event24(1, 2, 1, 123_456, 2500);
    let frame = encode_frame(PacketType::Event24, 0, &payload).unwrap();

    let mut codec = FrameCodec::new();
    codec.push_bytes(&frame);
    let decoded: Vec<_> = codec.drain().collect();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].payload, payload);

    let ev = rotor_core::codec::canonicalize(&decoded[0].payload).unwrap();
    assert_eq!(ev.sensor, Sensor::B);
    assert_eq!(ev.to_pool, Pool::N);
    assert_eq!(ev.from_pool, Some(Pool::S));
    assert_eq!(ev.t_abs_us, 123_456);
    assert_eq!(ev.dt_us, 2500);
}

#[test]
fn boundary_dt_bounds_exact() {
    let cfg = CoreConfig::from_name("bench").unwrap();
    let dt_min = cfg.pipeline.dt_min_us;

    // Window span exactly at dt_min: accepted.
    let mut p = Pipeline::new(cfg.clone());
    p.feed_event(&event24(0, 3, 1, 0, 100));
    p.feed_event(&event24(0, 3, 0, dt_min / 2, 100));
    let r = p.feed_event(&event24(0, 3, 2, dt_min, 100));
    assert!(r.cycle.is_some());

    // One microsecond below: DT_TOO_SMALL.
    let mut p = Pipeline::new(cfg);
    p.feed_event(&event24(0, 3, 1, 0, 100));
    p.feed_event(&event24(0, 3, 0, dt_min / 2, 100));
    let r = p.feed_event(&event24(0, 3, 2, dt_min - 1, 100));
    assert!(r.cycle.is_none());
    assert_eq!(
        p.cycle_probe().rejects.count(RejectReason::DtTooSmall),
        1
    );
}

#[test]
fn no_tiles_before_boot_median() {
    let cfg = CoreConfig::from_name("bench").unwrap();
    let boot = cfg.pipeline.boot_cycles_for_median;
    let mut p = Pipeline::new(cfg);

    let mut t = 0u32;
    let mut cycles_seen = 0usize;
    let mut tiles_seen = 0usize;
    while cycles_seen < boot {
        for pool in [1u8, 0, 2] {
            let r = p.feed_event(&event24(0, 3, pool, t, 1000));
            t += 2000;
            if r.cycle.is_some() {
                cycles_seen += 1;
            }
            tiles_seen += r.tiles_emitted.len();
        }
    }
    assert_eq!(tiles_seen, 0, "no tile may be emitted during boot learning");
}

#[test]
fn gate_logs_have_no_restricted_vocabulary_end_to_end() {
    let restricted = [
        "truth", "belief", "desire", "want", "feel", "think", "meaning", "semantic",
    ];
    let mut p = Pipeline::with_profile("bench").unwrap();
    let t_end = drive_rotation(&mut p, 0, 150);
    let wall = t_end as f64 * 1e-6;

    let intents = [
        ActionIntent::None,
        ActionIntent::Activate,
        ActionIntent::Hold,
        ActionIntent::Release,
        ActionIntent::None,
    ];
    for (i, intent) in intents.iter().enumerate() {
        let r = p.tick(&TickInput {
            action_intent: *intent,
            arm_signal: i == 1,
            intent_source: "bench".to_string(),
            ..tick(wall + i as f64 * 0.01, 100 * (i as u64 + 1))
        });
        for entry in &r.gate.log_entries {
            let line = entry.render().to_lowercase();
            for token in restricted {
                assert!(!line.contains(token), "restricted token {token:?} in {line}");
            }
        }
    }
}

#[test]
fn awareness_reaches_movement_under_sustained_rotation() {
    let mut p = Pipeline::with_profile("bench").unwrap();

    // Interleave event feeding with ticks so the awareness layer sees the
    // displacement build up on a realistic timeline.
    let mut t_us = 0u32;
    let mut reached_movement = false;
    for step in 0..100u32 {
        t_us = drive_rotation(&mut p, t_us, 3);
        let now_s = t_us as f64 * 1e-6;
        let r = p.tick(&tick(now_s, (step as u64 + 1) * 10));
        if r.origin.aw_state == AwState::Movement {
            reached_movement = true;
            break;
        }
    }
    assert!(reached_movement, "sustained rotation must reach MOVEMENT");
    let snap = p.snapshot();
    assert!(snap.movement.direction_lock_state.is_engaged());
    assert!(snap.origin.origin_commit_set);
}

#[test]
fn idle_stream_decays_to_still_and_unlocked() {
    let mut p = Pipeline::with_profile("bench").unwrap();
    let t_end = drive_rotation(&mut p, 0, 150);
    assert_eq!(p.snapshot().movement.direction_lock_state, LockState::Locked);

    // Advance device time far past the idle unlock horizon, no new events.
    let idle_us = p.config().pipeline.idle_unlock_time_us;
    let wall = t_end as f64 * 1e-6;
    let mut now = t_end as u64;
    for step in 1..=5u64 {
        now += idle_us;
        p.tick(&TickInput {
            device_time_us: Some(now),
            ..tick(wall + step as f64, 1000 * step)
        });
    }
    let snap = p.snapshot();
    assert_eq!(snap.movement.rpm_est, 0.0);
    assert_eq!(snap.movement.direction_lock_state, LockState::Unlocked);
}
