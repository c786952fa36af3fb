//! Wire-format and buffer-capacity constants.
//!
//! Layout facts live here once; the codec and the tests both read them.
//! Compile-time assertions pin the arithmetic relations between the
//! payload layouts so a stray edit cannot silently desynchronize them.

use static_assertions::{const_assert, const_assert_eq};

// ─── Framing ────────────────────────────────────────────────────────

/// Frame synchronization byte.
pub const SYNC: u8 = 0xA5;

/// Bytes before the payload: SYNC + TYPE/VER + LEN.
pub const FRAME_HEADER_LEN: usize = 3;

/// Trailing CRC16, little-endian.
pub const FRAME_CRC_LEN: usize = 2;

/// Total framing overhead around a payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_LEN + FRAME_CRC_LEN;

/// CRC16/CCITT-FALSE polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// CRC16/CCITT-FALSE initial value.
pub const CRC16_INIT: u16 = 0xFFFF;

// ─── Payload layouts ────────────────────────────────────────────────

/// EVENT24 payload: dt_us u16 | t_abs u32 | flags0 | flags1 | dvdt_q15 i16
/// | mono_q8 | snr_q8 | fit_err_q8 | rpm_hint_q u16 | score_q8 | seq.
pub const EVENT24_PAYLOAD_LEN: usize = 17;

/// EVENT16 payload: EVENT24 minus t_abs, fit_err_q8 and rpm_hint_q.
pub const EVENT16_PAYLOAD_LEN: usize = 10;

/// SUMMARY16 payload (legacy).
pub const SUMMARY16_PAYLOAD_LEN: usize = 11;

/// SUMMARY24 payload (legacy).
pub const SUMMARY24_PAYLOAD_LEN: usize = 19;

/// FILTER_STATS payload.
pub const FILTER_STATS_PAYLOAD_LEN: usize = 19;

/// LINK_STATS payload.
pub const LINK_STATS_PAYLOAD_LEN: usize = 19;

/// IMPULSE_TEST sample payload.
pub const IMPULSE_SAMPLE_PAYLOAD_LEN: usize = 11;

/// IMPULSE_TEST marker payload.
pub const IMPULSE_MARKER_PAYLOAD_LEN: usize = 5;

// EVENT16 drops t_abs (4), fit_err_q8 (1) and rpm_hint_q (2) from EVENT24.
const_assert_eq!(EVENT24_PAYLOAD_LEN - EVENT16_PAYLOAD_LEN, 7);
// LEN is a single byte; every known payload must fit.
const_assert!(EVENT24_PAYLOAD_LEN <= u8::MAX as usize);
const_assert!(SUMMARY24_PAYLOAD_LEN <= u8::MAX as usize);

// ─── Pipeline capacities ────────────────────────────────────────────

/// Number of hall channels.
pub const SENSOR_COUNT: usize = 2;

/// Number of pool classes.
pub const POOL_COUNT: usize = 3;

/// Sliding cycle-detector window per sensor.
pub const CYCLE_WINDOW_LEN: usize = 3;

/// TruthProbe pool-tail capacity per sensor.
pub const POOL_TAIL_CAP: usize = 6;

/// TruthProbe reject-trace capacity.
pub const REJECT_TRACE_CAP: usize = 30;

/// Events without a single emitted cycle before the reject trace arms.
pub const TRACE_ARM_EVENT_COUNT: u64 = 32;

/// RPM jitter window capacity (runtime length is configured, bounded here).
pub const RPM_JITTER_CAP: usize = 16;

const_assert_eq!(CYCLE_WINDOW_LEN, POOL_COUNT);
