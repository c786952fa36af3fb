//! Event payload views, flag decoding, canonicalization.
//!
//! EVENT24 payload (17 B):
//! `dt_us:u16 | t_abs:u32 | flags0 | flags1 | dvdt_q15:i16 | mono_q8 |
//! snr_q8 | fit_err_q8 | rpm_hint_q:u16 | score_q8 | seq`.
//! EVENT16 (10 B) drops t_abs, fit_err_q8 and rpm_hint_q.
//!
//! Canonicalization enforces the output contract: `sensor ∈ {A,B}` and
//! `to_pool ∈ {NEU,N,S}`, or the event is rejected with a typed reason.
//! It never panics; malformed input is a value, not an error path.
//!
//! The non-event packet types the core routes onward (summaries, filter
//! and link statistics, impulse test) get typed views here so external
//! sinks receive records instead of raw bytes.

use rotor_common::consts::{
    EVENT16_PAYLOAD_LEN, EVENT24_PAYLOAD_LEN, FILTER_STATS_PAYLOAD_LEN, IMPULSE_MARKER_PAYLOAD_LEN,
    IMPULSE_SAMPLE_PAYLOAD_LEN, LINK_STATS_PAYLOAD_LEN, SUMMARY16_PAYLOAD_LEN,
    SUMMARY24_PAYLOAD_LEN,
};
use rotor_common::types::{EventKind, Pool, RejectReason, Sensor};
use serde::{Deserialize, Serialize};

// ─── Flag bitfields ─────────────────────────────────────────────────

/// Decoded `flags0` / `flags1` bitfields.
///
/// `flags0`: bit7=pair, bits6..5=qlevel, bit4=polarity, bit3=sensor.
/// `flags1`: bits7..6=from_pool, bits5..4=to_pool, bits3..2=dir_hint,
/// bits1..0=edge_kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    pub pair: bool,
    pub qlevel: u8,
    pub polarity: bool,
    pub sensor_bit: u8,
    pub from_pool_raw: u8,
    pub to_pool_raw: u8,
    pub dir_hint: u8,
    pub edge_kind: u8,
}

/// Extract the packed bitfields from the two flag bytes.
#[inline]
pub const fn decode_flags(flags0: u8, flags1: u8) -> EventFlags {
    EventFlags {
        pair: (flags0 >> 7) & 1 != 0,
        qlevel: (flags0 >> 5) & 0x3,
        polarity: (flags0 >> 4) & 1 != 0,
        sensor_bit: (flags0 >> 3) & 1,
        from_pool_raw: (flags1 >> 6) & 0x3,
        to_pool_raw: (flags1 >> 4) & 0x3,
        dir_hint: (flags1 >> 2) & 0x3,
        edge_kind: flags1 & 0x3,
    }
}

// ─── Raw payload view ───────────────────────────────────────────────

/// Parsed event payload before canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub dt_us: u16,
    /// Absolute device timestamp; EVENT16 has none.
    pub t_abs_us: Option<u32>,
    pub flags0: u8,
    pub flags1: u8,
    pub dvdt_q15: i16,
    pub mono_q8: u8,
    pub snr_q8: u8,
    pub fit_err_q8: Option<u8>,
    pub rpm_hint_q: Option<u16>,
    pub score_q8: u8,
    pub seq: u8,
}

fn u16_le(p: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([p[off], p[off + 1]])
}

fn u32_le(p: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]])
}

fn i16_le(p: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([p[off], p[off + 1]])
}

/// Parse an EVENT24 payload. Returns `None` on wrong length.
pub fn parse_event24(p: &[u8]) -> Option<RawEvent> {
    if p.len() != EVENT24_PAYLOAD_LEN {
        return None;
    }
    Some(RawEvent {
        kind: EventKind::Event24,
        dt_us: u16_le(p, 0),
        t_abs_us: Some(u32_le(p, 2)),
        flags0: p[6],
        flags1: p[7],
        dvdt_q15: i16_le(p, 8),
        mono_q8: p[10],
        snr_q8: p[11],
        fit_err_q8: Some(p[12]),
        rpm_hint_q: Some(u16_le(p, 13)),
        score_q8: p[15],
        seq: p[16],
    })
}

/// Parse an EVENT16 payload. Returns `None` on wrong length.
pub fn parse_event16(p: &[u8]) -> Option<RawEvent> {
    if p.len() != EVENT16_PAYLOAD_LEN {
        return None;
    }
    Some(RawEvent {
        kind: EventKind::Event16,
        dt_us: u16_le(p, 0),
        t_abs_us: None,
        flags0: p[2],
        flags1: p[3],
        dvdt_q15: i16_le(p, 4),
        mono_q8: p[6],
        snr_q8: p[7],
        fit_err_q8: None,
        rpm_hint_q: None,
        score_q8: p[8],
        seq: p[9],
    })
}

// ─── Canonical event ────────────────────────────────────────────────

/// Canonicalized event record: the only event shape internal code sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub kind: EventKind,
    pub sensor: Sensor,
    pub to_pool: Pool,
    /// Reserved wire value 3 canonicalizes to `None`.
    pub from_pool: Option<Pool>,
    /// Absolute timestamp [µs]; 0 for EVENT16 (no device clock on the wire).
    pub t_abs_us: u64,
    pub dt_us: u32,
    pub flags: EventFlags,
}

/// Canonicalize an event payload of either layout.
///
/// Layout is inferred from the payload length; anything else rejects with
/// `NO_EVENT_KIND`. Only `to_pool` can fail range validation on a wire
/// ingest — the remaining reasons cover loosely-typed host-side loaders
/// that feed the same entry point.
pub fn canonicalize(payload: &[u8]) -> Result<CanonicalEvent, RejectReason> {
    let raw = match payload.len() {
        EVENT24_PAYLOAD_LEN => parse_event24(payload),
        EVENT16_PAYLOAD_LEN => parse_event16(payload),
        _ => None,
    }
    .ok_or(RejectReason::NoEventKind)?;
    canonicalize_raw(&raw)
}

/// Canonicalize an already-parsed [`RawEvent`].
pub fn canonicalize_raw(raw: &RawEvent) -> Result<CanonicalEvent, RejectReason> {
    let flags = decode_flags(raw.flags0, raw.flags1);
    let sensor = Sensor::from_u8(flags.sensor_bit).ok_or(RejectReason::SensorInvalid)?;
    let to_pool = Pool::from_u8(flags.to_pool_raw).ok_or(RejectReason::ToPoolOutOfRange)?;
    let from_pool = Pool::from_u8(flags.from_pool_raw);
    Ok(CanonicalEvent {
        kind: raw.kind,
        sensor,
        to_pool,
        from_pool,
        t_abs_us: raw.t_abs_us.map_or(0, u64::from),
        dt_us: raw.dt_us as u32,
        flags,
    })
}

// ─── Routed packet views ────────────────────────────────────────────

/// Legacy SUMMARY16 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary16 {
    pub window_ms: u16,
    pub emitted: u16,
    pub dropped: u16,
    pub lvl_strong: u8,
    pub lvl_normal: u8,
    pub lvl_weak: u8,
    pub tx_bytes: u16,
}

impl Summary16 {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() != SUMMARY16_PAYLOAD_LEN {
            return None;
        }
        Some(Self {
            window_ms: u16_le(p, 0),
            emitted: u16_le(p, 2),
            dropped: u16_le(p, 4),
            lvl_strong: p[6],
            lvl_normal: p[7],
            lvl_weak: p[8],
            tx_bytes: u16_le(p, 9),
        })
    }
}

/// Legacy SUMMARY24 payload. Short payloads are zero-padded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary24 {
    pub window_ms: u16,
    pub emitted: u16,
    pub dropped: u16,
    pub lvl_strong: u8,
    pub lvl_normal: u8,
    pub lvl_weak: u8,
    pub t_cross_rms_us_q: u8,
    pub ab_skew_p95_us_q: u8,
    pub queue_depth_max: u8,
    pub utilization_q: u8,
    pub rej_lowdvdt: u8,
    pub rej_nonmono: u8,
    pub rej_lowsnr: u8,
}

impl Summary24 {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() > SUMMARY24_PAYLOAD_LEN {
            return None;
        }
        let mut buf = [0u8; SUMMARY24_PAYLOAD_LEN];
        buf[..p.len()].copy_from_slice(p);
        let p = &buf[..];
        Some(Self {
            window_ms: u16_le(p, 0),
            emitted: u16_le(p, 2),
            dropped: u16_le(p, 4),
            lvl_strong: p[6],
            lvl_normal: p[7],
            lvl_weak: p[8],
            t_cross_rms_us_q: p[9],
            ab_skew_p95_us_q: p[10],
            queue_depth_max: p[11],
            utilization_q: p[12],
            rej_lowdvdt: p[13],
            rej_nonmono: p[14],
            rej_lowsnr: p[15],
        })
    }
}

/// Filter-layer statistics packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub window_ms: u16,
    pub events_emitted: u16,
    pub events_dropped: u16,
    pub events_considered: u16,
    pub events_rejected: u16,
    pub pct_strong: u8,
    pub pct_normal: u8,
    pub pct_weak: u8,
    pub drops_strong: u8,
    pub drops_normal: u8,
    pub drops_weak: u8,
    /// Token bucket level, signed, scale ×10.
    pub tokens_q8: i8,
    pub coalesce_win_ms: u8,
}

impl FilterStats {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() > FILTER_STATS_PAYLOAD_LEN {
            return None;
        }
        let mut buf = [0u8; FILTER_STATS_PAYLOAD_LEN];
        buf[..p.len()].copy_from_slice(p);
        let p = &buf[..];
        Some(Self {
            window_ms: u16_le(p, 0),
            events_emitted: u16_le(p, 2),
            events_dropped: u16_le(p, 4),
            events_considered: u16_le(p, 6),
            events_rejected: u16_le(p, 8),
            pct_strong: p[10],
            pct_normal: p[11],
            pct_weak: p[12],
            drops_strong: p[13],
            drops_normal: p[14],
            drops_weak: p[15],
            tokens_q8: p[16] as i8,
            coalesce_win_ms: p[17],
        })
    }

    /// Token bucket level as a float (−12.8 .. +12.7).
    #[inline]
    pub fn tokens(&self) -> f64 {
        self.tokens_q8 as f64 / 10.0
    }

    #[inline]
    pub fn drop_rate_pct(&self) -> f64 {
        if self.events_emitted == 0 {
            0.0
        } else {
            self.events_dropped as f64 * 100.0 / self.events_emitted as f64
        }
    }

    #[inline]
    pub fn reject_rate_pct(&self) -> f64 {
        if self.events_considered == 0 {
            0.0
        } else {
            self.events_rejected as f64 * 100.0 / self.events_considered as f64
        }
    }
}

/// Transport-layer statistics packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub window_ms: u16,
    pub frames_sent: u16,
    pub frames_failed: u16,
    pub bytes_sent: u32,
    pub avg_write_us: u16,
    pub uart_blocked_count: u8,
    pub queue_fill_pct: u8,
    pub queue_high_water: u16,
    pub event16_count: u8,
    pub event24_count: u8,
}

impl LinkStats {
    pub fn parse(p: &[u8]) -> Option<Self> {
        if p.len() > LINK_STATS_PAYLOAD_LEN {
            return None;
        }
        let mut buf = [0u8; LINK_STATS_PAYLOAD_LEN];
        buf[..p.len()].copy_from_slice(p);
        let p = &buf[..];
        Some(Self {
            window_ms: u16_le(p, 0),
            frames_sent: u16_le(p, 2),
            frames_failed: u16_le(p, 4),
            bytes_sent: u32_le(p, 6),
            avg_write_us: u16_le(p, 10),
            uart_blocked_count: p[12],
            queue_fill_pct: p[13],
            queue_high_water: u16_le(p, 14),
            event16_count: p[16],
            event24_count: p[17],
        })
    }

    #[inline]
    pub fn throughput_kbps(&self) -> f64 {
        if self.window_ms == 0 {
            0.0
        } else {
            self.bytes_sent as f64 * 8.0 / self.window_ms as f64
        }
    }

    #[inline]
    pub fn frame_success_rate(&self) -> f64 {
        let total = self.frames_sent as f64 + self.frames_failed as f64;
        if total == 0.0 {
            100.0
        } else {
            self.frames_sent as f64 * 100.0 / total
        }
    }
}

/// Micro-impulse test packet: sample or marker, discriminated by length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpulsePacket {
    Sample {
        ts_us: u32,
        hall0: i16,
        hall1: i16,
        /// 0..65535 maps to 0..360 degrees.
        virt_angle_q16: u16,
        marker: u8,
    },
    Marker {
        marker_code: u8,
        ts_us: u32,
    },
}

impl ImpulsePacket {
    pub fn parse(p: &[u8]) -> Option<Self> {
        match p.len() {
            IMPULSE_SAMPLE_PAYLOAD_LEN => Some(Self::Sample {
                ts_us: u32_le(p, 0),
                hall0: i16_le(p, 4),
                hall1: i16_le(p, 6),
                virt_angle_q16: u16_le(p, 8),
                marker: p[10],
            }),
            IMPULSE_MARKER_PAYLOAD_LEN => Some(Self::Marker {
                marker_code: p[0],
                ts_us: u32_le(p, 1),
            }),
            _ => None,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
