//! Per-sensor 3-point cycle detector with reject telemetry.
//!
//! A cycle is an ordered three-pool transition on one sensor covering the
//! full pool set {NEU, N, S}: `[N, NEU, S]` is up, `[S, NEU, N]` is down,
//! any other covering order is mixed. The window is cleared once a cycle
//! emits so consecutive cycles never share edge events; on a reject it
//! keeps sliding.
//!
//! The TruthProbe is the detector's self-diagnostic surface: per-reason
//! reject histogram, last-reject projection, per-sensor pool tails, and a
//! breadcrumb trace that arms when events keep arriving without a single
//! cycle — the first thing to read when a rig produces silence.

use rotor_common::consts::{
    CYCLE_WINDOW_LEN, POOL_TAIL_CAP, REJECT_TRACE_CAP, SENSOR_COUNT, TRACE_ARM_EVENT_COUNT,
};
use rotor_common::types::{CycleKind, Pool, RejectReason, Sensor};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::event::{CanonicalEvent, canonicalize};

// ─── Cycle record ───────────────────────────────────────────────────

/// One emitted cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub sensor: Sensor,
    pub kind: CycleKind,
    pub t_start_us: u64,
    pub t_end_us: u64,
    pub t_center_us: u64,
    pub dt_us: u64,
}

// ─── TruthProbe ─────────────────────────────────────────────────────

/// Small projection of a rejecting event, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectProjection {
    pub reason: RejectReason,
    /// Absent when canonicalization failed before the sensor was known.
    pub sensor: Option<Sensor>,
    pub to_pool: Option<Pool>,
    pub t_abs_us: u64,
    pub dt_us: u32,
}

/// Reject counts keyed by [`RejectReason`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectHistogram {
    counts: [u64; RejectReason::ALL.len()],
}

impl RejectHistogram {
    #[inline]
    fn slot(reason: RejectReason) -> usize {
        RejectReason::ALL
            .iter()
            .position(|r| *r == reason)
            .unwrap_or(0)
    }

    #[inline]
    pub fn increment(&mut self, reason: RejectReason) {
        self.counts[Self::slot(reason)] += 1;
    }

    #[inline]
    pub fn count(&self, reason: RejectReason) -> u64 {
        self.counts[Self::slot(reason)]
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Non-zero entries in display order.
    pub fn entries(&self) -> impl Iterator<Item = (RejectReason, u64)> + '_ {
        RejectReason::ALL
            .iter()
            .copied()
            .map(|r| (r, self.count(r)))
            .filter(|(_, n)| *n > 0)
    }
}

/// Dominant-failure classification over the probe counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeDiagnosis {
    /// No events seen yet.
    NoData,
    /// Cycles are being emitted.
    OkCyclesPresent,
    /// to_pool frequently out of range: bit-extract fault upstream.
    PoolOutOfRange,
    /// Pool value barely changes: stuck channel.
    PoolStuck,
    /// Pool set {NEU, N, S} never completes per sensor.
    PoolSetIncomplete,
    /// Pools look healthy but no cycle ever emits.
    CyclesNeverEmit,
}

impl ProbeDiagnosis {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NoData => "NO_DATA",
            Self::OkCyclesPresent => "OK_CYCLES_PRESENT",
            Self::PoolOutOfRange => "POOL_OUT_OF_RANGE",
            Self::PoolStuck => "POOL_STUCK",
            Self::PoolSetIncomplete => "POOL_SET_INCOMPLETE",
            Self::CyclesNeverEmit => "CYCLES_NEVER_EMIT",
        }
    }
}

/// Reject telemetry and first-cycle breadcrumbs.
#[derive(Debug, Clone, Default)]
pub struct TruthProbe {
    pub events_total: u64,
    pub cycles_total: u64,
    pub cycles_per_sensor: [u64; SENSOR_COUNT],
    pub rejects: RejectHistogram,
    pub last_reason: Option<RejectReason>,
    pub last_reject: Option<RejectProjection>,
    pool_tails: [heapless::Vec<Pool, POOL_TAIL_CAP>; SENSOR_COUNT],
    trace: heapless::Vec<RejectProjection, REJECT_TRACE_CAP>,
    trace_armed: bool,
}

/// Push into a bounded vec, evicting the oldest entry when full.
fn push_evict<T, const N: usize>(buf: &mut heapless::Vec<T, N>, value: T) {
    if buf.is_full() {
        buf.remove(0);
    }
    // Cannot fail: an element was just evicted if the buffer was full.
    let _ = buf.push(value);
}

impl TruthProbe {
    fn record_event(&mut self, sensor: Sensor, to_pool: Pool) {
        self.events_total += 1;
        push_evict(&mut self.pool_tails[sensor.index()], to_pool);
        if self.cycles_total == 0 && self.events_total >= TRACE_ARM_EVENT_COUNT {
            self.trace_armed = true;
        }
    }

    fn record_reject(&mut self, projection: RejectProjection) {
        self.rejects.increment(projection.reason);
        self.last_reason = Some(projection.reason);
        self.last_reject = Some(projection);
        if self.trace_armed {
            push_evict(&mut self.trace, projection);
        }
    }

    fn record_cycle(&mut self, sensor: Sensor) {
        self.cycles_total += 1;
        self.cycles_per_sensor[sensor.index()] += 1;
        self.trace_armed = false;
    }

    /// Recent to_pool values for one sensor, oldest first.
    #[inline]
    pub fn pool_tail(&self, sensor: Sensor) -> &[Pool] {
        &self.pool_tails[sensor.index()]
    }

    /// Breadcrumb trace of rejecting events (armed only while no cycle
    /// has ever emitted), oldest first.
    #[inline]
    pub fn trace(&self) -> &[RejectProjection] {
        &self.trace
    }

    #[inline]
    pub fn trace_armed(&self) -> bool {
        self.trace_armed
    }

    /// Classify the dominant failure mode from the counters.
    pub fn diagnose(&self) -> ProbeDiagnosis {
        if self.events_total == 0 {
            return ProbeDiagnosis::NoData;
        }
        if self.cycles_total > 0 {
            return ProbeDiagnosis::OkCyclesPresent;
        }
        let events = self.events_total as f64;
        if self.rejects.count(RejectReason::ToPoolOutOfRange) as f64 >= 0.2 * events {
            return ProbeDiagnosis::PoolOutOfRange;
        }
        if self.rejects.count(RejectReason::SamePoolRepeat) as f64 >= 0.5 * events {
            return ProbeDiagnosis::PoolStuck;
        }
        if self.rejects.count(RejectReason::SeqNotMatch) as f64 >= 0.25 * events {
            return ProbeDiagnosis::PoolSetIncomplete;
        }
        ProbeDiagnosis::CyclesNeverEmit
    }
}

// ─── CyclesState ────────────────────────────────────────────────────

/// Streaming cycle detector over both sensors.
///
/// No global time and no locking: ordering is established by the caller
/// feeding events serially.
#[derive(Debug)]
pub struct CyclesState {
    dt_min_us: u64,
    dt_max_us: u64,
    windows: [heapless::Vec<(u64, Pool), CYCLE_WINDOW_LEN>; SENSOR_COUNT],
    probe: TruthProbe,
}

impl CyclesState {
    pub fn new(dt_min_us: u32, dt_max_us: u32) -> Self {
        Self {
            dt_min_us: dt_min_us as u64,
            dt_max_us: dt_max_us as u64,
            windows: Default::default(),
            probe: TruthProbe::default(),
        }
    }

    #[inline]
    pub fn probe(&self) -> &TruthProbe {
        &self.probe
    }

    /// Canonicalize an event payload and run the detector.
    pub fn feed_payload(&mut self, payload: &[u8]) -> Option<Cycle> {
        match canonicalize(payload) {
            Ok(ev) => self.feed_canonical(&ev),
            Err(reason) => {
                self.record_decode_reject(reason);
                None
            }
        }
    }

    /// Count an event whose payload failed canonicalization.
    pub fn record_decode_reject(&mut self, reason: RejectReason) {
        self.probe.events_total += 1;
        self.probe.record_reject(RejectProjection {
            reason,
            sensor: None,
            to_pool: None,
            t_abs_us: 0,
            dt_us: 0,
        });
    }

    /// Run the detector on a canonical event.
    pub fn feed_canonical(&mut self, ev: &CanonicalEvent) -> Option<Cycle> {
        self.probe.record_event(ev.sensor, ev.to_pool);

        let reject = |probe: &mut TruthProbe, reason: RejectReason| {
            probe.record_reject(RejectProjection {
                reason,
                sensor: Some(ev.sensor),
                to_pool: Some(ev.to_pool),
                t_abs_us: ev.t_abs_us,
                dt_us: ev.dt_us,
            });
            None
        };

        let window = &mut self.windows[ev.sensor.index()];
        if window.last().is_some_and(|(_, p)| *p == ev.to_pool) {
            return reject(&mut self.probe, RejectReason::SamePoolRepeat);
        }

        push_evict(window, (ev.t_abs_us, ev.to_pool));
        if window.len() < CYCLE_WINDOW_LEN {
            return reject(&mut self.probe, RejectReason::WindowNotReady);
        }

        let (t0, p0) = window[0];
        let (_, p1) = window[1];
        let (t2, p2) = window[2];

        let mask = (1u8 << p0 as u8) | (1u8 << p1 as u8) | (1u8 << p2 as u8);
        if mask != 0b111 {
            return reject(&mut self.probe, RejectReason::SeqNotMatch);
        }

        let dt = t2.saturating_sub(t0);
        if dt < self.dt_min_us {
            return reject(&mut self.probe, RejectReason::DtTooSmall);
        }
        if dt > self.dt_max_us {
            return reject(&mut self.probe, RejectReason::DtTooLarge);
        }

        let kind = match (p0, p1, p2) {
            (Pool::N, Pool::Neu, Pool::S) => CycleKind::Up,
            (Pool::S, Pool::Neu, Pool::N) => CycleKind::Down,
            _ => CycleKind::Mixed,
        };

        let cycle = Cycle {
            sensor: ev.sensor,
            kind,
            t_start_us: t0,
            t_end_us: t2,
            t_center_us: (t0 + t2) / 2,
            dt_us: dt,
        };
        self.windows[ev.sensor.index()].clear();
        self.probe.record_cycle(ev.sensor);
        trace!(
            sensor = ev.sensor.label(),
            kind = kind.label(),
            dt_us = dt,
            "cycle emitted"
        );
        Some(cycle)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
