//! L1 tactile/kinematic classifier.
//!
//! Driven once per pipeline tick with wall time, the physical cycle total,
//! the raw event count of the batch, and the downstream direction/lock
//! view. Derives a virtual angle from the cycle total, a decaying activity
//! score from raw events, and a decaying encoder confidence, then walks a
//! deterministic decision tree into one of five states, each carrying a
//! reason code.
//!
//! An update gap beyond `hard_reset_s` wipes activity and encoder
//! confidence and reports `HARD_RESET_GAP` for that tick; classification
//! resumes on the next one.

use rotor_common::config::ActivityConfig;
use rotor_common::types::{Direction, L1Reason, L1State, LockState};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Wrap an angle difference into [-180, +180).
#[inline]
pub fn wrap_deg_signed(x: f64) -> f64 {
    (x + 180.0).rem_euclid(360.0) - 180.0
}

/// Encoder-confidence boost per new cycle.
const CONF_BOOST_CYCLE: f64 = 0.15;
/// Encoder-confidence boost per raw event without a cycle.
const CONF_BOOST_EVENT: f64 = 0.05;
/// Encoder-confidence drift per second while direction is LOCKED.
const CONF_DRIFT_LOCKED: f64 = 0.02;

/// Classifier view after one update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L1Snapshot {
    pub state: L1State,
    pub reason: L1Reason,
    /// Virtual angle, cumulative rotations.
    pub theta_hat_rot: f64,
    /// Virtual angle folded to [0, 360).
    pub theta_hat_deg: f64,
    /// Signed angle step of this tick, wrapped to [-180, +180).
    pub delta_theta_deg_signed: f64,
    pub activity_score: f64,
    pub encoder_conf: f64,
    pub direction_effective: Direction,
    pub direction_conf: f64,
    pub lock_state: LockState,
    pub dt_s: f64,
    pub total_cycles: f64,
    pub delta_cycles: f64,
    pub total_events: u64,
    pub delta_events: u32,
    /// Seconds since the last raw event; infinite before the first.
    pub age_event_s: f64,
    /// Seconds since the last cycle; infinite before the first.
    pub age_cycle_s: f64,
    /// Cycle age has crossed the stop gap.
    pub stale: bool,
}

impl Default for L1Snapshot {
    fn default() -> Self {
        Self {
            state: L1State::Still,
            reason: L1Reason::Init,
            theta_hat_rot: 0.0,
            theta_hat_deg: 0.0,
            delta_theta_deg_signed: 0.0,
            activity_score: 0.0,
            encoder_conf: 0.0,
            direction_effective: Direction::Undecided,
            direction_conf: 0.0,
            lock_state: LockState::Unlocked,
            dt_s: 0.0,
            total_cycles: 0.0,
            delta_cycles: 0.0,
            total_events: 0,
            delta_events: 0,
            age_event_s: f64::INFINITY,
            age_cycle_s: f64::INFINITY,
            stale: false,
        }
    }
}

/// Streaming five-state classifier.
#[derive(Debug)]
pub struct PhysicalActivity {
    cfg: ActivityConfig,
    cycles_per_rot: f64,

    theta_hat_rot: f64,
    t_last_update: Option<f64>,
    t_last_cycle_s: Option<f64>,
    t_last_event_s: Option<f64>,
    prev_cycles_total: f64,
    total_events: u64,
    activity_score: f64,
    encoder_conf: f64,

    direction_effective: Direction,
    direction_conf: f64,
    lock_state: LockState,

    last: L1Snapshot,
}

impl PhysicalActivity {
    pub fn new(cfg: ActivityConfig, cycles_per_rot: f64) -> Self {
        Self {
            cfg,
            cycles_per_rot,
            theta_hat_rot: 0.0,
            t_last_update: None,
            t_last_cycle_s: None,
            t_last_event_s: None,
            prev_cycles_total: 0.0,
            total_events: 0,
            activity_score: 0.0,
            encoder_conf: 0.0,
            direction_effective: Direction::Undecided,
            direction_conf: 0.0,
            lock_state: LockState::Unlocked,
            last: L1Snapshot::default(),
        }
    }

    /// Last computed view; no side effects.
    #[inline]
    pub fn snapshot(&self) -> L1Snapshot {
        self.last
    }

    /// Advance the classifier by one tick.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        wall_time_s: f64,
        cycles_physical_total: f64,
        events_this_batch: u32,
        direction_conf: f64,
        lock_state: LockState,
        direction_effective: Direction,
    ) -> L1Snapshot {
        let cfg = &self.cfg;
        let dt_s = self
            .t_last_update
            .map_or(0.0, |t| (wall_time_s - t).max(0.0));
        self.t_last_update = Some(wall_time_s);

        self.direction_conf = direction_conf;
        self.lock_state = lock_state;
        self.direction_effective = direction_effective;

        if dt_s > cfg.hard_reset_s {
            self.activity_score = 0.0;
            self.encoder_conf = 0.0;
            self.prev_cycles_total = cycles_physical_total;
            self.theta_hat_rot = cycles_physical_total / self.cycles_per_rot;
            debug!(dt_s, "tactile hard reset");
            self.last = L1Snapshot {
                state: L1State::Still,
                reason: L1Reason::HardResetGap,
                theta_hat_rot: self.theta_hat_rot,
                theta_hat_deg: (self.theta_hat_rot * 360.0).rem_euclid(360.0),
                dt_s,
                total_cycles: cycles_physical_total,
                total_events: self.total_events,
                age_event_s: self.age_since(self.t_last_event_s, wall_time_s),
                age_cycle_s: self.age_since(self.t_last_cycle_s, wall_time_s),
                direction_effective,
                direction_conf,
                lock_state,
                ..L1Snapshot::default()
            };
            return self.last;
        }

        let delta_cycles = cycles_physical_total - self.prev_cycles_total;
        self.prev_cycles_total = cycles_physical_total;
        self.total_events += events_this_batch as u64;

        let prev_theta = self.theta_hat_rot;
        self.theta_hat_rot = cycles_physical_total / self.cycles_per_rot;
        let dtheta = wrap_deg_signed((self.theta_hat_rot - prev_theta) * 360.0);
        let theta_deg = (self.theta_hat_rot * 360.0).rem_euclid(360.0);

        if delta_cycles > 0.0 {
            self.t_last_cycle_s = Some(wall_time_s);
        }
        if events_this_batch > 0 {
            self.t_last_event_s = Some(wall_time_s);
        }

        if dt_s > 0.0 {
            self.activity_score *= (-dt_s * cfg.activity_decay_rate).exp();
            self.encoder_conf *= (-dt_s / cfg.encoder_tau_s).exp();
        }
        self.activity_score += events_this_batch as f64;
        if delta_cycles > 0.0 {
            self.encoder_conf += CONF_BOOST_CYCLE;
        } else if events_this_batch > 0 {
            self.encoder_conf += CONF_BOOST_EVENT;
        }
        if lock_state == LockState::Locked {
            self.encoder_conf += CONF_DRIFT_LOCKED * dt_s;
        }
        self.encoder_conf = self.encoder_conf.clamp(0.0, 1.0);

        let age_event_s = self.age_since(self.t_last_event_s, wall_time_s);
        let age_cycle_s = self.age_since(self.t_last_cycle_s, wall_time_s);

        let (state, reason) = self.classify(
            self.activity_score,
            (dtheta / 360.0).abs(),
            age_cycle_s * 1000.0,
            age_event_s * 1000.0,
        );

        self.last = L1Snapshot {
            state,
            reason,
            theta_hat_rot: self.theta_hat_rot,
            theta_hat_deg: theta_deg,
            delta_theta_deg_signed: dtheta,
            activity_score: self.activity_score,
            encoder_conf: self.encoder_conf,
            direction_effective: self.direction_effective,
            direction_conf: self.direction_conf,
            lock_state: self.lock_state,
            dt_s,
            total_cycles: cycles_physical_total,
            delta_cycles,
            total_events: self.total_events,
            delta_events: events_this_batch,
            age_event_s,
            age_cycle_s,
            stale: age_cycle_s >= cfg.stop_gap_s,
        };
        self.last
    }

    fn age_since(&self, t: Option<f64>, now_s: f64) -> f64 {
        t.map_or(f64::INFINITY, |t| (now_s - t).max(0.0))
    }

    /// Deterministic decision tree over activity, displacement and ages.
    fn classify(&self, activity: f64, disp_rot: f64, gap_c_ms: f64, gap_e_ms: f64) -> (L1State, L1Reason) {
        let cfg = &self.cfg;
        if gap_c_ms >= cfg.gap_ms && gap_e_ms >= cfg.gap_ms {
            return (L1State::Still, L1Reason::StillGapTimeout);
        }
        if activity < cfg.activity_threshold_low && disp_rot < cfg.displacement_threshold {
            return (L1State::Still, L1Reason::StillLowActivity);
        }
        if disp_rot >= cfg.displacement_threshold {
            if self.lock_state.is_engaged() {
                return (L1State::Moving, L1Reason::MovingLocked);
            }
            if self.direction_conf >= cfg.direction_conf_threshold {
                return (L1State::Moving, L1Reason::MovingStableDir);
            }
            return (L1State::Displacement, L1Reason::DispAboveD0);
        }
        if activity >= cfg.activity_threshold_high {
            return (L1State::Scrape, L1Reason::ScrapeHighActivity);
        }
        if activity >= cfg.activity_threshold_low {
            return (L1State::Feeling, L1Reason::FeelingActivityNoDisp);
        }
        (L1State::Still, L1Reason::StillLowActivity)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
