//! Micro-displacement detection and origin tracking.
//!
//! Every canonical event lands in two time-trimmed windows: a pool window
//! for origin-candidate statistics and a shorter MDI window for
//! micro-displacement confidence. Pool changes per sensor accumulate into
//! `mdi_micro_acc`; an A-B-A flip-flop inside `mdi_flipflop_window_ms`
//! subtracts instead and raises a tremor score, so vibration does not
//! read as motion.
//!
//! Three detection modes share the accumulator: A triggers on the first
//! change and must confirm quickly, B scales its degree-per-step by how
//! busy the window is, C (default) sets a latch that either confirms into
//! a trigger or drops and halves the accumulator.
//!
//! Origin acceptance is two-phase: a candidate from pool-window evidence,
//! then a commit once accumulated displacement holds through the horizon
//! without rebounding. The awareness ladder STILL → NOISE → PRE_MOVEMENT
//! → PRE_ROTATION → MOVEMENT is derived each tick.
//!
//! Gap handling: a hard gap (both data streams old, low tactile activity)
//! always resets origin and MDI. A soft gap resets only when MDI is not
//! active — a held latch survives slow human motion.

use std::collections::VecDeque;

use rotor_common::config::ActivityConfig;
use rotor_common::types::{AwReason, AwState, Direction, LockState, MdiMode, Pool, Sensor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::activity::wrap_deg_signed;

const FLIPFLOP_BUF_CAP: usize = 10;
const POOL_ORDER_CAP: usize = 6;
const EARLY_DIR_MIN_DEG: f64 = 15.0;

#[inline]
fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

// ─── Inputs / outputs ───────────────────────────────────────────────

/// Per-tick context handed to [`OriginTracker::update`].
#[derive(Debug, Clone, Copy)]
pub struct OriginContext {
    pub now_s: f64,
    /// Signed angle step of this tick [deg], already wrapped.
    pub dtheta_deg: f64,
    /// Virtual angle [rotations].
    pub theta_hat_rot: f64,
    /// L1 activity score.
    pub activity_score: f64,
    pub age_event_s: f64,
    pub age_cycle_s: f64,
    pub lock_state: LockState,
}

/// Tracker view after one update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginSnapshot {
    pub aw_state: AwState,
    pub aw_reason: AwReason,

    // Pool window.
    pub pool_changes_win: u32,
    pub pool_unique_win: u32,
    pub pool_valid_rate_win: f64,

    // MDI window.
    pub mdi_mode: MdiMode,
    pub mdi_ev_win: u32,
    pub mdi_pool_changes: u32,
    pub mdi_unique_pools: u32,
    pub mdi_valid_rate: f64,
    pub mdi_alternation_rate: f64,
    pub mdi_micro_acc: f64,
    pub mdi_step_deg: f64,
    pub mdi_disp_micro_deg: f64,
    pub mdi_conf: f64,
    pub mdi_conf_acc: f64,
    pub mdi_conf_used: f64,
    pub mdi_tremor_score: f64,

    // Latch.
    pub mdi_latch_set: bool,
    pub mdi_latch_age_s: Option<f64>,
    pub mdi_changes_since_latch: u32,
    pub mdi_confirmed: bool,
    pub mdi_latch_reason: Option<AwReason>,

    // Origin.
    pub origin_candidate_set: bool,
    pub origin_candidate_time_s: Option<f64>,
    pub origin_candidate_conf: f64,
    pub origin_commit_set: bool,
    pub origin_time_s: Option<f64>,
    pub origin_theta_deg: Option<f64>,
    pub origin_conf: f64,
    pub disp_acc_deg: f64,
    pub disp_from_origin_deg: f64,
    pub speed_deg_s: f64,
    pub early_dir: Direction,
    pub micro_dir_hint: Direction,
}

impl Default for OriginSnapshot {
    fn default() -> Self {
        Self {
            aw_state: AwState::Still,
            aw_reason: AwReason::Init,
            pool_changes_win: 0,
            pool_unique_win: 0,
            pool_valid_rate_win: 0.0,
            mdi_mode: MdiMode::C,
            mdi_ev_win: 0,
            mdi_pool_changes: 0,
            mdi_unique_pools: 0,
            mdi_valid_rate: 0.0,
            mdi_alternation_rate: 0.0,
            mdi_micro_acc: 0.0,
            mdi_step_deg: 0.0,
            mdi_disp_micro_deg: 0.0,
            mdi_conf: 0.0,
            mdi_conf_acc: 0.0,
            mdi_conf_used: 0.0,
            mdi_tremor_score: 0.0,
            mdi_latch_set: false,
            mdi_latch_age_s: None,
            mdi_changes_since_latch: 0,
            mdi_confirmed: false,
            mdi_latch_reason: None,
            origin_candidate_set: false,
            origin_candidate_time_s: None,
            origin_candidate_conf: 0.0,
            origin_commit_set: false,
            origin_time_s: None,
            origin_theta_deg: None,
            origin_conf: 0.0,
            disp_acc_deg: 0.0,
            disp_from_origin_deg: 0.0,
            speed_deg_s: 0.0,
            early_dir: Direction::Undecided,
            micro_dir_hint: Direction::Undecided,
        }
    }
}

// ─── Window statistics ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct WindowStats {
    events: u32,
    changes: u32,
    unique_mask: u8,
    valid_rate: f64,
    alternation_rate: f64,
}

impl WindowStats {
    fn unique_count(&self) -> u32 {
        self.unique_mask.count_ones()
    }
}

fn window_stats(window: &VecDeque<(f64, Sensor, Option<Pool>)>, cutoff: f64) -> WindowStats {
    let mut stats = WindowStats::default();
    let mut valid = 0u32;
    let mut switches = 0u32;
    let mut last_pool: [Option<Pool>; 2] = [None, None];
    let mut last_sensor: Option<Sensor> = None;

    for &(t, sensor, pool) in window {
        if t < cutoff {
            continue;
        }
        stats.events += 1;
        if let Some(p) = pool {
            valid += 1;
            stats.unique_mask |= 1 << p as u8;
            let slot = &mut last_pool[sensor.index()];
            if slot.is_some_and(|prev| prev != p) {
                stats.changes += 1;
            }
            *slot = Some(p);
        }
        if last_sensor.is_some_and(|s| s != sensor) {
            switches += 1;
        }
        last_sensor = Some(sensor);
    }

    if stats.events > 0 {
        stats.valid_rate = valid as f64 / stats.events as f64;
    }
    if stats.events > 1 {
        stats.alternation_rate = switches as f64 / (stats.events - 1) as f64;
    }
    stats
}

// ─── OriginTracker ──────────────────────────────────────────────────

/// Micro-displacement indicator plus two-phase origin acceptance.
#[derive(Debug)]
pub struct OriginTracker {
    cfg: ActivityConfig,

    pool_window: VecDeque<(f64, Sensor, Option<Pool>)>,
    mdi_window: VecDeque<(f64, Sensor, Option<Pool>)>,

    micro_acc: f64,
    tremor: f64,
    conf_acc: f64,
    conf_last_update_s: Option<f64>,
    last_pool: [Option<Pool>; 2],
    flipflop: VecDeque<(f64, Sensor, Pool)>,
    micro_t0_s: Option<f64>,
    micro_dir_hint: Direction,
    pool_order: VecDeque<(Pool, Sensor)>,

    // Mode C latch.
    latch_set: bool,
    latch_t0_s: Option<f64>,
    changes_since_latch: u32,
    confirmed: bool,
    latch_reason: Option<AwReason>,

    // Mode A trigger.
    trigger_a_t0_s: Option<f64>,
    changes_since_trigger_a: u32,

    // Origin.
    candidate_set: bool,
    candidate_time_s: Option<f64>,
    candidate_conf: f64,
    commit_set: bool,
    origin_time_s: Option<f64>,
    origin_time0_s: Option<f64>,
    origin_theta_rot: Option<f64>,
    origin_conf: f64,
    disp_acc_deg: f64,
    disp_from_origin_deg: f64,
    prev_disp_from_origin_deg: f64,
    speed_deg_s: f64,
    early_dir: Direction,
    horizon_start_s: Option<f64>,
    horizon_max_acc: f64,

    aw_state: AwState,
    aw_reason: AwReason,
    lock_state: LockState,
    last_activity: f64,
    t_last_update_s: Option<f64>,
    last: OriginSnapshot,
}

impl OriginTracker {
    pub fn new(cfg: ActivityConfig) -> Self {
        Self {
            cfg,
            pool_window: VecDeque::new(),
            mdi_window: VecDeque::new(),
            micro_acc: 0.0,
            tremor: 0.0,
            conf_acc: 0.0,
            conf_last_update_s: None,
            last_pool: [None, None],
            flipflop: VecDeque::new(),
            micro_t0_s: None,
            micro_dir_hint: Direction::Undecided,
            pool_order: VecDeque::new(),
            latch_set: false,
            latch_t0_s: None,
            changes_since_latch: 0,
            confirmed: false,
            latch_reason: None,
            trigger_a_t0_s: None,
            changes_since_trigger_a: 0,
            candidate_set: false,
            candidate_time_s: None,
            candidate_conf: 0.0,
            commit_set: false,
            origin_time_s: None,
            origin_time0_s: None,
            origin_theta_rot: None,
            origin_conf: 0.0,
            disp_acc_deg: 0.0,
            disp_from_origin_deg: 0.0,
            prev_disp_from_origin_deg: 0.0,
            speed_deg_s: 0.0,
            early_dir: Direction::Undecided,
            horizon_start_s: None,
            horizon_max_acc: 0.0,
            aw_state: AwState::Still,
            aw_reason: AwReason::Init,
            lock_state: LockState::Unlocked,
            last_activity: 0.0,
            t_last_update_s: None,
            last: OriginSnapshot::default(),
        }
    }

    #[inline]
    pub fn snapshot(&self) -> OriginSnapshot {
        self.last
    }

    #[inline]
    pub fn aw_state(&self) -> AwState {
        self.aw_state
    }

    /// Full reset after an update hard gap (tactile layer wiped too).
    pub fn reset_all(&mut self) {
        self.last_activity = 0.0;
        self.reset_origin(AwReason::Init, false, true);
    }

    /// Record one pool observation. `to_pool = None` marks an event whose
    /// pool did not canonicalize; it still counts against the valid rate.
    pub fn record_pool(&mut self, sensor: Sensor, to_pool: Option<Pool>, t_s: f64) {
        let cfg = &self.cfg;
        self.pool_window.push_back((t_s, sensor, to_pool));
        let pool_cutoff = t_s - cfg.pool_win_ms / 1000.0;
        while self
            .pool_window
            .front()
            .is_some_and(|&(t, _, _)| t < pool_cutoff)
        {
            self.pool_window.pop_front();
        }

        self.mdi_window.push_back((t_s, sensor, to_pool));
        let mdi_cutoff = t_s - cfg.mdi_win_ms / 1000.0;
        while self
            .mdi_window
            .front()
            .is_some_and(|&(t, _, _)| t < mdi_cutoff)
        {
            self.mdi_window.pop_front();
        }

        if let Some(pool) = to_pool {
            self.process_mdi_step(t_s, sensor, pool);
        }
        self.tremor = (self.tremor - 0.02).max(0.0);
    }

    fn process_mdi_step(&mut self, t_s: f64, sensor: Sensor, pool: Pool) {
        let cfg = &self.cfg;
        let prev = self.last_pool[sensor.index()];
        self.last_pool[sensor.index()] = Some(pool);
        let Some(prev) = prev else { return };
        if prev == pool {
            return;
        }

        let mut step = 1.0;
        if self.pool_order.len() >= POOL_ORDER_CAP {
            self.pool_order.pop_front();
        }
        self.pool_order.push_back((pool, sensor));
        if self.latch_set {
            self.changes_since_latch += 1;
        }
        if self.trigger_a_t0_s.is_some() {
            self.changes_since_trigger_a += 1;
        }

        if self.flipflop.len() >= FLIPFLOP_BUF_CAP {
            self.flipflop.pop_front();
        }
        self.flipflop.push_back((t_s, sensor, pool));
        let cutoff = t_s - cfg.mdi_flipflop_window_ms / 1000.0;
        let recent: Vec<Pool> = self
            .flipflop
            .iter()
            .filter(|&&(t, _, _)| t >= cutoff)
            .map(|&(_, _, p)| p)
            .collect();
        let n = recent.len();
        if n >= 3 && recent[n - 3] == recent[n - 1] && recent[n - 1] != recent[n - 2] {
            step = -0.5;
            self.tremor = (self.tremor + 0.15).min(1.0);
        }

        self.micro_acc = (self.micro_acc + step).clamp(0.0, cfg.mdi_micro_acc_max);
        if self.micro_t0_s.is_none() && self.micro_acc >= 1.0 {
            self.micro_t0_s = Some(t_s);
        }
    }

    // ── Derived statistics ──────────────────────────────────────────

    fn mdi_conf(&self, stats: &WindowStats) -> f64 {
        clamp01(
            0.3 * (stats.changes as f64 / 4.0).min(1.0)
                + 0.2 * stats.unique_count() as f64 / 3.0
                + 0.2 * stats.valid_rate
                + 0.2 * (stats.alternation_rate * 2.0).min(1.0)
                - 0.3 * self.tremor,
        )
    }

    fn update_conf_acc(&mut self, conf: f64, now_s: f64) -> f64 {
        let tau = self.cfg.mdi_conf_tau_s;
        match self.conf_last_update_s {
            None => self.conf_acc = conf,
            Some(prev) => {
                let dt = now_s - prev;
                let alpha = if tau > 0.0 { 1.0 - (-dt / tau).exp() } else { 1.0 };
                self.conf_acc = (1.0 - alpha) * self.conf_acc + alpha * conf;
            }
        }
        self.conf_last_update_s = Some(now_s);
        self.conf_acc
    }

    fn step_size(&self, ev_win: u32) -> f64 {
        let cfg = &self.cfg;
        if cfg.mdi_mode == MdiMode::B {
            if ev_win <= 3 {
                return cfg.micro_deg_per_step_ev3;
            }
            if ev_win <= 6 {
                return cfg.micro_deg_per_step_ev6;
            }
        }
        cfg.micro_deg_per_step_base
    }

    /// N→S vs S→N ordering over the recent pool order gives a provisional
    /// direction before any lock exists.
    fn infer_dir(&self) -> Direction {
        if self.pool_order.len() < 3 {
            return Direction::Undecided;
        }
        let pools: Vec<Pool> = self.pool_order.iter().map(|&(p, _)| p).collect();
        let mut ns = 0i32;
        let mut sn = 0i32;
        for pair in pools.windows(2) {
            if pair[0] == Pool::N && pair[1] == Pool::S {
                ns += 1;
            }
            if pair[0] == Pool::S && pair[1] == Pool::N {
                sn += 1;
            }
        }
        if ns > sn + 1 {
            Direction::Cw
        } else if sn > ns + 1 {
            Direction::Ccw
        } else {
            Direction::Undecided
        }
    }

    // ── MDI modes ───────────────────────────────────────────────────

    fn apply_mode_a(
        &mut self,
        now_s: f64,
        stats: &WindowStats,
        conf_used: f64,
        micro_deg: f64,
    ) -> (bool, AwReason) {
        let cfg = &self.cfg;
        let entry = stats.changes >= cfg.mdi_trigger_changes_a
            && stats.valid_rate >= cfg.mdi_valid_rate_min
            && conf_used >= cfg.mdi_conf_min_a
            && self.tremor <= cfg.mdi_tremor_max;
        if entry && self.trigger_a_t0_s.is_none() {
            self.trigger_a_t0_s = Some(now_s);
            self.changes_since_trigger_a = 0;
            if self.micro_t0_s.is_none() {
                self.micro_t0_s = Some(now_s);
            }
            return (true, AwReason::MdiTriggerA);
        }
        if let Some(t0) = self.trigger_a_t0_s {
            let age = now_s - t0;
            if self.changes_since_trigger_a >= cfg.mdi_confirm_changes_a
                || micro_deg >= cfg.mdi_trigger_micro_deg
            {
                return (true, AwReason::MdiTriggerA);
            }
            if age <= cfg.mdi_confirm_s_a {
                return (true, AwReason::MdiTriggerA);
            }
            self.trigger_a_t0_s = None;
            self.changes_since_trigger_a = 0;
            return (false, AwReason::MdiTriggerADropped);
        }
        (false, AwReason::NoiseAccBelowThreshold)
    }

    fn apply_mode_b(&mut self, now_s: f64, conf_used: f64, micro_deg: f64) -> (bool, AwReason) {
        let cfg = &self.cfg;
        if micro_deg >= cfg.mdi_trigger_micro_deg
            && conf_used >= cfg.mdi_conf_min
            && self.tremor <= cfg.mdi_tremor_max
        {
            if self.micro_t0_s.is_none() {
                self.micro_t0_s = Some(now_s);
            }
            return (true, AwReason::MdiTriggerB);
        }
        (false, AwReason::NoiseAccBelowThreshold)
    }

    fn apply_mode_c(
        &mut self,
        now_s: f64,
        stats: &WindowStats,
        conf_used: f64,
        micro_deg: f64,
    ) -> (bool, AwReason) {
        let cfg = &self.cfg;
        if !self.latch_set
            && stats.changes >= cfg.mdi_latch_min_changes
            && stats.valid_rate >= cfg.mdi_valid_rate_min
            && self.tremor <= cfg.mdi_tremor_max
        {
            self.latch_set = true;
            self.latch_t0_s = Some(now_s);
            self.changes_since_latch = 0;
            self.confirmed = false;
            self.latch_reason = Some(AwReason::MdiLatch);
            if self.micro_t0_s.is_none() {
                self.micro_t0_s = Some(now_s);
            }
            return (true, AwReason::MdiLatch);
        }
        if self.latch_set {
            let age = self.latch_t0_s.map_or(0.0, |t0| now_s - t0);
            if !self.confirmed
                && age <= cfg.mdi_latch_confirm_s
                && (self.changes_since_latch >= cfg.mdi_confirm_changes
                    || micro_deg >= cfg.mdi_confirm_micro_deg
                    || conf_used >= cfg.mdi_confirm_conf)
            {
                self.confirmed = true;
                self.latch_reason = Some(AwReason::MdiTrigger);
                return (true, AwReason::MdiTrigger);
            }
            if self.confirmed {
                return (true, AwReason::MdiTrigger);
            }
            if age <= cfg.mdi_latch_confirm_s {
                return (true, AwReason::MdiLatch);
            }
            if age > cfg.mdi_latch_drop_s {
                self.latch_set = false;
                self.latch_t0_s = None;
                self.changes_since_latch = 0;
                self.latch_reason = Some(AwReason::MdiLatchDropped);
                self.micro_acc *= 0.5;
                debug!("mdi latch dropped without confirmation");
                return (false, AwReason::MdiLatchDropped);
            }
            return (true, AwReason::MdiLatch);
        }
        (false, AwReason::NoiseAccBelowThreshold)
    }

    fn apply_mode(
        &mut self,
        now_s: f64,
        stats: &WindowStats,
        conf: f64,
        conf_acc: f64,
        micro_deg: f64,
    ) -> (bool, AwReason) {
        let conf_used = if conf_acc > 0.0 { conf_acc } else { conf };
        match self.cfg.mdi_mode {
            MdiMode::A => self.apply_mode_a(now_s, stats, conf_used, micro_deg),
            MdiMode::B => self.apply_mode_b(now_s, conf_used, micro_deg),
            MdiMode::C => self.apply_mode_c(now_s, stats, conf_used, micro_deg),
        }
    }

    // ── Reset ───────────────────────────────────────────────────────

    fn reset_origin(&mut self, reason: AwReason, keep_tactile: bool, reset_mdi: bool) {
        if reset_mdi {
            self.micro_acc = 0.0;
            self.tremor = 0.0;
            self.conf_acc = 0.0;
            self.conf_last_update_s = None;
            self.micro_t0_s = None;
            self.micro_dir_hint = Direction::Undecided;
            self.pool_order.clear();
            self.last_pool = [None, None];
            self.flipflop.clear();
            self.latch_set = false;
            self.latch_t0_s = None;
            self.changes_since_latch = 0;
            self.confirmed = false;
            self.latch_reason = None;
            self.trigger_a_t0_s = None;
            self.changes_since_trigger_a = 0;
        }
        self.candidate_set = false;
        self.candidate_time_s = None;
        self.candidate_conf = 0.0;
        self.commit_set = false;
        self.origin_time_s = None;
        self.origin_time0_s = None;
        self.origin_theta_rot = None;
        self.origin_conf = 0.0;
        self.disp_acc_deg = 0.0;
        self.disp_from_origin_deg = 0.0;
        self.prev_disp_from_origin_deg = 0.0;
        self.speed_deg_s = 0.0;
        self.early_dir = Direction::Undecided;
        self.horizon_start_s = None;
        self.horizon_max_acc = 0.0;

        self.aw_state = if keep_tactile && self.last_activity >= self.cfg.activity_threshold_low {
            AwState::Noise
        } else {
            AwState::Still
        };
        self.aw_reason = reason;
    }

    // ── Update ──────────────────────────────────────────────────────

    /// Advance the tracker by one tick.
    pub fn update(&mut self, ctx: OriginContext) -> OriginSnapshot {
        let cfg = self.cfg.clone();
        let now_s = ctx.now_s;
        let dt_s = self.t_last_update_s.map_or(0.0, |t| (now_s - t).max(0.0));
        self.t_last_update_s = Some(now_s);
        self.lock_state = ctx.lock_state;
        self.last_activity = ctx.activity_score;

        let pool_stats = window_stats(&self.pool_window, now_s - cfg.pool_win_ms / 1000.0);
        let mdi_stats = window_stats(&self.mdi_window, now_s - cfg.mdi_win_ms / 1000.0);
        let mdi_conf = self.mdi_conf(&mdi_stats);
        let mdi_conf_acc = self.update_conf_acc(mdi_conf, now_s);
        let step_deg = self.step_size(mdi_stats.events);
        let micro_deg = self.micro_acc * step_deg;
        self.micro_dir_hint = self.infer_dir();

        // MDI evaluates first so gap handling can tell whether a latch is live.
        let (mdi_triggered, mdi_reason) = if self.tremor <= cfg.mdi_tremor_max {
            self.apply_mode(now_s, &mdi_stats, mdi_conf, mdi_conf_acc, micro_deg)
        } else {
            (false, AwReason::NoiseAccBelowThreshold)
        };
        let mdi_active =
            mdi_triggered || self.latch_set || self.aw_state == AwState::PreMovement;

        let mut gap_handled = false;
        if (ctx.age_cycle_s >= cfg.stop_gap_s || ctx.age_event_s >= cfg.stop_gap_s)
            && ctx.activity_score < cfg.activity_reset_a0
        {
            self.reset_origin(AwReason::StopGapTimeout, false, true);
            gap_handled = true;
        } else if ctx.age_cycle_s >= cfg.noise_gap_s
            && ctx.activity_score >= cfg.activity_reset_a0
            && !mdi_active
        {
            self.reset_origin(AwReason::NoDispActive, true, false);
            gap_handled = true;
        } else if self.commit_set
            && ctx.age_cycle_s > cfg.movement_hold_s
            && ctx.age_cycle_s < cfg.stop_gap_s
        {
            if self.aw_state == AwState::Movement {
                self.aw_state = AwState::PreRotation;
                self.aw_reason = AwReason::HoldDecay;
            }
            self.speed_deg_s *= 0.9;
        }

        if !gap_handled {
            if self.tremor > cfg.mdi_tremor_max && self.aw_state == AwState::PreMovement {
                self.reset_origin(AwReason::MdiTremor, true, true);
                gap_handled = true;
            } else if self.aw_state == AwState::PreMovement
                && !self.candidate_set
                && ctx.age_event_s > cfg.mdi_hold_s
                && ctx.activity_score < cfg.activity_threshold_low
            {
                self.reset_origin(AwReason::MdiHoldTimeout, false, true);
                gap_handled = true;
            }
            if !gap_handled {
                if mdi_triggered && matches!(self.aw_state, AwState::Still | AwState::Noise) {
                    self.aw_state = AwState::PreMovement;
                    self.aw_reason = mdi_reason;
                } else if matches!(
                    mdi_reason,
                    AwReason::MdiLatchDropped | AwReason::MdiTriggerADropped
                ) && self.aw_state == AwState::PreMovement
                {
                    self.aw_state = if ctx.activity_score >= cfg.activity_threshold_low {
                        AwState::Noise
                    } else {
                        AwState::Still
                    };
                    self.aw_reason = mdi_reason;
                }
            }
        }

        if !gap_handled {
            self.disp_acc_deg += ctx.dtheta_deg;

            if !self.commit_set {
                let strong = pool_stats.changes >= cfg.pool_changes_min
                    && pool_stats.unique_count() as usize >= cfg.pool_unique_min
                    && pool_stats.valid_rate >= cfg.pool_valid_rate_min;
                if strong && !self.candidate_set {
                    self.candidate_set = true;
                    self.candidate_time_s = Some(now_s);
                    self.candidate_conf = (0.3
                        + 0.2 * (pool_stats.changes as f64 / 5.0)
                        + 0.2 * (pool_stats.unique_count() as f64 / 3.0)
                        + 0.3 * pool_stats.valid_rate)
                        .min(1.0);
                    if self.origin_time0_s.is_none() {
                        self.origin_time0_s = Some(self.micro_t0_s.unwrap_or(now_s));
                    }
                    if matches!(
                        self.aw_state,
                        AwState::Still | AwState::Noise | AwState::PreMovement
                    ) {
                        self.aw_state = AwState::PreRotation;
                        self.aw_reason = AwReason::CandidatePool;
                    }
                } else if self.candidate_set
                    && !strong
                    && pool_stats.changes == 0
                    && ctx.activity_score < cfg.activity_threshold_low
                {
                    self.reset_origin(AwReason::CandidateDropped, false, true);
                    gap_handled = true;
                }
            }

            if !gap_handled && !self.commit_set {
                let abs_acc = self.disp_acc_deg.abs();
                if abs_acc >= cfg.origin_step_deg && self.horizon_start_s.is_none() {
                    self.horizon_start_s = Some(now_s);
                    self.horizon_max_acc = abs_acc;
                }
                if let Some(start) = self.horizon_start_s {
                    let h_age = now_s - start;
                    self.horizon_max_acc = self.horizon_max_acc.max(abs_acc);
                    if abs_acc < cfg.origin_rebound_eps_deg {
                        self.horizon_start_s = None;
                        self.horizon_max_acc = 0.0;
                        if self.candidate_set {
                            self.aw_reason = AwReason::CommitRebound;
                        }
                    } else if h_age >= cfg.origin_commit_horizon_s {
                        self.commit_set = true;
                        self.origin_time_s = Some(now_s);
                        if self.origin_time0_s.is_none() {
                            self.origin_time0_s = Some(
                                self.micro_t0_s
                                    .or(self.candidate_time_s)
                                    .unwrap_or(now_s),
                            );
                        }
                        self.origin_theta_rot = Some(ctx.theta_hat_rot - self.disp_acc_deg / 360.0);
                        self.origin_conf = 0.6;
                        self.aw_state = AwState::PreRotation;
                        self.aw_reason = AwReason::CommitAngle;
                        self.horizon_start_s = None;
                        self.horizon_max_acc = 0.0;
                        debug!(theta_anchor_rot = self.origin_theta_rot, "origin committed");
                    }
                }
            }

            if self.commit_set {
                if let Some(anchor) = self.origin_theta_rot {
                    self.disp_from_origin_deg =
                        wrap_deg_signed((ctx.theta_hat_rot - anchor) * 360.0);
                }
            }
            if dt_s > 0.0 {
                let delta_d =
                    wrap_deg_signed(self.disp_from_origin_deg - self.prev_disp_from_origin_deg);
                let alpha = 1.0 - (-dt_s / cfg.speed_ema_tau_s).exp();
                self.speed_deg_s =
                    (1.0 - alpha) * self.speed_deg_s + alpha * delta_d.abs() / dt_s;
            }
            self.prev_disp_from_origin_deg = self.disp_from_origin_deg;

            if self.disp_from_origin_deg.abs() >= EARLY_DIR_MIN_DEG {
                self.early_dir = if self.disp_from_origin_deg > 0.0 {
                    Direction::Cw
                } else {
                    Direction::Ccw
                };
            } else if self.disp_acc_deg.abs() >= EARLY_DIR_MIN_DEG {
                self.early_dir = if self.disp_acc_deg > 0.0 {
                    Direction::Cw
                } else {
                    Direction::Ccw
                };
            } else if self.micro_dir_hint.is_decided() {
                self.early_dir = self.micro_dir_hint;
            }

            if !gap_handled {
                let (state, reason) = self.compute_aw(mdi_triggered, mdi_reason);
                self.aw_state = state;
                self.aw_reason = reason;
            }
            if self.commit_set {
                if self.disp_from_origin_deg.abs() > cfg.movement_confirm_deg {
                    self.origin_conf = (self.origin_conf + 0.1 * dt_s).min(1.0);
                } else if self.speed_deg_s > cfg.speed_confirm_deg_s {
                    self.origin_conf = (self.origin_conf + 0.05 * dt_s).min(1.0);
                }
            }
        }

        let latch_age = match (self.latch_set, self.latch_t0_s) {
            (true, Some(t0)) => Some(now_s - t0),
            _ => None,
        };
        let conf_used = if mdi_conf_acc > 0.0 { mdi_conf_acc } else { mdi_conf };

        self.last = OriginSnapshot {
            aw_state: self.aw_state,
            aw_reason: self.aw_reason,
            pool_changes_win: pool_stats.changes,
            pool_unique_win: pool_stats.unique_count(),
            pool_valid_rate_win: pool_stats.valid_rate,
            mdi_mode: cfg.mdi_mode,
            mdi_ev_win: mdi_stats.events,
            mdi_pool_changes: mdi_stats.changes,
            mdi_unique_pools: mdi_stats.unique_count(),
            mdi_valid_rate: mdi_stats.valid_rate,
            mdi_alternation_rate: mdi_stats.alternation_rate,
            mdi_micro_acc: self.micro_acc,
            mdi_step_deg: step_deg,
            mdi_disp_micro_deg: self.micro_acc * step_deg,
            mdi_conf,
            mdi_conf_acc,
            mdi_conf_used: conf_used,
            mdi_tremor_score: self.tremor,
            mdi_latch_set: self.latch_set,
            mdi_latch_age_s: latch_age,
            mdi_changes_since_latch: self.changes_since_latch,
            mdi_confirmed: self.confirmed,
            mdi_latch_reason: self.latch_reason,
            origin_candidate_set: self.candidate_set,
            origin_candidate_time_s: self.candidate_time_s,
            origin_candidate_conf: self.candidate_conf,
            origin_commit_set: self.commit_set,
            origin_time_s: self.origin_time_s,
            origin_theta_deg: self
                .origin_theta_rot
                .map(|r| (r * 360.0).rem_euclid(360.0)),
            origin_conf: self.origin_conf,
            disp_acc_deg: self.disp_acc_deg,
            disp_from_origin_deg: self.disp_from_origin_deg,
            speed_deg_s: self.speed_deg_s,
            early_dir: self.early_dir,
            micro_dir_hint: self.micro_dir_hint,
        };
        self.last
    }

    fn compute_aw(&self, mdi_triggered: bool, mdi_reason: AwReason) -> (AwState, AwReason) {
        let cfg = &self.cfg;
        if self.commit_set {
            if self.disp_from_origin_deg.abs() >= cfg.movement_confirm_deg {
                return (AwState::Movement, AwReason::MovementDispConfirmed);
            }
            if self.speed_deg_s >= cfg.speed_confirm_deg_s {
                return (AwState::Movement, AwReason::MovementSpeedConfirmed);
            }
            if self.lock_state.is_engaged() {
                return (AwState::Movement, AwReason::MovementLockAccelerated);
            }
            return (AwState::PreRotation, AwReason::PreRotOriginSet);
        }
        if self.candidate_set {
            return (AwState::PreRotation, AwReason::CandidatePool);
        }
        if mdi_triggered {
            return (AwState::PreMovement, mdi_reason);
        }
        if self.last_activity >= cfg.activity_threshold_low {
            return (AwState::Noise, AwReason::NoiseAccBelowThreshold);
        }
        (AwState::Still, AwReason::StillLowActivity)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> OriginTracker {
        OriginTracker::new(ActivityConfig::default())
    }

    fn ctx(now_s: f64, activity: f64) -> OriginContext {
        OriginContext {
            now_s,
            dtheta_deg: 0.0,
            theta_hat_rot: 0.0,
            activity_score: activity,
            age_event_s: 0.05,
            age_cycle_s: 0.1,
            lock_state: LockState::Unlocked,
        }
    }

    /// Record a pool change on sensor A and latch mode C.
    fn latch(tracker: &mut OriginTracker, t0: f64) -> OriginSnapshot {
        tracker.record_pool(Sensor::A, Some(Pool::N), t0);
        tracker.record_pool(Sensor::A, Some(Pool::S), t0 + 0.01);
        tracker.update(ctx(t0 + 0.02, 2.0))
    }

    #[test]
    fn mode_c_latches_on_first_change() {
        let mut tr = tracker();
        let snap = latch(&mut tr, 0.0);
        assert!(snap.mdi_latch_set);
        assert_eq!(snap.aw_state, AwState::PreMovement);
        assert_eq!(snap.mdi_latch_reason, Some(AwReason::MdiLatch));
        assert!((snap.mdi_micro_acc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mode_c_confirms_on_further_changes() {
        let mut tr = tracker();
        latch(&mut tr, 0.0);
        // Two more changes inside the confirm window.
        tr.record_pool(Sensor::A, Some(Pool::N), 0.05);
        tr.record_pool(Sensor::A, Some(Pool::S), 0.08);
        let snap = tr.update(ctx(0.1, 2.0));
        assert!(snap.mdi_confirmed);
        assert_eq!(snap.mdi_latch_reason, Some(AwReason::MdiTrigger));
        // The same pool evidence already qualifies as an origin candidate,
        // so awareness escalates past PRE_MOVEMENT.
        assert_eq!(snap.aw_state, AwState::PreRotation);
    }

    #[test]
    fn mode_c_latch_drops_and_halves_accumulator() {
        let mut tr = tracker();
        let snap = latch(&mut tr, 0.0);
        let acc_before = snap.mdi_micro_acc;

        // Past mdi_latch_drop_s with no confirmation: drop, halve, fall
        // back to NOISE because tactile activity is still present.
        let snap = tr.update(OriginContext {
            now_s: 0.40,
            age_event_s: 0.05,
            age_cycle_s: 0.1,
            ..ctx(0.40, 2.0)
        });
        assert!(!snap.mdi_latch_set);
        assert_eq!(snap.mdi_latch_reason, Some(AwReason::MdiLatchDropped));
        assert!((snap.mdi_micro_acc - acc_before * 0.5).abs() < 1e-12);
        assert_eq!(snap.aw_state, AwState::Noise);
    }

    #[test]
    fn mode_a_triggers_and_drops_without_confirm() {
        let mut cfg = ActivityConfig::aggressive();
        cfg.mdi_mode = MdiMode::A;
        let mut tr = OriginTracker::new(cfg);
        tr.record_pool(Sensor::A, Some(Pool::N), 0.0);
        tr.record_pool(Sensor::A, Some(Pool::S), 0.01);
        let snap = tr.update(ctx(0.02, 2.0));
        assert_eq!(snap.aw_state, AwState::PreMovement);
        assert_eq!(snap.aw_reason, AwReason::MdiTriggerA);

        // Past the confirm horizon without additional changes: dropped.
        // The MDI window is empty by then, so no re-entry either.
        let snap = tr.update(ctx(0.40, 2.0));
        assert_ne!(snap.aw_state, AwState::PreMovement);
    }

    #[test]
    fn mode_b_needs_accumulated_micro_degrees() {
        let mut cfg = ActivityConfig::bench_tolerant();
        assert_eq!(cfg.mdi_mode, MdiMode::B);
        cfg.mdi_conf_min = 0.2;
        let mut tr = OriginTracker::new(cfg);

        // One change = 1 step. With a sparse window (≤3 events) the step is
        // 15°, below the 20° trigger.
        tr.record_pool(Sensor::A, Some(Pool::N), 0.0);
        tr.record_pool(Sensor::A, Some(Pool::S), 0.01);
        let snap = tr.update(ctx(0.02, 2.0));
        assert_eq!(snap.aw_state, AwState::Noise);
        assert!((snap.mdi_step_deg - 15.0).abs() < 1e-12);

        // A second change crosses 2 × 15° = 30° ≥ 20°. It arrives after the
        // earlier events left the pool window, so no candidate forms and the
        // trigger alone decides awareness.
        tr.record_pool(Sensor::A, Some(Pool::N), 0.30);
        let snap = tr.update(ctx(0.31, 2.0));
        assert!((snap.mdi_disp_micro_deg - 30.0).abs() < 1e-12);
        assert_eq!(snap.aw_state, AwState::PreMovement);
        assert_eq!(snap.aw_reason, AwReason::MdiTriggerB);
    }

    #[test]
    fn flipflop_reads_as_tremor_not_motion() {
        let mut tr = tracker();
        // S-N-S among the changed-to pools within the flip-flop window.
        tr.record_pool(Sensor::A, Some(Pool::N), 0.000);
        tr.record_pool(Sensor::A, Some(Pool::S), 0.010);
        tr.record_pool(Sensor::A, Some(Pool::N), 0.020);
        tr.record_pool(Sensor::A, Some(Pool::S), 0.030);
        let snap = tr.update(ctx(0.04, 2.0));
        assert!(snap.mdi_tremor_score > 0.0);
        // Three changes: +1, +1, then −0.5 for the flip-flop.
        assert!((snap.mdi_micro_acc - 1.5).abs() < 1e-9);
    }

    #[test]
    fn origin_candidate_then_commit() {
        let mut tr = tracker();
        // Rich pool activity on both sensors inside the pool window.
        let mut t = 0.0;
        for pools in [
            (Pool::N, Pool::S),
            (Pool::Neu, Pool::Neu),
            (Pool::S, Pool::N),
            (Pool::N, Pool::S),
        ] {
            tr.record_pool(Sensor::A, Some(pools.0), t);
            tr.record_pool(Sensor::B, Some(pools.1), t + 0.005);
            t += 0.02;
        }
        let snap = tr.update(OriginContext {
            now_s: t,
            dtheta_deg: 35.0,
            theta_hat_rot: 35.0 / 360.0,
            ..ctx(t, 3.0)
        });
        assert!(snap.origin_candidate_set);
        assert_eq!(snap.aw_state, AwState::PreRotation);
        assert!(!snap.origin_commit_set);

        // Hold the displacement through the commit horizon.
        let snap = tr.update(OriginContext {
            now_s: t + 0.4,
            dtheta_deg: 5.0,
            theta_hat_rot: 40.0 / 360.0,
            ..ctx(t + 0.4, 3.0)
        });
        assert!(snap.origin_commit_set);
        assert!(snap.origin_theta_deg.is_some());
        assert!((snap.origin_conf - 0.6).abs() < 1e-9);
        // Anchor sits where displacement started: θ̂ − disp/360.
        let anchor = snap.origin_theta_deg.unwrap();
        assert!(anchor.abs() < 1.0 || (360.0 - anchor) < 1.0);
    }

    #[test]
    fn rebound_cancels_commit_horizon() {
        let mut tr = tracker();
        let mut t = 0.0;
        for _ in 0..4 {
            tr.record_pool(Sensor::A, Some(Pool::N), t);
            tr.record_pool(Sensor::A, Some(Pool::S), t + 0.005);
            t += 0.02;
        }
        // Displacement jumps past origin_step_deg, then rebounds to zero.
        tr.update(OriginContext {
            now_s: t,
            dtheta_deg: 35.0,
            theta_hat_rot: 35.0 / 360.0,
            ..ctx(t, 3.0)
        });
        let snap = tr.update(OriginContext {
            now_s: t + 0.1,
            dtheta_deg: -33.0,
            theta_hat_rot: 2.0 / 360.0,
            ..ctx(t + 0.1, 3.0)
        });
        assert!(!snap.origin_commit_set);
        assert_eq!(snap.aw_reason, AwReason::CandidatePool);

        // The horizon restarted, so even after its span no commit happens
        // while displacement stays small.
        let snap = tr.update(OriginContext {
            now_s: t + 0.6,
            dtheta_deg: 0.0,
            theta_hat_rot: 2.0 / 360.0,
            ..ctx(t + 0.6, 3.0)
        });
        assert!(!snap.origin_commit_set);
    }

    #[test]
    fn movement_via_lock_acceleration() {
        let mut tr = tracker();
        let mut t = 0.0;
        for _ in 0..4 {
            tr.record_pool(Sensor::A, Some(Pool::N), t);
            tr.record_pool(Sensor::A, Some(Pool::S), t + 0.005);
            t += 0.02;
        }
        tr.update(OriginContext {
            now_s: t,
            dtheta_deg: 35.0,
            theta_hat_rot: 35.0 / 360.0,
            ..ctx(t, 3.0)
        });
        let snap = tr.update(OriginContext {
            now_s: t + 0.4,
            dtheta_deg: 5.0,
            theta_hat_rot: 40.0 / 360.0,
            ..ctx(t + 0.4, 3.0)
        });
        assert!(snap.origin_commit_set);

        // Once the commit-time speed transient has decayed, an engaged lock
        // alone keeps the tracker in MOVEMENT.
        let mut snap = snap;
        let mut t2 = t + 0.4;
        while snap.speed_deg_s >= 30.0 {
            t2 += 0.4;
            snap = tr.update(OriginContext {
                now_s: t2,
                dtheta_deg: 0.0,
                theta_hat_rot: 40.0 / 360.0,
                lock_state: LockState::SoftLock,
                ..ctx(t2, 3.0)
            });
        }
        assert_eq!(snap.aw_state, AwState::Movement);
        assert_eq!(snap.aw_reason, AwReason::MovementLockAccelerated);
    }

    #[test]
    fn hard_gap_always_resets() {
        let mut tr = tracker();
        latch(&mut tr, 0.0);
        let snap = tr.update(OriginContext {
            now_s: 1.0,
            age_event_s: 0.9,
            age_cycle_s: 0.9,
            ..ctx(1.0, 0.0)
        });
        assert_eq!(snap.aw_state, AwState::Still);
        assert_eq!(snap.aw_reason, AwReason::StopGapTimeout);
        assert!(!snap.mdi_latch_set);
        assert_eq!(snap.mdi_micro_acc, 0.0);
    }

    #[test]
    fn soft_gap_spares_an_active_latch() {
        let mut tr = tracker();
        latch(&mut tr, 0.0);
        // Cycle age past noise_gap_s but activity high and latch live:
        // the soft-gap reset must NOT fire.
        let snap = tr.update(OriginContext {
            now_s: 0.10,
            age_event_s: 0.05,
            age_cycle_s: 0.6,
            ..ctx(0.10, 2.0)
        });
        assert!(snap.mdi_latch_set, "soft gap must not clear a live latch");
        assert_eq!(snap.aw_state, AwState::PreMovement);
    }

    #[test]
    fn soft_gap_resets_without_mdi() {
        let mut tr = tracker();
        // Tactile activity without any MDI latch.
        let snap = tr.update(OriginContext {
            now_s: 0.1,
            age_event_s: 0.05,
            age_cycle_s: 0.6,
            ..ctx(0.1, 2.0)
        });
        assert_eq!(snap.aw_state, AwState::Noise);
        assert_eq!(snap.aw_reason, AwReason::NoDispActive);
    }

    #[test]
    fn micro_dir_hint_from_pool_order() {
        let mut tr = tracker();
        // N→S transitions dominate while the Neu leg breaks any A-B-A
        // flip-flop pattern: clean CW hint.
        let seq = [
            Pool::N,
            Pool::S,
            Pool::Neu,
            Pool::N,
            Pool::S,
            Pool::Neu,
            Pool::N,
            Pool::S,
        ];
        for (i, p) in seq.iter().enumerate() {
            tr.record_pool(Sensor::A, Some(*p), i as f64 * 0.01);
        }
        let snap = tr.update(ctx(0.09, 2.0));
        assert_eq!(snap.micro_dir_hint, Direction::Cw);
        assert_eq!(snap.early_dir, Direction::Cw);
    }

    #[test]
    fn valid_rate_counts_invalid_pools() {
        let mut tr = tracker();
        tr.record_pool(Sensor::A, Some(Pool::N), 0.0);
        tr.record_pool(Sensor::A, None, 0.01);
        tr.record_pool(Sensor::A, Some(Pool::S), 0.02);
        tr.record_pool(Sensor::A, None, 0.03);
        let snap = tr.update(ctx(0.04, 2.0));
        assert!((snap.mdi_valid_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn snapshot_is_idempotent() {
        let mut tr = tracker();
        latch(&mut tr, 0.0);
        assert_eq!(tr.snapshot(), tr.snapshot());
    }
}
