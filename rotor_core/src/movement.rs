//! Rotation accumulation, RPM estimation, hierarchical direction lock.
//!
//! Consumes tiles plus the compass view for the same tile. The lock
//! ladder UNLOCKED → SOFT_LOCK → LOCKED builds on consecutive confirming
//! tiles (global magnitude and window confidence both gating), degrades
//! on coherence loss or sustained window opposition, and hard-flips to
//! the opposite direction after prolonged counter-evidence.
//!
//! `total_cycles_physical` is monotone non-decreasing; `cycle_index` is
//! the signed companion, advancing only while the effective direction is
//! trusted. Idle handling is data-driven: the caller reports time passing
//! via [`MovementBody::update_idle`], nothing reads a wall clock.

use rotor_common::config::PipelineProfile;
use rotor_common::consts::RPM_JITTER_CAP;
use rotor_common::types::{Direction, FlowState, LockState, RotorState};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compass::CompassSnapshot;
use crate::tiles::Tile;

// Flow/resist classification bands.
const FLOW_HI: f64 = 0.6;
const RESIST_HI: f64 = 0.6;

// RPM decay applied per idle step; a soft lock bleeds out with it.
const IDLE_RPM_DECAY: f64 = 0.8;
const LOCK_CONF_FLOOR: f64 = 0.1;

#[inline]
fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Movement view after a tile or idle update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementSnapshot {
    /// Last processed timestamp [µs].
    pub t_us: Option<u64>,
    pub rotor_state: RotorState,
    pub direction_lock_state: LockState,
    pub direction_locked_dir: Direction,
    pub direction_locked_conf: f64,
    pub direction_global_effective: Direction,
    pub direction_global_conf: f64,
    /// Monotone non-decreasing physical cycle total.
    pub total_cycles_physical: f64,
    /// Signed cycle accumulator (CW positive).
    pub cycle_index: f64,
    pub rotations: f64,
    /// Mechanical angle in [0, 360).
    pub theta_deg: f64,
    pub rpm_inst: f64,
    pub rpm_est: f64,
    /// Relative stddev over the recent instantaneous-RPM window.
    pub rpm_jitter: f64,
    pub cadence_ok: bool,
    pub flow_state: FlowState,
    pub flow_score: f64,
    pub resist_score: f64,
    /// Blended pipeline coherence in [0, 1]; the gate's main input.
    pub coherence: f64,
}

/// Streaming movement accumulator.
#[derive(Debug)]
pub struct MovementBody {
    cfg: PipelineProfile,

    // Compass inputs from the latest tile.
    global_direction: Direction,
    global_score: f64,
    window_direction: Direction,
    window_conf: f64,

    // Lock machine.
    lock_state: LockState,
    locked_dir: Direction,
    locked_conf: f64,
    lock_candidate_dir: Direction,
    lock_candidate_count: u32,
    conflict_count: u32,
    hard_flip_count: u32,

    // Derived direction.
    effective_dir: Direction,
    effective_conf: f64,

    // Cycles / angle.
    total_cycles_physical: f64,
    cycle_index: f64,

    // RPM.
    rpm_inst: f64,
    rpm_est: f64,
    rpm_jitter: f64,
    cadence_ok: bool,
    rpm_window: heapless::Vec<f64, RPM_JITTER_CAP>,
    last_tile_center_us: Option<u64>,

    // Flow.
    flow_state: FlowState,
    flow_score: f64,
    resist_score: f64,

    rotor_state: RotorState,
    t_us: Option<u64>,
    idle_start_us: Option<u64>,
}

impl MovementBody {
    pub fn new(profile: &PipelineProfile) -> Self {
        Self {
            cfg: profile.clone(),
            global_direction: Direction::Undecided,
            global_score: 0.0,
            window_direction: Direction::Undecided,
            window_conf: 0.0,
            lock_state: LockState::Unlocked,
            locked_dir: Direction::Undecided,
            locked_conf: 0.0,
            lock_candidate_dir: Direction::Undecided,
            lock_candidate_count: 0,
            conflict_count: 0,
            hard_flip_count: 0,
            effective_dir: Direction::Undecided,
            effective_conf: 0.0,
            total_cycles_physical: 0.0,
            cycle_index: 0.0,
            rpm_inst: 0.0,
            rpm_est: 0.0,
            rpm_jitter: 0.0,
            cadence_ok: false,
            rpm_window: heapless::Vec::new(),
            last_tile_center_us: None,
            flow_state: FlowState::Neutral,
            flow_score: 0.0,
            resist_score: 0.0,
            rotor_state: RotorState::Still,
            t_us: None,
            idle_start_us: None,
        }
    }

    /// Process one tile together with the compass view for it.
    pub fn feed_tile(&mut self, tile: &Tile, compass: &CompassSnapshot) -> MovementSnapshot {
        self.global_direction = compass.direction;
        self.global_score = compass.conf;
        self.window_direction = compass.window_direction;
        self.window_conf = compass.window_conf;

        self.update_lock();
        self.update_flow();

        self.total_cycles_physical += tile.cycles_physical;
        let sign = self.direction_sign();
        self.cycle_index += sign * tile.cycles_physical;

        self.update_rpm(tile);

        self.rotor_state = if self.rpm_est >= self.cfg.rpm_move_thresh {
            RotorState::Movement
        } else {
            RotorState::Still
        };

        self.t_us = Some(tile.t_center_us);
        self.idle_start_us = None;
        self.snapshot()
    }

    /// Advance idle time when no tile has arrived.
    ///
    /// After `idle_timeout_us` of silence RPM decays geometrically and
    /// jitter history is discarded; after `idle_unlock_time_us` of total
    /// idle the body resets to STILL / UNLOCKED with zero RPM.
    pub fn update_idle(&mut self, t_us: u64) -> MovementSnapshot {
        let Some(last) = self.t_us else {
            self.t_us = Some(t_us);
            self.idle_start_us = Some(t_us);
            return self.snapshot();
        };
        if t_us <= last {
            return self.snapshot();
        }
        let dt_us = t_us - last;
        let idle_anchor = *self.idle_start_us.get_or_insert(last);
        let total_idle_us = t_us - idle_anchor;

        if dt_us >= self.cfg.idle_timeout_us {
            self.rpm_est *= IDLE_RPM_DECAY;
            self.rpm_inst *= IDLE_RPM_DECAY;
            self.rpm_window.clear();
            self.rpm_jitter = 0.0;
            self.cadence_ok = false;

            if self.rpm_est < 1.0 {
                self.rpm_est = 0.0;
                self.rpm_inst = 0.0;
                self.rotor_state = RotorState::Still;
            }

            self.flow_state = FlowState::Neutral;
            self.flow_score = 0.0;
            self.resist_score = 0.0;

            self.locked_conf *= self.cfg.idle_lock_decay;
            if self.locked_conf < LOCK_CONF_FLOOR {
                self.set_lock(LockState::Unlocked, Direction::Undecided, 0.0);
            }
        }

        if total_idle_us >= self.cfg.idle_unlock_time_us {
            self.set_lock(LockState::Unlocked, Direction::Undecided, 0.0);
            self.rpm_est = 0.0;
            self.rpm_inst = 0.0;
            self.rotor_state = RotorState::Still;
            self.flow_state = FlowState::Neutral;
            self.flow_score = 0.0;
            self.resist_score = 0.0;
        }

        self.t_us = Some(t_us);
        self.update_effective_direction();
        self.snapshot()
    }

    /// Current view; no side effects.
    pub fn snapshot(&self) -> MovementSnapshot {
        let cfg = &self.cfg;
        let rotations = self.total_cycles_physical / cfg.cycles_per_rot;
        MovementSnapshot {
            t_us: self.t_us,
            rotor_state: self.rotor_state,
            direction_lock_state: self.lock_state,
            direction_locked_dir: self.locked_dir,
            direction_locked_conf: self.locked_conf,
            direction_global_effective: self.effective_dir,
            direction_global_conf: self.effective_conf,
            total_cycles_physical: self.total_cycles_physical,
            cycle_index: self.cycle_index,
            rotations,
            theta_deg: (rotations * 360.0).rem_euclid(360.0),
            rpm_inst: self.rpm_inst,
            rpm_est: self.rpm_est,
            rpm_jitter: self.rpm_jitter,
            cadence_ok: self.cadence_ok,
            flow_state: self.flow_state,
            flow_score: self.flow_score,
            resist_score: self.resist_score,
            coherence: self.coherence(),
        }
    }

    /// Blended confidence that the kinematic picture is trustworthy.
    pub fn coherence(&self) -> f64 {
        let motion_conf = if self.rpm_est < 1.0 {
            0.0
        } else {
            let base = clamp01(self.rpm_est / self.cfg.rpm_move_thresh);
            if self.cadence_ok { base } else { base * 0.5 }
        };
        let dir_term = clamp01(self.locked_conf);
        let rpm_term = clamp01(self.rpm_est / self.cfg.coherence_rpm_norm);
        let flow_term = clamp01(self.flow_score);
        let resist_term = 1.0 - clamp01(self.resist_score);
        clamp01(
            0.30 * dir_term
                + 0.25 * motion_conf
                + 0.20 * rpm_term
                + 0.15 * flow_term
                + 0.10 * resist_term,
        )
    }

    // ── Direction lock ──────────────────────────────────────────────

    fn set_lock(&mut self, state: LockState, dir: Direction, conf: f64) {
        if state != self.lock_state {
            debug!(
                from = self.lock_state.label(),
                to = state.label(),
                dir = dir.label(),
                "direction lock transition"
            );
        }
        self.lock_state = state;
        self.locked_dir = dir;
        self.locked_conf = conf;
        self.lock_candidate_count = 0;
        self.conflict_count = 0;
        self.hard_flip_count = 0;
    }

    fn update_lock(&mut self) {
        let gd = self.global_direction;
        let gs = self.global_score;
        let wd = self.window_direction;
        let ws = self.window_conf;
        let lock_global_hi = self.cfg.lock_global_hi;
        let lock_window_min = self.cfg.lock_window_min;
        let lock_cycles_min = self.cfg.lock_cycles_min;
        let lock_promote_cycles = self.cfg.lock_promote_cycles;
        let unlock_global_lo = self.cfg.unlock_global_lo;
        let unlock_window_hi = self.cfg.unlock_window_hi;
        let unlock_conflict_cycles = self.cfg.unlock_window_conflict_cycles;
        let hard_flip_cycles = self.cfg.hard_flip_cycles;

        match self.lock_state {
            LockState::Unlocked => {
                if gd.is_decided() && gs >= lock_global_hi {
                    let window_ok =
                        wd == Direction::Undecided || (wd == gd && ws >= lock_window_min);
                    if window_ok {
                        if self.lock_candidate_dir == gd {
                            self.lock_candidate_count += 1;
                        } else {
                            self.lock_candidate_dir = gd;
                            self.lock_candidate_count = 1;
                        }
                        if self.lock_candidate_count >= lock_cycles_min {
                            self.set_lock(LockState::SoftLock, gd, gs);
                        }
                    } else {
                        self.lock_candidate_dir = Direction::Undecided;
                        self.lock_candidate_count = 0;
                    }
                } else {
                    self.lock_candidate_dir = Direction::Undecided;
                    self.lock_candidate_count = 0;
                }
            }

            LockState::SoftLock => {
                let locked = self.locked_dir;
                if locked.is_decided() {
                    if gd == locked && gs >= lock_global_hi {
                        let window_ok = wd == Direction::Undecided
                            || (wd == locked && ws >= lock_window_min);
                        if window_ok {
                            self.lock_candidate_count += 1;
                            if self.lock_candidate_count >= lock_promote_cycles {
                                let conf = self.locked_conf.max(gs);
                                self.set_lock(LockState::Locked, locked, conf);
                            }
                        } else {
                            self.lock_candidate_count = 0;
                        }
                    }
                    if gs < unlock_global_lo {
                        self.set_lock(LockState::Unlocked, Direction::Undecided, 0.0);
                    }
                }
            }

            LockState::Locked => {
                let locked = self.locked_dir;

                if gs < unlock_global_lo {
                    self.lock_state = LockState::SoftLock;
                }

                if locked.is_decided() && wd == locked.opposite() && ws >= unlock_window_hi {
                    self.conflict_count += 1;
                    self.hard_flip_count += 1;
                } else {
                    self.conflict_count = 0;
                }

                if self.conflict_count >= unlock_conflict_cycles {
                    self.lock_state = LockState::SoftLock;
                    self.conflict_count = 0;
                }

                if self.hard_flip_count >= hard_flip_cycles {
                    let flipped = locked.opposite();
                    if flipped.is_decided() {
                        self.set_lock(LockState::SoftLock, flipped, gs);
                    } else {
                        self.hard_flip_count = 0;
                    }
                }
            }
        }

        self.update_effective_direction();
    }

    fn update_effective_direction(&mut self) {
        if self.lock_state.is_engaged() && self.locked_dir.is_decided() {
            self.effective_dir = self.locked_dir;
            self.effective_conf = clamp01(self.locked_conf).max(self.global_score);
        } else {
            self.effective_dir = self.global_direction;
            self.effective_conf = self.global_score;
        }
    }

    /// +1 for trusted CW, −1 for trusted CCW, 0 otherwise. RPM itself
    /// stays physically positive; only the signed accumulators use this.
    fn direction_sign(&self) -> f64 {
        if !self.effective_dir.is_decided() {
            return 0.0;
        }
        if self.effective_conf < self.cfg.lock_confidence_threshold {
            return 0.0;
        }
        match self.effective_dir {
            Direction::Cw => 1.0,
            Direction::Ccw => -1.0,
            Direction::Undecided => 0.0,
        }
    }

    // ── RPM ─────────────────────────────────────────────────────────

    fn update_rpm(&mut self, tile: &Tile) {
        let Some(last) = self.last_tile_center_us else {
            self.last_tile_center_us = Some(tile.t_center_us);
            return;
        };
        self.last_tile_center_us = Some(tile.t_center_us);
        if tile.t_center_us <= last {
            return;
        }
        let dt_s = (tile.t_center_us - last) as f64 * 1e-6;

        let cycles_per_s = tile.cycles_physical / dt_s;
        let rpm_inst = cycles_per_s / self.cfg.cycles_per_rot * 60.0;

        self.rpm_inst = rpm_inst;
        self.rpm_est = if self.rpm_est <= 0.0 {
            rpm_inst
        } else {
            let alpha = self.cfg.rpm_alpha;
            (1.0 - alpha) * self.rpm_est + alpha * rpm_inst
        };

        if self.rpm_window.len() >= self.cfg.jitter_window_size {
            self.rpm_window.remove(0);
        }
        let _ = self.rpm_window.push(rpm_inst);

        if self.rpm_window.len() >= 2 {
            let n = self.rpm_window.len() as f64;
            let mean: f64 = self.rpm_window.iter().sum::<f64>() / n;
            if mean > 0.0 {
                let var: f64 =
                    self.rpm_window.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
                self.rpm_jitter = clamp01(var.sqrt() / mean);
            } else {
                self.rpm_jitter = 0.0;
            }
        } else {
            self.rpm_jitter = 0.0;
        }
        self.cadence_ok = self.rpm_jitter <= self.cfg.jitter_max_rel;
    }

    // ── Flow ────────────────────────────────────────────────────────

    fn update_flow(&mut self) {
        if !self.lock_state.is_engaged() || !self.locked_dir.is_decided() {
            self.flow_state = FlowState::Neutral;
            self.flow_score = 0.0;
            self.resist_score = 0.0;
            return;
        }

        let alignment = if self.window_direction == self.locked_dir {
            self.window_conf
        } else if self.window_direction == self.locked_dir.opposite() {
            -self.window_conf
        } else {
            0.0
        };

        self.flow_score = alignment.max(0.0);
        self.resist_score = (-alignment).max(0.0);

        self.flow_state = if self.flow_score > FLOW_HI && self.resist_score < 0.3 {
            FlowState::Flow
        } else if self.resist_score > RESIST_HI && self.flow_score < 0.3 {
            FlowState::Resist
        } else if self.flow_score == 0.0 && self.resist_score == 0.0 {
            FlowState::Neutral
        } else {
            FlowState::Chaotic
        };
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
