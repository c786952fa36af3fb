//! Configuration surface: named profiles plus sidecar overlay.
//!
//! Three pipeline profiles (`production`, `bench`, `bench_tolerant`)
//! parameterize compass/lock/RPM/tile thresholds; the activity layer adds
//! its own presets. A sidecar TOML file with a flat key/value table may
//! override any recognized field — unknown keys and out-of-range values
//! are hard errors so a typo cannot silently run with defaults.
//!
//! `cycles_per_rot` is configured exactly once, on [`PipelineProfile`];
//! consumers receive it by construction.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::consts::RPM_JITTER_CAP;
use crate::types::MdiMode;

// ─── Error Type ─────────────────────────────────────────────────────

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sidecar file could not be read.
    #[error("config I/O error: {0}")]
    Io(String),

    /// Sidecar TOML failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),

    /// Unknown profile name requested.
    #[error("unknown profile '{0}' (expected production, bench or bench_tolerant)")]
    UnknownProfile(String),

    /// Sidecar key is not a recognized option.
    #[error("unrecognized config key '{0}'")]
    UnknownKey(String),

    /// Sidecar value has the wrong type for its key.
    #[error("config key '{key}' expects {expected}")]
    InvalidType {
        key: &'static str,
        expected: &'static str,
    },

    /// Field value outside its valid range.
    #[error("config validation: {0}")]
    OutOfRange(String),
}

// ─── Pipeline Profile ───────────────────────────────────────────────

/// Thresholds for the cycles → tiles → compass → movement chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineProfile {
    /// Profile name, carried into snapshots for traceability.
    pub name: String,

    // ── Cycle detector ──
    /// Minimum accepted cycle span [µs].
    pub dt_min_us: u32,
    /// Maximum accepted cycle span [µs].
    pub dt_max_us: u32,

    // ── Tiles ──
    /// Cycles per tile; tile duration = span × boot median dt.
    pub tile_span_cycles: f64,
    /// Cycle dt samples required before the tile duration is learned.
    pub boot_cycles_for_median: usize,
    /// Emit empty tiles across index gaps to keep the axis dense.
    pub dense_tile_emission: bool,

    // ── Compass ──
    /// EMA smoothing factor for the global score.
    pub compass_alpha: f64,
    /// Enter CW/CCW when |score| reaches this.
    pub compass_threshold_high: f64,
    /// Drop to UNDECIDED when |score| falls below this.
    pub compass_threshold_low: f64,

    // ── Direction lock ──
    /// Global magnitude required to build lock candidates.
    pub lock_global_hi: f64,
    /// Window confidence required for a confirming tile.
    pub lock_window_min: f64,
    /// Confirming tiles for UNLOCKED → SOFT_LOCK.
    pub lock_cycles_min: u32,
    /// Additional confirming tiles for SOFT_LOCK → LOCKED.
    pub lock_promote_cycles: u32,
    /// Global magnitude below which locks degrade.
    pub unlock_global_lo: f64,
    /// Window confidence that counts as an opposing tile.
    pub unlock_window_hi: f64,
    /// Opposing tiles for LOCKED → SOFT_LOCK.
    pub unlock_window_conflict_cycles: u32,
    /// Sustained opposing tiles before a hard direction flip.
    pub hard_flip_cycles: u32,
    /// Minimum effective-direction confidence for signed accumulation.
    pub lock_confidence_threshold: f64,

    // ── Rotation / RPM ──
    /// Physical cycles per mechanical rotation.
    pub cycles_per_rot: f64,
    /// RPM EMA smoothing factor.
    pub rpm_alpha: f64,
    /// RPM at or above which the rotor is MOVEMENT.
    pub rpm_move_thresh: f64,
    /// RPM below which motion is still evaluating.
    pub rpm_slow_thresh: f64,
    /// Instantaneous-RPM window length for jitter (≤ capacity).
    pub jitter_window_size: usize,
    /// Relative stddev above which cadence is not trusted.
    pub jitter_max_rel: f64,
    /// RPM normalization for the coherence blend.
    pub coherence_rpm_norm: f64,

    // ── Idle decay ──
    /// Tile silence before RPM starts decaying [µs].
    pub idle_timeout_us: u64,
    /// Total idle before the full STILL reset [µs].
    pub idle_unlock_time_us: u64,
    /// Lock-confidence decay factor per idle step.
    pub idle_lock_decay: f64,
}

impl PipelineProfile {
    /// Production profile: conservative thresholds, tight dt bounds.
    pub fn production() -> Self {
        Self {
            name: "production".to_string(),
            dt_min_us: 800,
            dt_max_us: 2_000_000,
            tile_span_cycles: 4.0,
            boot_cycles_for_median: 8,
            dense_tile_emission: true,
            compass_alpha: 0.2,
            compass_threshold_high: 0.35,
            compass_threshold_low: 0.15,
            lock_global_hi: 0.4,
            lock_window_min: 0.4,
            lock_cycles_min: 3,
            lock_promote_cycles: 4,
            unlock_global_lo: 0.25,
            unlock_window_hi: 0.8,
            unlock_window_conflict_cycles: 3,
            hard_flip_cycles: 6,
            lock_confidence_threshold: 0.25,
            cycles_per_rot: 12.0,
            rpm_alpha: 0.2,
            rpm_move_thresh: 60.0,
            rpm_slow_thresh: 20.0,
            jitter_window_size: 10,
            jitter_max_rel: 0.4,
            coherence_rpm_norm: 100.0,
            idle_timeout_us: 800_000,
            idle_unlock_time_us: 2_000_000,
            idle_lock_decay: 0.9,
        }
    }

    /// Bench profile: wider dt window, faster compass.
    pub fn bench() -> Self {
        Self {
            name: "bench".to_string(),
            dt_min_us: 500,
            dt_max_us: 5_000_000,
            compass_alpha: 0.3,
            compass_threshold_high: 0.30,
            compass_threshold_low: 0.12,
            ..Self::production()
        }
    }

    /// Tolerant bench profile for noisy rigs and hand-turned assemblies.
    pub fn bench_tolerant() -> Self {
        Self {
            name: "bench_tolerant".to_string(),
            dt_min_us: 300,
            dt_max_us: 10_000_000,
            compass_alpha: 0.35,
            compass_threshold_high: 0.25,
            compass_threshold_low: 0.10,
            unlock_window_conflict_cycles: 4,
            ..Self::production()
        }
    }
}

// ─── Activity / Origin Configuration ────────────────────────────────

/// Thresholds for the L1 tactile classifier and the origin tracker.
///
/// Angle thresholds are degrees, times are seconds unless suffixed `_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    // ── L1 classifier ──
    /// Event/cycle silence before STILL_GAP_TIMEOUT [ms].
    pub gap_ms: f64,
    /// Activity score floor for FEELING.
    pub activity_threshold_low: f64,
    /// Activity score floor for SCRAPE.
    pub activity_threshold_high: f64,
    /// Displacement floor [rotations] for DISPLACEMENT/MOVING.
    pub displacement_threshold: f64,
    /// Direction confidence floor for MOVING_STABLE_DIR.
    pub direction_conf_threshold: f64,
    /// Encoder-confidence decay time constant [s].
    pub encoder_tau_s: f64,
    /// Update gap that wipes activity and encoder confidence [s].
    pub hard_reset_s: f64,
    /// Exponential decay rate for the activity score [1/s].
    pub activity_decay_rate: f64,

    // ── MDI common ──
    pub mdi_mode: MdiMode,
    pub mdi_win_ms: f64,
    pub mdi_valid_rate_min: f64,
    pub mdi_tremor_max: f64,
    pub mdi_conf_min: f64,
    pub mdi_conf_tau_s: f64,
    pub mdi_hold_s: f64,
    pub mdi_micro_acc_max: f64,
    pub mdi_flipflop_window_ms: f64,

    // ── MDI mode A ──
    pub mdi_conf_min_a: f64,
    pub mdi_trigger_changes_a: u32,
    pub mdi_confirm_s_a: f64,
    pub mdi_confirm_changes_a: u32,

    // ── MDI mode B ──
    pub micro_deg_per_step_base: f64,
    pub micro_deg_per_step_ev3: f64,
    pub micro_deg_per_step_ev6: f64,
    pub mdi_trigger_micro_deg: f64,

    // ── MDI mode C ──
    pub mdi_latch_confirm_s: f64,
    pub mdi_latch_drop_s: f64,
    pub mdi_latch_min_changes: u32,
    pub mdi_confirm_changes: u32,
    pub mdi_confirm_micro_deg: f64,
    pub mdi_confirm_conf: f64,

    // ── Pool window / origin ──
    pub pool_win_ms: f64,
    pub pool_changes_min: u32,
    pub pool_unique_min: usize,
    pub pool_valid_rate_min: f64,
    pub origin_step_deg: f64,
    pub origin_commit_horizon_s: f64,
    pub origin_rebound_eps_deg: f64,
    pub movement_confirm_deg: f64,
    pub speed_confirm_deg_s: f64,
    pub speed_ema_tau_s: f64,
    pub stop_gap_s: f64,
    pub noise_gap_s: f64,
    pub movement_hold_s: f64,
    pub activity_reset_a0: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            gap_ms: 500.0,
            activity_threshold_low: 1.0,
            activity_threshold_high: 5.0,
            displacement_threshold: 0.005,
            direction_conf_threshold: 0.5,
            encoder_tau_s: 0.6,
            hard_reset_s: 1.5,
            activity_decay_rate: 5.0,
            mdi_mode: MdiMode::C,
            mdi_win_ms: 200.0,
            mdi_valid_rate_min: 0.70,
            mdi_tremor_max: 0.60,
            mdi_conf_min: 0.35,
            mdi_conf_tau_s: 0.30,
            mdi_hold_s: 0.35,
            mdi_micro_acc_max: 36.0,
            mdi_flipflop_window_ms: 80.0,
            mdi_conf_min_a: 0.20,
            mdi_trigger_changes_a: 1,
            mdi_confirm_s_a: 0.25,
            mdi_confirm_changes_a: 2,
            micro_deg_per_step_base: 10.0,
            micro_deg_per_step_ev3: 15.0,
            micro_deg_per_step_ev6: 12.0,
            mdi_trigger_micro_deg: 20.0,
            mdi_latch_confirm_s: 0.25,
            mdi_latch_drop_s: 0.35,
            mdi_latch_min_changes: 1,
            mdi_confirm_changes: 2,
            mdi_confirm_micro_deg: 15.0,
            mdi_confirm_conf: 0.35,
            pool_win_ms: 250.0,
            pool_changes_min: 2,
            pool_unique_min: 2,
            pool_valid_rate_min: 0.70,
            origin_step_deg: 30.0,
            origin_commit_horizon_s: 0.35,
            origin_rebound_eps_deg: 10.0,
            movement_confirm_deg: 60.0,
            speed_confirm_deg_s: 30.0,
            speed_ema_tau_s: 0.25,
            stop_gap_s: 0.80,
            noise_gap_s: 0.50,
            movement_hold_s: 0.25,
            activity_reset_a0: 0.20,
        }
    }
}

impl ActivityConfig {
    /// Sensitive preset for hand-turned assemblies.
    pub fn hand_sensitive() -> Self {
        Self {
            origin_step_deg: 15.0,
            mdi_mode: MdiMode::C,
            mdi_confirm_micro_deg: 15.0,
            mdi_conf_min: 0.30,
            movement_confirm_deg: 45.0,
            ..Self::default()
        }
    }

    /// Tolerant preset for bench rigs with sparse events.
    pub fn bench_tolerant() -> Self {
        Self {
            origin_step_deg: 30.0,
            mdi_mode: MdiMode::B,
            mdi_trigger_micro_deg: 20.0,
            mdi_win_ms: 250.0,
            stop_gap_s: 1.0,
            ..Self::default()
        }
    }

    /// Aggressive preset: mode A single-change triggering.
    pub fn aggressive() -> Self {
        Self {
            origin_step_deg: 15.0,
            mdi_mode: MdiMode::A,
            mdi_conf_min_a: 0.15,
            mdi_confirm_s_a: 0.30,
            ..Self::default()
        }
    }
}

// ─── Gate Configuration ─────────────────────────────────────────────

/// Execution gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Coherence needed to hold ACTIVE and to leave FALLBACK.
    pub coherence_threshold: f64,
    /// Coherence floor for OBSERVE → ARMED.
    pub arm_coherence_min: f64,
    /// Coherence floor for ARMED → ACTIVE.
    pub activation_coherence_min: f64,
    /// Data age beyond which the gate forces FALLBACK [ms].
    pub stale_data_threshold_ms: u64,
    /// When set, ACTIVE requires a permitting intent every tick.
    pub require_intent_for_active: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            coherence_threshold: 0.6,
            arm_coherence_min: 0.4,
            activation_coherence_min: 0.7,
            stale_data_threshold_ms: 1000,
            require_intent_for_active: true,
        }
    }
}

// ─── Core Configuration Bundle ──────────────────────────────────────

/// Complete validated configuration, ready for pipeline construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub pipeline: PipelineProfile,
    pub activity: ActivityConfig,
    pub gate: GateConfig,
}

impl CoreConfig {
    /// Build a named profile bundle.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        let cfg = match name {
            "production" => Self {
                pipeline: PipelineProfile::production(),
                activity: ActivityConfig::default(),
                gate: GateConfig::default(),
            },
            "bench" => Self {
                pipeline: PipelineProfile::bench(),
                activity: ActivityConfig::default(),
                gate: GateConfig::default(),
            },
            "bench_tolerant" => Self {
                pipeline: PipelineProfile::bench_tolerant(),
                activity: ActivityConfig::bench_tolerant(),
                gate: GateConfig::default(),
            },
            other => return Err(ConfigError::UnknownProfile(other.to_string())),
        };
        Ok(cfg)
    }

    /// Load a named profile, overlay a sidecar file if present, validate.
    pub fn load(name: &str, sidecar: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::from_name(name)?;
        if let Some(path) = sidecar {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
            cfg.apply_overrides_str(&text)?;
            info!(profile = name, sidecar = %path.display(), "config loaded with sidecar");
        } else {
            info!(profile = name, "config loaded");
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply a flat TOML key/value table of overrides.
    pub fn apply_overrides_str(&mut self, toml_text: &str) -> Result<(), ConfigError> {
        let table: toml::Table =
            toml_text.parse().map_err(|e| ConfigError::Parse(format!("{e}")))?;
        for (key, value) in &table {
            self.apply_override(key, value)?;
        }
        Ok(())
    }

    /// Apply a single override. Unknown keys are errors.
    pub fn apply_override(&mut self, key: &str, value: &toml::Value) -> Result<(), ConfigError> {
        let p = &mut self.pipeline;
        let a = &mut self.activity;
        let g = &mut self.gate;
        match key {
            // ── pipeline ──
            "dt_min_us" => p.dt_min_us = as_u64("dt_min_us", value)? as u32,
            "dt_max_us" => p.dt_max_us = as_u64("dt_max_us", value)? as u32,
            "tile_span_cycles" => p.tile_span_cycles = as_f64("tile_span_cycles", value)?,
            "boot_cycles_for_median" => p.boot_cycles_for_median = as_u64("boot_cycles_for_median", value)? as usize,
            "dense_tile_emission" => p.dense_tile_emission = as_bool("dense_tile_emission", value)?,
            "compass_alpha" => p.compass_alpha = as_f64("compass_alpha", value)?,
            "compass_threshold_high" => p.compass_threshold_high = as_f64("compass_threshold_high", value)?,
            "compass_threshold_low" => p.compass_threshold_low = as_f64("compass_threshold_low", value)?,
            "lock_global_hi" => p.lock_global_hi = as_f64("lock_global_hi", value)?,
            "lock_window_min" => p.lock_window_min = as_f64("lock_window_min", value)?,
            "lock_cycles_min" => p.lock_cycles_min = as_u64("lock_cycles_min", value)? as u32,
            "lock_promote_cycles" => p.lock_promote_cycles = as_u64("lock_promote_cycles", value)? as u32,
            "unlock_global_lo" => p.unlock_global_lo = as_f64("unlock_global_lo", value)?,
            "unlock_window_hi" => p.unlock_window_hi = as_f64("unlock_window_hi", value)?,
            "unlock_window_conflict_cycles" => {
                p.unlock_window_conflict_cycles = as_u64("unlock_window_conflict_cycles", value)? as u32
            }
            "hard_flip_cycles" => p.hard_flip_cycles = as_u64("hard_flip_cycles", value)? as u32,
            "lock_confidence_threshold" => p.lock_confidence_threshold = as_f64("lock_confidence_threshold", value)?,
            "cycles_per_rot" => p.cycles_per_rot = as_f64("cycles_per_rot", value)?,
            "rpm_alpha" => p.rpm_alpha = as_f64("rpm_alpha", value)?,
            "rpm_move_thresh" => p.rpm_move_thresh = as_f64("rpm_move_thresh", value)?,
            "rpm_slow_thresh" => p.rpm_slow_thresh = as_f64("rpm_slow_thresh", value)?,
            "jitter_window_size" => p.jitter_window_size = as_u64("jitter_window_size", value)? as usize,
            "jitter_max_rel" => p.jitter_max_rel = as_f64("jitter_max_rel", value)?,
            "coherence_rpm_norm" => p.coherence_rpm_norm = as_f64("coherence_rpm_norm", value)?,
            "idle_timeout_us" => p.idle_timeout_us = as_u64("idle_timeout_us", value)?,
            "idle_unlock_time_us" => p.idle_unlock_time_us = as_u64("idle_unlock_time_us", value)?,
            "idle_lock_decay" => p.idle_lock_decay = as_f64("idle_lock_decay", value)?,

            // ── activity / L1 ──
            "gap_ms" => a.gap_ms = as_f64("gap_ms", value)?,
            "activity_threshold_low" => a.activity_threshold_low = as_f64("activity_threshold_low", value)?,
            "activity_threshold_high" => a.activity_threshold_high = as_f64("activity_threshold_high", value)?,
            "displacement_threshold" => a.displacement_threshold = as_f64("displacement_threshold", value)?,
            "direction_conf_threshold" => a.direction_conf_threshold = as_f64("direction_conf_threshold", value)?,
            "encoder_tau_s" => a.encoder_tau_s = as_f64("encoder_tau_s", value)?,
            "hard_reset_s" => a.hard_reset_s = as_f64("hard_reset_s", value)?,
            "activity_decay_rate" => a.activity_decay_rate = as_f64("activity_decay_rate", value)?,

            // ── MDI ──
            "mdi_mode" => a.mdi_mode = as_mdi_mode(value)?,
            "mdi_win_ms" => a.mdi_win_ms = as_f64("mdi_win_ms", value)?,
            "mdi_valid_rate_min" => a.mdi_valid_rate_min = as_f64("mdi_valid_rate_min", value)?,
            "mdi_tremor_max" => a.mdi_tremor_max = as_f64("mdi_tremor_max", value)?,
            "mdi_conf_min" => a.mdi_conf_min = as_f64("mdi_conf_min", value)?,
            "mdi_conf_tau_s" => a.mdi_conf_tau_s = as_f64("mdi_conf_tau_s", value)?,
            "mdi_hold_s" => a.mdi_hold_s = as_f64("mdi_hold_s", value)?,
            "mdi_micro_acc_max" => a.mdi_micro_acc_max = as_f64("mdi_micro_acc_max", value)?,
            "mdi_flipflop_window_ms" => a.mdi_flipflop_window_ms = as_f64("mdi_flipflop_window_ms", value)?,
            "mdi_conf_min_a" => a.mdi_conf_min_a = as_f64("mdi_conf_min_a", value)?,
            "mdi_trigger_changes_a" => a.mdi_trigger_changes_a = as_u64("mdi_trigger_changes_a", value)? as u32,
            "mdi_confirm_s_a" => a.mdi_confirm_s_a = as_f64("mdi_confirm_s_a", value)?,
            "mdi_confirm_changes_a" => a.mdi_confirm_changes_a = as_u64("mdi_confirm_changes_a", value)? as u32,
            "micro_deg_per_step_base" => a.micro_deg_per_step_base = as_f64("micro_deg_per_step_base", value)?,
            "micro_deg_per_step_ev3" => a.micro_deg_per_step_ev3 = as_f64("micro_deg_per_step_ev3", value)?,
            "micro_deg_per_step_ev6" => a.micro_deg_per_step_ev6 = as_f64("micro_deg_per_step_ev6", value)?,
            "mdi_trigger_micro_deg" => a.mdi_trigger_micro_deg = as_f64("mdi_trigger_micro_deg", value)?,
            "mdi_latch_confirm_s" => a.mdi_latch_confirm_s = as_f64("mdi_latch_confirm_s", value)?,
            "mdi_latch_drop_s" => a.mdi_latch_drop_s = as_f64("mdi_latch_drop_s", value)?,
            "mdi_latch_min_changes" => a.mdi_latch_min_changes = as_u64("mdi_latch_min_changes", value)? as u32,
            "mdi_confirm_changes" => a.mdi_confirm_changes = as_u64("mdi_confirm_changes", value)? as u32,
            "mdi_confirm_micro_deg" => a.mdi_confirm_micro_deg = as_f64("mdi_confirm_micro_deg", value)?,
            "mdi_confirm_conf" => a.mdi_confirm_conf = as_f64("mdi_confirm_conf", value)?,

            // ── pool / origin ──
            "pool_win_ms" => a.pool_win_ms = as_f64("pool_win_ms", value)?,
            "pool_changes_min" => a.pool_changes_min = as_u64("pool_changes_min", value)? as u32,
            "pool_unique_min" => a.pool_unique_min = as_u64("pool_unique_min", value)? as usize,
            "pool_valid_rate_min" => a.pool_valid_rate_min = as_f64("pool_valid_rate_min", value)?,
            "origin_step_deg" => a.origin_step_deg = as_f64("origin_step_deg", value)?,
            "origin_commit_horizon_s" => a.origin_commit_horizon_s = as_f64("origin_commit_horizon_s", value)?,
            "origin_rebound_eps_deg" => a.origin_rebound_eps_deg = as_f64("origin_rebound_eps_deg", value)?,
            "movement_confirm_deg" => a.movement_confirm_deg = as_f64("movement_confirm_deg", value)?,
            "speed_confirm_deg_s" => a.speed_confirm_deg_s = as_f64("speed_confirm_deg_s", value)?,
            "speed_ema_tau_s" => a.speed_ema_tau_s = as_f64("speed_ema_tau_s", value)?,
            "stop_gap_s" => a.stop_gap_s = as_f64("stop_gap_s", value)?,
            "noise_gap_s" => a.noise_gap_s = as_f64("noise_gap_s", value)?,
            "movement_hold_s" => a.movement_hold_s = as_f64("movement_hold_s", value)?,
            "activity_reset_a0" => a.activity_reset_a0 = as_f64("activity_reset_a0", value)?,

            // ── gate ──
            "coherence_threshold" => g.coherence_threshold = as_f64("coherence_threshold", value)?,
            "arm_coherence_min" => g.arm_coherence_min = as_f64("arm_coherence_min", value)?,
            "activation_coherence_min" => g.activation_coherence_min = as_f64("activation_coherence_min", value)?,
            "stale_data_threshold_ms" => g.stale_data_threshold_ms = as_u64("stale_data_threshold_ms", value)?,
            "require_intent_for_active" => g.require_intent_for_active = as_bool("require_intent_for_active", value)?,

            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Range-check every field. Called after profile construction + overlay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        check_unit_open(p.compass_alpha, "compass_alpha")?;
        check_unit_open(p.rpm_alpha, "rpm_alpha")?;
        check_unit(p.compass_threshold_high, "compass_threshold_high")?;
        check_unit(p.compass_threshold_low, "compass_threshold_low")?;
        if p.compass_threshold_low > p.compass_threshold_high {
            return Err(ConfigError::OutOfRange(format!(
                "compass_threshold_low {} > compass_threshold_high {}",
                p.compass_threshold_low, p.compass_threshold_high
            )));
        }
        if p.dt_min_us >= p.dt_max_us {
            return Err(ConfigError::OutOfRange(format!(
                "dt_min_us {} >= dt_max_us {}",
                p.dt_min_us, p.dt_max_us
            )));
        }
        check_positive(p.cycles_per_rot, "cycles_per_rot")?;
        check_positive(p.tile_span_cycles, "tile_span_cycles")?;
        if p.boot_cycles_for_median < 3 {
            return Err(ConfigError::OutOfRange(format!(
                "boot_cycles_for_median {} < 3",
                p.boot_cycles_for_median
            )));
        }
        if p.jitter_window_size < 2 || p.jitter_window_size > RPM_JITTER_CAP {
            return Err(ConfigError::OutOfRange(format!(
                "jitter_window_size {} outside [2, {RPM_JITTER_CAP}]",
                p.jitter_window_size
            )));
        }
        check_positive(p.rpm_move_thresh, "rpm_move_thresh")?;
        check_positive(p.coherence_rpm_norm, "coherence_rpm_norm")?;

        let a = &self.activity;
        check_positive(a.gap_ms, "gap_ms")?;
        check_positive(a.hard_reset_s, "hard_reset_s")?;
        check_positive(a.encoder_tau_s, "encoder_tau_s")?;
        check_positive(a.mdi_win_ms, "mdi_win_ms")?;
        check_positive(a.pool_win_ms, "pool_win_ms")?;
        check_unit(a.mdi_valid_rate_min, "mdi_valid_rate_min")?;
        check_unit(a.pool_valid_rate_min, "pool_valid_rate_min")?;
        check_unit(a.mdi_tremor_max, "mdi_tremor_max")?;
        check_positive(a.origin_step_deg, "origin_step_deg")?;
        check_positive(a.stop_gap_s, "stop_gap_s")?;

        let g = &self.gate;
        check_unit(g.coherence_threshold, "coherence_threshold")?;
        check_unit(g.arm_coherence_min, "arm_coherence_min")?;
        check_unit(g.activation_coherence_min, "activation_coherence_min")?;
        if g.stale_data_threshold_ms == 0 {
            return Err(ConfigError::OutOfRange(
                "stale_data_threshold_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Value extraction helpers ───────────────────────────────────────

fn as_f64(key: &'static str, value: &toml::Value) -> Result<f64, ConfigError> {
    match value {
        toml::Value::Float(f) => Ok(*f),
        toml::Value::Integer(i) => Ok(*i as f64),
        _ => Err(ConfigError::InvalidType {
            key,
            expected: "a number",
        }),
    }
}

fn as_u64(key: &'static str, value: &toml::Value) -> Result<u64, ConfigError> {
    match value {
        toml::Value::Integer(i) if *i >= 0 => Ok(*i as u64),
        _ => Err(ConfigError::InvalidType {
            key,
            expected: "a non-negative integer",
        }),
    }
}

fn as_bool(key: &'static str, value: &toml::Value) -> Result<bool, ConfigError> {
    value.as_bool().ok_or(ConfigError::InvalidType {
        key,
        expected: "a boolean",
    })
}

fn as_mdi_mode(value: &toml::Value) -> Result<MdiMode, ConfigError> {
    match value.as_str() {
        Some("A") | Some("a") => Ok(MdiMode::A),
        Some("B") | Some("b") => Ok(MdiMode::B),
        Some("C") | Some("c") => Ok(MdiMode::C),
        _ => Err(ConfigError::InvalidType {
            key: "mdi_mode",
            expected: "one of \"A\", \"B\", \"C\"",
        }),
    }
}

fn check_unit(v: f64, name: &str) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&v) {
        return Err(ConfigError::OutOfRange(format!("{name} {v} outside [0, 1]")));
    }
    Ok(())
}

fn check_unit_open(v: f64, name: &str) -> Result<(), ConfigError> {
    if v <= 0.0 || v > 1.0 {
        return Err(ConfigError::OutOfRange(format!("{name} {v} outside (0, 1]")));
    }
    Ok(())
}

fn check_positive(v: f64, name: &str) -> Result<(), ConfigError> {
    if v <= 0.0 {
        return Err(ConfigError::OutOfRange(format!("{name} {v} must be > 0")));
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn named_profiles_validate() {
        for name in ["production", "bench", "bench_tolerant"] {
            let cfg = CoreConfig::from_name(name).unwrap();
            cfg.validate().unwrap();
            assert_eq!(cfg.pipeline.name, name);
        }
    }

    #[test]
    fn unknown_profile_rejected() {
        let err = CoreConfig::from_name("turbo").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile(_)));
    }

    #[test]
    fn bench_tolerant_uses_mode_b() {
        let cfg = CoreConfig::from_name("bench_tolerant").unwrap();
        assert_eq!(cfg.activity.mdi_mode, MdiMode::B);
        assert!((cfg.activity.stop_gap_s - 1.0).abs() < 1e-12);
    }

    #[test]
    fn overlay_overrides_fields() {
        let mut cfg = CoreConfig::from_name("bench").unwrap();
        cfg.apply_overrides_str(
            r#"
compass_alpha = 0.4
cycles_per_rot = 24
rpm_move_thresh = 45.0
mdi_mode = "A"
require_intent_for_active = false
"#,
        )
        .unwrap();
        assert!((cfg.pipeline.compass_alpha - 0.4).abs() < 1e-12);
        assert!((cfg.pipeline.cycles_per_rot - 24.0).abs() < 1e-12);
        assert!((cfg.pipeline.rpm_move_thresh - 45.0).abs() < 1e-12);
        assert_eq!(cfg.activity.mdi_mode, MdiMode::A);
        assert!(!cfg.gate.require_intent_for_active);
        cfg.validate().unwrap();
    }

    #[test]
    fn overlay_rejects_unknown_key() {
        let mut cfg = CoreConfig::from_name("bench").unwrap();
        let err = cfg.apply_overrides_str("compass_omega = 0.4").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(k) if k == "compass_omega"));
    }

    #[test]
    fn overlay_rejects_wrong_type() {
        let mut cfg = CoreConfig::from_name("bench").unwrap();
        let err = cfg.apply_overrides_str("compass_alpha = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { key: "compass_alpha", .. }));
    }

    #[test]
    fn validate_rejects_inverted_dt_bounds() {
        let mut cfg = CoreConfig::from_name("bench").unwrap();
        cfg.pipeline.dt_min_us = 10_000_000;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("dt_min_us"));
    }

    #[test]
    fn validate_rejects_bad_alpha() {
        let mut cfg = CoreConfig::from_name("production").unwrap();
        cfg.pipeline.compass_alpha = 1.5;
        assert!(cfg.validate().is_err());
        cfg.pipeline.compass_alpha = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_jitter_window() {
        let mut cfg = CoreConfig::from_name("production").unwrap();
        cfg.pipeline.jitter_window_size = RPM_JITTER_CAP + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_with_sidecar_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "compass_alpha = 0.25\nstale_data_threshold_ms = 750").unwrap();
        let cfg = CoreConfig::load("production", Some(file.path())).unwrap();
        assert!((cfg.pipeline.compass_alpha - 0.25).abs() < 1e-12);
        assert_eq!(cfg.gate.stale_data_threshold_ms, 750);
    }

    #[test]
    fn load_missing_sidecar_errors() {
        let err = CoreConfig::load("production", Some(Path::new("/nonexistent/rotor.toml")));
        assert!(matches!(err, Err(ConfigError::Io(_))));
    }

    #[test]
    fn hand_sensitive_preset() {
        let a = ActivityConfig::hand_sensitive();
        assert!((a.origin_step_deg - 15.0).abs() < 1e-12);
        assert_eq!(a.mdi_mode, MdiMode::C);
    }
}
